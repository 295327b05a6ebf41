use std::env;
use std::process::ExitCode;

use ordo::config::{Backend, Settings};
use ordo::migration::{Migration, MigrationReport};
use ordo::seed::Seed;
use ordo::store::memory::MemoryStore;
use ordo::store::postgres::PostgresStore;
use ordo::store::Store;

async fn migrate<S: Store>(
    store: S,
    settings: &Settings,
    verify_only: bool,
) -> anyhow::Result<MigrationReport> {
    if let Some(path) = &settings.store.seed {
        Seed::from_path(path)?.apply(&store).await?;
    }
    let migration =
        Migration::new(&store).with_default_category(settings.migration.default_category.clone());
    let report = if verify_only {
        migration.verify().await?
    } else {
        migration.run().await?
    };
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let verify_only = env::args().skip(1).any(|arg| arg == "--verify");
    let settings = Settings::load(None)?;

    let report = match settings.store.backend {
        Backend::Memory => migrate(MemoryStore::new(), &settings, verify_only).await?,
        Backend::Postgres => {
            let store = PostgresStore::connect(&settings.store.postgres).await?;
            store.init_schema().await?;
            migrate(store, &settings, verify_only).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
