use std::env;

use actix_web::{web, App, HttpServer};
use log::info;

use ordo::config::{Backend, Settings};
use ordo::http::category::server::configure;
use ordo::seed::Seed;
use ordo::service::CategoryService;
use ordo::store::memory::MemoryStore;
use ordo::store::postgres::PostgresStore;
use ordo::store::Store;

async fn serve<S: Store + Send + Sync + 'static>(
    store: S,
    settings: &Settings,
) -> anyhow::Result<()> {
    if let Some(path) = &settings.store.seed {
        Seed::from_path(path)?.apply(&store).await?;
    }

    let service = web::Data::new(CategoryService::new(store));
    let address = settings.server.address.clone();
    let port = settings.server.port;
    info!("listening on {address}:{port}");

    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .configure(configure::<S>)
    })
    .bind((address, port))?
    .run()
    .await?;
    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let mut settings = Settings::load(None)?;
    if let Some(address) = args.get(1) {
        settings.server.address = address.clone();
    }
    if let Some(port) = args.get(2) {
        settings.server.port = port.parse()?;
    }

    match settings.store.backend {
        Backend::Memory => serve(MemoryStore::new(), &settings).await,
        Backend::Postgres => {
            let store = PostgresStore::connect(&settings.store.postgres).await?;
            store.init_schema().await?;
            serve(store, &settings).await
        }
    }
}
