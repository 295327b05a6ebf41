//! Runtime settings. Values come from an optional TOML file and are overridden by environment
//! variables prefixed with `ORDO`, using `__` between sections: `ORDO__SERVER__PORT=9000`,
//! `ORDO__STORE__BACKEND=postgres`.
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/ordo.toml";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub migration: MigrationSettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: Backend,
    /// JSON seed document applied at startup.
    #[serde(default)]
    pub seed: Option<PathBuf>,
    #[serde(default)]
    pub postgres: PostgresSettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PostgresSettings {
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_pg_dbname")]
    pub dbname: String,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            user: default_pg_user(),
            password: String::new(),
            dbname: default_pg_dbname(),
            max_size: default_max_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MigrationSettings {
    /// Category that templates with dangling legacy references are moved to.
    #[serde(default = "default_category")]
    pub default_category: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            default_category: default_category(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_user() -> String {
    "postgres".to_string()
}

fn default_pg_dbname() -> String {
    "ordo".to_string()
}

fn default_max_size() -> usize {
    16
}

fn default_category() -> String {
    crate::migration::DEFAULT_CATEGORY_NAME.to_string()
}

impl Settings {
    /// Loads `path` (or [DEFAULT_CONFIG_PATH]) if it exists, then applies environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("ORDO").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{Backend, Settings};

    #[test]
    fn test_that_missing_file_gives_defaults() {
        let settings = Settings::load(Some("does/not/exist.toml")).unwrap();
        assert!(settings.server.port == 8080);
        assert!(settings.store.backend == Backend::Memory);
        assert!(settings.migration.default_category == "未分类");
    }

    #[test]
    fn test_that_file_values_are_read() {
        let path = std::env::temp_dir().join(format!("ordo-settings-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[server]\nport = 9001\n\n[store]\nbackend = \"postgres\"\n\n[store.postgres]\ndbname = \"quant\""
        )
        .unwrap();

        let settings = Settings::load(path.to_str()).unwrap();
        assert!(settings.server.port == 9001);
        assert!(settings.server.address == "127.0.0.1");
        assert!(settings.store.backend == Backend::Postgres);
        assert!(settings.store.postgres.dbname == "quant");
        assert!(settings.store.postgres.port == 5432);

        std::fs::remove_file(path).unwrap();
    }
}
