use anyhow::{bail, Context};
use config::{Config, Environment};
use serde::Deserialize;

use crate::library_repository::PostgresLibraryRepositoryConfig;
use crate::pagination::PaginationSettings;

const ENV_PREFIX: &str = "READINGTRACKER";

/// Service configuration, every key can be overridden with `READINGTRACKER_<KEY>`
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub use_in_memory_db: bool,
    pub db_host: String,
    pub db_username: String,
    pub db_password: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Users registered on startup, `name:token` pairs separated by commas
    pub seed_users: String,
    pub service_name: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SeedUser {
    pub username: String,
    pub token: String,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(environment: Environment) -> anyhow::Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080_i64)?
            .set_default("use_in_memory_db", false)?
            .set_default("db_host", "127.0.0.1")?
            .set_default("db_username", "postgres")?
            .set_default("db_password", "postgres")?
            .set_default("default_page_size", 10_i64)?
            .set_default("max_page_size", 100_i64)?
            .set_default("seed_users", "")?
            .set_default("service_name", "readingtracker_service")?
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if settings.default_page_size == 0 || settings.max_page_size == 0 {
            bail!("Page sizes have to be positive");
        }
        if settings.default_page_size > settings.max_page_size {
            bail!(
                "Default page size {} exceeds max page size {}",
                settings.default_page_size,
                settings.max_page_size
            );
        }
        Ok(settings)
    }

    pub fn pagination(&self) -> PaginationSettings {
        PaginationSettings {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }

    pub fn postgres_config(&self) -> PostgresLibraryRepositoryConfig {
        PostgresLibraryRepositoryConfig {
            hostname: self.db_host.clone(),
            username: self.db_username.clone(),
            password: self.db_password.clone(),
        }
    }

    pub fn seed_users(&self) -> anyhow::Result<Vec<SeedUser>> {
        self.seed_users
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((username, token)) if !username.is_empty() && !token.is_empty() => {
                    Ok(SeedUser {
                        username: username.to_string(),
                        token: token.to_string(),
                    })
                }
                _ => bail!("Seed user entry {entry:?} is not in name:token format"),
            })
            .collect()
    }
}
