//! Server configuration read from environment variables.
//!
//!   REGISTRY_ENV                        `dev` runs in dry-run mode (default: production)
//!   REGISTRY_STORE                      `postgres` or `memory` (default: postgres)
//!   REGISTRY_DATABASE_URL               Postgres connection string, falls back to DATABASE_URL
//!   REGISTRY_DB_MAX_CONNECTIONS         pool size (default: 5)
//!   REGISTRY_BIND_ADDR                  listen address (default: 0.0.0.0:3000)
//!   REGISTRY_FORM_SCHEMA                form schema YAML (default: config/form_schema.yaml)
//!   REGISTRY_REGISTRATION_TABLE         parent table (default: registro_violencia)
//!   REGISTRY_ASSOCIATED_VIOLENCE_TABLE  dependent table (default: violencia_asociada)

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::TableLayout;
use crate::sql::{Identifier, InvalidIdentifier};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SCHEMA_PATH: &str = "config/form_schema.yaml";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: unknown value {value:?} (expected one of: {expected})")]
    UnknownValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{var}: {value:?} is not a valid {what}")]
    Unparsable {
        var: &'static str,
        value: String,
        what: &'static str,
    },

    #[error("{var}: {source}")]
    Identifier {
        var: &'static str,
        #[source]
        source: InvalidIdentifier,
    },

    #[error("REGISTRY_DATABASE_URL (or DATABASE_URL) must be set for the postgres store")]
    MissingDatabaseUrl,
}

/// `dev` echoes statements instead of writing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    DryRun,
    Live,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::DryRun => "dry-run",
            RunMode::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: RunMode,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    pub schema_path: PathBuf,
    pub layout: TableLayout,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = match var("REGISTRY_ENV").as_deref().map(str::trim) {
            Some("dev") => RunMode::DryRun,
            _ => RunMode::Live,
        };

        let store = match var("REGISTRY_STORE") {
            None => StoreBackend::Postgres,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "postgres" => StoreBackend::Postgres,
                "memory" => StoreBackend::Memory,
                _ => {
                    return Err(ConfigError::UnknownValue {
                        var: "REGISTRY_STORE",
                        value,
                        expected: "postgres, memory",
                    })
                }
            },
        };

        let database_url = var("REGISTRY_DATABASE_URL").or_else(|| var("DATABASE_URL"));
        if mode == RunMode::Live && store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let max_connections = match var("REGISTRY_DB_MAX_CONNECTIONS") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(value) => match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Unparsable {
                        var: "REGISTRY_DB_MAX_CONNECTIONS",
                        value,
                        what: "positive integer",
                    })
                }
            },
        };

        let bind_addr = var("REGISTRY_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .trim()
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Unparsable {
                var: "REGISTRY_BIND_ADDR",
                value: bind_addr.clone(),
                what: "socket address",
            })?;

        let schema_path = var("REGISTRY_FORM_SCHEMA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH));

        let mut layout = TableLayout::default();
        if let Some(table) = var("REGISTRY_REGISTRATION_TABLE") {
            layout.registration_table = identifier("REGISTRY_REGISTRATION_TABLE", table)?;
        }
        if let Some(table) = var("REGISTRY_ASSOCIATED_VIOLENCE_TABLE") {
            layout.violence_table = identifier("REGISTRY_ASSOCIATED_VIOLENCE_TABLE", table)?;
        }

        Ok(Self {
            mode,
            store,
            database_url,
            max_connections,
            bind_addr,
            schema_path,
            layout,
        })
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

fn identifier(var: &'static str, value: String) -> Result<Identifier, ConfigError> {
    Identifier::parse(value.trim()).map_err(|source| ConfigError::Identifier { var, source })
}
