use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use schemashift_common::{Error, Result};
use serde::{Deserialize, Serialize};

pub const ENV_VAR: &str = "SCHEMASHIFT_ENV";

/// Top-level configuration, read once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection parameters keyed by deployment environment name.
    #[serde(default)]
    pub database: BTreeMap<String, DatabaseConfig>,

    #[serde(default)]
    pub migrations: MigrationsConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Connection parameters for `env`.
    pub fn database_for(&self, env: &Environment) -> Result<&DatabaseConfig> {
        self.database.get(env.as_str()).ok_or_else(|| {
            Error::Config(format!(
                "no database configured for environment '{env}' (known: {})",
                if self.database.is_empty() {
                    "none".to_string()
                } else {
                    self.database.keys().cloned().collect::<Vec<_>>().join(", ")
                }
            ))
        })
    }

    /// A starter config with one SQLite file per standard environment.
    pub fn starter() -> Self {
        let database = [
            Environment::Development,
            Environment::Test,
            Environment::Production,
        ]
        .into_iter()
        .map(|env| {
            let db = DatabaseConfig {
                storage: Some(PathBuf::from(format!("{}.sqlite3", env.as_str()))),
                ..Default::default()
            };
            (env.as_str().to_string(), db)
        })
        .collect();

        Self {
            database,
            ..Default::default()
        }
    }
}

/// Store connection parameters. Only the store factory interprets these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Name of an environment variable whose value replaces `storage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_env_variable: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            storage: None,
            database: None,
            host: None,
            port: None,
            username: None,
            password: None,
            use_env_variable: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_dialect() -> String {
    "sqlite".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Ledger table name.
    #[serde(default = "default_ledger_table")]
    pub table: String,
    #[serde(default)]
    pub transaction_mode: TransactionMode,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            table: default_ledger_table(),
            transaction_mode: TransactionMode::default(),
        }
    }
}

fn default_ledger_table() -> String {
    "_schema_migrations".to_string()
}

/// How pending units are grouped into transactions during an apply run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// One transaction per unit; a failure keeps earlier units committed.
    #[default]
    PerUnit,
    /// One transaction for the whole run; a failure rolls everything back.
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_report_path")]
    pub report_path: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            report_path: default_report_path(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3990
}

fn default_report_path() -> String {
    "/csp-report".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Deployment environment selecting a `database` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Environment {
    Development,
    Test,
    Production,
    Custom(String),
}

impl Environment {
    pub fn as_str(&self) -> &str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
            Environment::Custom(name) => name,
        }
    }

    /// Explicit choice wins, then `SCHEMASHIFT_ENV`, then development.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        match explicit {
            Some(name) => name.parse(),
            None => match std::env::var(ENV_VAR) {
                Ok(name) if !name.trim().is_empty() => name.parse(),
                _ => Ok(Environment::Development),
            },
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        match name.to_ascii_lowercase().as_str() {
            "" => Err(Error::Config("environment name cannot be empty".into())),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            _ => Ok(Environment::Custom(name.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases_and_custom_names() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("PRODUCTION".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(
            "staging".parse::<Environment>().unwrap(),
            Environment::Custom("staging".into())
        );
        assert!("  ".parse::<Environment>().is_err());
    }

    #[test]
    fn explicit_environment_wins() {
        let env = Environment::resolve(Some("test")).unwrap();
        assert_eq!(env, Environment::Test);
    }

    #[test]
    fn database_for_reports_known_environments() {
        let config = AppConfig::starter();
        assert!(config.database_for(&Environment::Test).is_ok());

        let err = config
            .database_for(&Environment::Custom("staging".into()))
            .unwrap_err()
            .to_string();
        assert!(err.contains("staging"));
        assert!(err.contains("development, production, test"));
    }

    #[test]
    fn defaults_are_filled_in() {
        let config = AppConfig::default();
        assert_eq!(config.migrations.table, "_schema_migrations");
        assert_eq!(config.migrations.transaction_mode, TransactionMode::PerUnit);
        assert_eq!(config.gateway.report_path, "/csp-report");
        assert_eq!(config.log.filter, "info");
    }
}
