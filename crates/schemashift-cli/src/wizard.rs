use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dialoguer::{Confirm, Input, Select};
use schemashift_config::{AppConfig, ConfigLoader, DatabaseConfig, TransactionMode};
use tracing::info;

/// Write a starter config to `path`. Prompts for the main settings when
/// attached to a terminal, otherwise writes the defaults.
pub fn run_init(path: &Path, force: bool) -> Result<()> {
    let interactive = std::io::stdin().is_terminal();

    if path.exists() && !force {
        let overwrite = interactive
            && Confirm::new()
                .with_prompt(format!("{} exists. Overwrite it?", path.display()))
                .default(false)
                .interact()
                .context("overwrite confirmation cancelled")?;
        if !overwrite {
            bail!(
                "{} already exists (pass --force to overwrite)",
                path.display()
            );
        }
    }

    let config = if interactive {
        prompt_config()?
    } else {
        println!("Non-interactive environment detected, writing defaults.");
        AppConfig::starter()
    };

    ConfigLoader::write(path, &config)
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("config written to {}", path.display());
    println!();
    println!("  Config written to {}", path.display());
    println!("  Run `schemashift migrate` to bring the development database up to date.");
    println!();

    Ok(())
}

fn prompt_config() -> Result<AppConfig> {
    println!();
    println!("  schemashift setup");
    println!("  -----------------");
    println!();

    let development: String = Input::new()
        .with_prompt("Development database file")
        .default("development.sqlite3".to_string())
        .interact_text()
        .context("database path input cancelled")?;

    let table: String = Input::new()
        .with_prompt("Ledger table name")
        .default("_schema_migrations".to_string())
        .interact_text()
        .context("ledger table input cancelled")?;

    let modes = &[
        "One transaction per migration (recommended)",
        "One transaction for the whole run",
    ];
    let mode = Select::new()
        .with_prompt("Transaction mode")
        .items(modes)
        .default(0)
        .interact()
        .context("transaction mode selection cancelled")?;

    let port: u16 = Input::new()
        .with_prompt("Report sink port")
        .default(3990)
        .interact_text()
        .context("port input cancelled")?;

    let mode = if mode == 0 {
        TransactionMode::PerUnit
    } else {
        TransactionMode::Batch
    };
    Ok(starter_config(PathBuf::from(development), table, mode, port))
}

fn starter_config(
    development: PathBuf,
    table: String,
    mode: TransactionMode,
    port: u16,
) -> AppConfig {
    let mut config = AppConfig::starter();
    config.database.insert(
        "development".to_string(),
        DatabaseConfig {
            storage: Some(development),
            ..Default::default()
        },
    );
    config.migrations.table = table;
    config.migrations.transaction_mode = mode;
    config.gateway.port = port;
    config
}

#[cfg(test)]
mod tests {
    use schemashift_config::Environment;

    use super::*;

    #[test]
    fn starter_config_applies_answers() {
        let config = starter_config(
            PathBuf::from("app.sqlite3"),
            "SchemaMeta".into(),
            TransactionMode::Batch,
            4100,
        );

        let dev = config.database_for(&Environment::Development).unwrap();
        assert_eq!(dev.storage, Some(PathBuf::from("app.sqlite3")));
        assert!(config.database_for(&Environment::Production).is_ok());
        assert_eq!(config.migrations.table, "SchemaMeta");
        assert_eq!(config.migrations.transaction_mode, TransactionMode::Batch);
        assert_eq!(config.gateway.port, 4100);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemashift.yml");
        std::fs::write(&path, "log:\n  filter: debug\n").unwrap();

        if std::io::stdin().is_terminal() {
            return;
        }
        let err = run_init(&path, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "log:\n  filter: debug\n"
        );
    }
}
