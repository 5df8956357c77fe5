mod banner;
mod wizard;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schemashift_common::Error;
use schemashift_config::{AppConfig, ConfigLoader, DatabaseConfig, Environment, LogConfig};
use schemashift_db::{ApplyOutcome, MigrationSet, Migrator, RevertReport, Store, units};
use schemashift_gateway::GatewayServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemashift", version, about = "Ordered, transactional schema migrations for SQLite")]
struct Cli {
    /// Config file (defaults to schemashift.{yml,yaml,toml,json} in the working directory)
    #[arg(long, global = true, env = "SCHEMASHIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment environment (development, test, production, or a custom name)
    #[arg(long, global = true)]
    env: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config file
    Init {
        #[arg(long, default_value = "schemashift.yml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Apply pending migrations
    Migrate {
        /// Stop after this migration id
        #[arg(long, conflicts_with = "only")]
        to: Option<String>,
        /// Apply exactly this migration id
        #[arg(long)]
        only: Option<String>,
    },
    /// Revert applied migrations, newest first
    Rollback {
        /// Number of migrations to revert
        #[arg(long, default_value_t = 1)]
        steps: usize,
        /// Revert down to and including this migration id
        #[arg(long, conflicts_with = "all")]
        to: Option<String>,
        /// Revert every applied migration
        #[arg(long)]
        all: bool,
    },
    /// Show applied and pending migrations
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the HTTP report sink
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let (config, source) = load_config(cli.config.as_deref())?;
    init_tracing(&config.log, cli.log_json);
    // The loader ran before the subscriber existed, so its own notice was lost.
    match &source {
        ConfigSource::File(path) => info!("config loaded from {}", path.display()),
        ConfigSource::Defaults(dir) => {
            info!("no config file found in {}, using defaults", dir.display())
        }
    }

    match cli.command {
        Command::Init { path, force } => wizard::run_init(&path, force),
        Command::Serve => {
            GatewayServer::new(config.gateway.clone()).run().await?;
            Ok(())
        }
        Command::Migrate { to, only } => {
            let mut target = Target::open(&config, cli.env.as_deref())?;
            let migrator = Migrator::new(&target.units, &config.migrations)?;
            migrate(&migrator, &mut target.store, to, only).map_err(fatal)
        }
        Command::Rollback { steps, to, all } => {
            let mut target = Target::open(&config, cli.env.as_deref())?;
            let migrator = Migrator::new(&target.units, &config.migrations)?;
            rollback(&migrator, &mut target.store, steps, to, all).map_err(fatal)
        }
        Command::Status { json } => {
            let target = Target::open(&config, cli.env.as_deref())?;
            let migrator = Migrator::new(&target.units, &config.migrations)?;
            status(&migrator, &target, json).map_err(fatal)
        }
    }
}

/// The database selected for this run plus the known migrations.
struct Target {
    env: Environment,
    location: String,
    units: MigrationSet,
    store: Store,
}

impl Target {
    fn open(config: &AppConfig, env: Option<&str>) -> Result<Self> {
        let env = Environment::resolve(env)?;
        let database = config.database_for(&env)?;
        let store = Store::connect(database)
            .with_context(|| format!("failed to open {env} database"))?;
        info!("using {env} database");

        Ok(Self {
            location: describe_location(database),
            units: units::catalog()?,
            store,
            env,
        })
    }
}

fn describe_location(database: &DatabaseConfig) -> String {
    database
        .use_env_variable
        .as_ref()
        .map(|var| format!("${var}"))
        .or_else(|| database.storage.as_ref().map(|p| p.display().to_string()))
        .or_else(|| database.database.clone())
        .unwrap_or_else(|| "?".to_string())
}

/// Where the running config came from.
enum ConfigSource {
    File(PathBuf),
    Defaults(PathBuf),
}

fn load_config(explicit: Option<&Path>) -> Result<(AppConfig, ConfigSource)> {
    match explicit {
        Some(path) => Ok((
            ConfigLoader::from_file(path)?,
            ConfigSource::File(path.to_path_buf()),
        )),
        None => {
            let cwd = std::env::current_dir().context("failed to read working directory")?;
            let (config, found) = ConfigLoader::discover(&cwd)?;
            let source = match found {
                Some(path) => ConfigSource::File(path),
                None => ConfigSource::Defaults(cwd),
            };
            Ok((config, source))
        }
    }
}

/// Turn a runner error into the process error, naming the unit that stopped
/// the run both in the log and in the message printed on exit.
fn fatal(err: Error) -> anyhow::Error {
    match err.migration_id().map(str::to_string) {
        Some(id) => {
            error!(migration = %id, "{err}");
            anyhow::Error::new(err).context(format!("schema change stopped at {id}"))
        }
        None => err.into(),
    }
}

fn init_tracing(log: &LogConfig, force_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json || force_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn migrate(
    migrator: &Migrator<'_>,
    store: &mut Store,
    to: Option<String>,
    only: Option<String>,
) -> schemashift_common::Result<()> {
    if let Some(id) = only {
        match migrator.apply_one(store, &id)? {
            ApplyOutcome::Applied => println!("Applied {id}"),
            ApplyOutcome::AlreadyApplied => {
                println!("{id} is already applied, nothing to do")
            }
        }
        return Ok(());
    }

    let report = match to {
        Some(target) => migrator.apply_to(store, &target)?,
        None => migrator.apply_pending(store)?,
    };

    if report.applied.is_empty() {
        println!(
            "Nothing to migrate ({} already applied).",
            report.already_applied
        );
    } else {
        for id in &report.applied {
            println!("  applied  {id}");
        }
        println!(
            "Applied {} migration(s) in {} ms.",
            report.applied.len(),
            report.elapsed_ms
        );
    }
    Ok(())
}

fn rollback(
    migrator: &Migrator<'_>,
    store: &mut Store,
    steps: usize,
    to: Option<String>,
    all: bool,
) -> schemashift_common::Result<()> {
    let report = if all {
        migrator.revert_all(store)?
    } else if let Some(target) = to {
        migrator.revert_to(store, &target)?
    } else {
        migrator.revert_last(store, steps)?
    };
    print_revert_report(&report);
    Ok(())
}

fn print_revert_report(report: &RevertReport) {
    if report.reverted.is_empty() {
        println!("Nothing to revert.");
        return;
    }
    for unit in &report.reverted {
        println!("  reverted {}", unit.id);
    }
    for (id, notice) in report.notices() {
        println!("  notice   {id}: {notice} (ledger entry removed, schema left as is)");
    }
    println!(
        "Reverted {} migration(s) in {} ms.",
        report.reverted.len(),
        report.elapsed_ms
    );
}

fn status(
    migrator: &Migrator<'_>,
    target: &Target,
    json: bool,
) -> schemashift_common::Result<()> {
    if json {
        println!("{}", status_json(migrator, &target.store)?);
    } else {
        let status = migrator.status(&target.store)?;
        banner::print_status(&target.env, &target.location, &status);
    }
    Ok(())
}

fn status_json(migrator: &Migrator<'_>, store: &Store) -> schemashift_common::Result<String> {
    Ok(serde_json::to_string_pretty(&migrator.status(store)?)?)
}
