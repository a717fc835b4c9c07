use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use crate::config::Config;
use crate::db::Database;
use crate::error::SchemaHealError;
use crate::reconcile::Reconciler;
use crate::schema;
use crate::server;

#[derive(Parser)]
#[command(
    name = "schemaheal",
    version,
    about = "schemaheal: additive schema reconciliation for SQLite"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides `database.path`)
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add missing columns to existing tables, then print the report
    Reconcile,

    /// Report drift without changing anything (exits 1 on drift)
    Validate {
        /// Print the drift entries as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Create missing tables, then reconcile
    Init,

    /// Start the server, reconciling in the background (default if no command specified)
    Serve,

    /// Print the effective configuration
    Config,
}

/// What the process should exit with after a command ran without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Dirty,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Path the config is read from: `--config`, else the platform default.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Config::default_path)
    }

    pub fn handle_command(self, config: Config) -> Result<Verdict, SchemaHealError> {
        let config = config.with_db_path(self.db.as_deref());

        // Default to Serve if no command specified
        match self.command.unwrap_or(Command::Serve) {
            Command::Reconcile => Self::reconcile(&config),
            Command::Validate { json } => Self::validate(&config, json),
            Command::Init => Self::init(&config),
            Command::Serve => Self::start_server(config),
            Command::Config => Self::print_config(&config),
        }
    }

    fn open_database(config: &Config) -> Result<Database, SchemaHealError> {
        Database::open(
            Path::new(&config.database.path),
            config.database.busy_timeout(),
        )
    }

    fn reconcile(config: &Config) -> Result<Verdict, SchemaHealError> {
        let result =
            server::reconcile_database(&config.database, Arc::new(AtomicBool::new(false)));
        println!("{}", result.report_text);

        Ok(if result.success {
            Verdict::Clean
        } else {
            Verdict::Dirty
        })
    }

    fn validate(config: &Config, json: bool) -> Result<Verdict, SchemaHealError> {
        let db = Self::open_database(config)?;
        let report = Reconciler::new(schema::builtin()).validate(&db)?;

        if json {
            let out = serde_json::to_string_pretty(&report.entries)
                .map_err(|e| SchemaHealError::Error(format!("Failed to encode report: {}", e)))?;
            println!("{}", out);
        } else {
            println!("{}", report.report_text);
        }

        Ok(if report.in_sync {
            Verdict::Clean
        } else {
            Verdict::Dirty
        })
    }

    fn init(config: &Config) -> Result<Verdict, SchemaHealError> {
        let db = Self::open_database(config)?;
        let created = schema::create_missing_tables(&db, schema::builtin())?;
        if created.is_empty() {
            println!("All tables present");
        } else {
            println!("Created tables: [{}]", created.join(", "));
        }

        let result = Reconciler::new(schema::builtin()).reconcile(&db);
        println!("{}", result.report_text);

        Ok(if result.success {
            Verdict::Clean
        } else {
            Verdict::Dirty
        })
    }

    fn start_server(config: Config) -> Result<Verdict, SchemaHealError> {
        info!(
            "Starting server on {}:{}",
            config.server.host, config.server.port
        );

        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| SchemaHealError::Error(format!("Failed to create runtime: {}", e)))?;

        rt.block_on(async {
            let web_server = server::WebServer::new(config);
            web_server.start().await
        })?;

        Ok(Verdict::Clean)
    }

    fn print_config(config: &Config) -> Result<Verdict, SchemaHealError> {
        let out = toml::to_string_pretty(config)
            .map_err(|e| SchemaHealError::Error(format!("Failed to encode config: {}", e)))?;
        print!("{}", out);
        Ok(Verdict::Clean)
    }
}
