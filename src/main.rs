mod cli;
mod config;
mod db;
mod error;
mod reconcile;
mod schema;
mod server;

use cli::{Cli, Verdict};
use config::{Config, LoggingConfig};
use error::SchemaHealError;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

fn setup_logging(config: &LoggingConfig) -> Result<LoggerHandle, SchemaHealError> {
    let logger = Logger::try_with_str(config.log_spec())
        .map_err(|e| SchemaHealError::Error(format!("Invalid log spec: {}", e)))?;

    let logger = if config.directory.trim().is_empty() {
        logger.log_to_stderr()
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .directory(config.directory.trim())
                    .basename("schemaheal"),
            )
            .rotate(
                Criterion::Size(10 * 1024 * 1024),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(7),
            )
            .duplicate_to_stderr(Duplicate::Warn)
    };

    logger
        .start()
        .map_err(|e| SchemaHealError::Error(format!("Failed to start logger: {}", e)))
}

fn main() {
    let cli = Cli::parse_args();
    let config = Config::init(cli.config_path().as_deref());

    // The handle must outlive every log call
    let _logger = match setup_logging(&config.logging) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("{}", err);
            None
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    match cli.handle_command(config.clone()) {
        Ok(Verdict::Clean) => {}
        Ok(Verdict::Dirty) => std::process::exit(1),
        Err(err) => {
            error!("{:?}", err);
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}
