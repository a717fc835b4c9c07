use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::db::Database;

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    const PATH: &str = "schemaheal.db";
    const BUSY_TIMEOUT_MS: u64 = Database::DEFAULT_BUSY_TIMEOUT.as_millis() as u64;

    fn default() -> Self {
        DatabaseConfig {
            path: Self::PATH.to_owned(),
            busy_timeout_ms: Self::BUSY_TIMEOUT_MS,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn ensure_valid(&mut self) {
        if self.path.trim().is_empty() {
            eprintln!(
                "Config error: database path is empty - using default of '{}'",
                Self::PATH
            );
            self.path = Self::PATH.to_owned();
        }
        if self.busy_timeout_ms == 0 {
            eprintln!(
                "Config error: busy_timeout_ms of 0 is invalid - using default of {}",
                Self::BUSY_TIMEOUT_MS
            );
            self.busy_timeout_ms = Self::BUSY_TIMEOUT_MS;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub schemaheal: String,
    /// Directory for log files. Empty logs to stderr only.
    pub directory: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const SCHEMAHEAL_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            schemaheal: Self::SCHEMAHEAL_LEVEL.to_string(),
            directory: String::new(),
        }
    }

    /// flexi_logger spec string, e.g. `schemaheal=info`
    pub fn log_spec(&self) -> String {
        format!("schemaheal={}", self.schemaheal)
    }

    fn ensure_valid(&mut self) {
        let str_original = self.schemaheal.clone();
        self.schemaheal = self.schemaheal.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.schemaheal.as_str()) {
            eprintln!(
                "Config error: schemaheal log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::SCHEMAHEAL_LEVEL
            );
            self.schemaheal = Self::SCHEMAHEAL_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    pub timeout_secs: u64,
}

impl ReconcileConfig {
    const TIMEOUT_SECS: u64 = 120;

    fn default() -> Self {
        ReconcileConfig {
            timeout_secs: Self::TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn ensure_valid(&mut self) {
        if self.timeout_secs == 0 {
            eprintln!(
                "Config error: reconcile timeout of 0 is invalid - using default of {}s",
                Self::TIMEOUT_SECS
            );
            self.timeout_secs = Self::TIMEOUT_SECS;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Config {
    const ENV_PREFIX: &str = "SCHEMAHEAL_";

    /// `config.toml` in the platform config directory, if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "schemaheal").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Defaults, then the TOML file (if it exists), then `SCHEMAHEAL_*` env vars.
    /// Nested keys use a double underscore: `SCHEMAHEAL_SERVER__PORT=9000`.
    ///
    /// On a parse error the defaults are used. Nothing is ever written to disk.
    pub fn load(config_path: Option<&Path>) -> Self {
        let default_config = Config::default();

        let mut figment = Figment::from(Serialized::defaults(default_config.clone()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load configuration: {}. Using default configuration.",
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    /// Load once for the process. Later calls return the first result.
    pub fn init(config_path: Option<&Path>) -> &'static Config {
        CONFIG.get_or_init(|| Self::load(config_path))
    }

    /// Apply command-line overrides on top of a loaded config.
    pub fn with_db_path(mut self, path: Option<&str>) -> Self {
        if let Some(path) = path {
            self.database.path = path.to_owned();
        }
        self
    }

    fn ensure_valid(&mut self) {
        self.database.ensure_valid();
        self.logging.ensure_valid();
        self.reconcile.ensure_valid();
    }
}
