use clap::{Parser, Subcommand};
use serde::Deserialize;

use staydb_core::{BackendKind, EntityType, StorageError};

/// Selects the storage backend, read once at startup.
pub const STORAGE_ENV: &str = "STAYDB_STORAGE";
pub const FILE_PATH_ENV: &str = "STAYDB_FILE_PATH";
pub const DB_PATH_ENV: &str = "STAYDB_DB_PATH";

#[derive(Parser, Debug)]
#[command(name = "staydb", about = "StayDB - lodging entities over file or SQLite storage")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "staydb.toml")]
    pub config: String,

    /// Storage backend, `file` or `db` (overrides config file and environment)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Count stored entities, per type or of a single type
    Count { entity_type: Option<EntityType> },
    /// Print every stored entity, optionally of a single type
    List { entity_type: Option<EntityType> },
    /// Print one entity
    Show { entity_type: EntityType, id: String },
    /// Delete one entity and flush
    Delete { entity_type: EntityType, id: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub file: FileConfig,

    #[serde(default)]
    pub sqlite: SqliteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    #[serde(default = "default_file_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_backend() -> String {
    BackendKind::File.to_string()
}

fn default_file_path() -> String {
    staydb_file::DEFAULT_PATH.to_string()
}

fn default_db_path() -> String {
    staydb_sqlite::DEFAULT_PATH.to_string()
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: default_backend(),
            file: FileConfig::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            path: default_file_path(),
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfig {
            path: default_db_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            logging: default_logging(),
        }
    }
}

impl StorageConfig {
    pub fn backend_kind(&self) -> Result<BackendKind, StorageError> {
        self.backend.parse()
    }
}

impl Config {
    /// Config file, then environment, then CLI flags.
    pub fn load(cli: &CliArgs) -> Self {
        Self::load_with_env(cli, |name| std::env::var(name).ok())
    }

    pub fn load_with_env(cli: &CliArgs, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // Environment overrides
        if let Some(backend) = env(STORAGE_ENV) {
            config.storage.backend = backend;
        }
        if let Some(path) = env(FILE_PATH_ENV) {
            config.storage.file.path = path;
        }
        if let Some(path) = env(DB_PATH_ENV) {
            config.storage.sqlite.path = path;
        }

        // CLI overrides
        if let Some(ref backend) = cli.backend {
            config.storage.backend = backend.clone();
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config
    }
}
