use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to read config {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid logging target: {0:?}")]
    InvalidLogTarget(String),

    #[error("Invalid log level {level:?}: {reason}")]
    InvalidLogLevel { level: String, reason: String },

    #[error("Failed to connect to syslog")]
    Syslog(#[source] std::io::Error),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
