//! The stex application shell.
//!
//! Registers the built-in startup initializers against an
//! [`initializer::Initializer`] and serves the HTTP application they build.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
#[cfg(unix)]
pub mod syslog;

use initializer::Initializer;

pub use app::App;
pub use config::{AppConfig, ConfigSource};
pub use error::{Result, ServerError};

/// Phase holding every built-in initializer.
pub const STARTUP: &str = "startup";

/// Capability names.
pub const CONFIG: &str = "config";
pub const LOG: &str = "log";
pub const DB: &str = "db";
pub const HTTP: &str = "http";

/// Register the built-in `startup` initializers.
pub fn register_defaults(init: &mut Initializer, source: ConfigSource) -> initializer::Result<()> {
    init.install(config::ConfigInitializer::new(source))?;
    init.install(logging::LoggingInitializer)?;
    init.install(db::DatabaseInitializer)?;
    init.install(db::MigrateInitializer)?;
    init.add(STARTUP, "http", ["config"], http::install_http)?;
    init.add(
        STARTUP,
        "request-logging",
        ["http", "logging"],
        logging::install_request_logging,
    )?;
    Ok(())
}
