use std::path::{Path, PathBuf};

use async_trait::async_trait;
use initializer::{Context, Initialize, UnitResult};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, ServerError};
use crate::{CONFIG, STARTUP};

const DEFAULT_CONFIG_FILE: &str = "stex.toml";

/// Application configuration, installed on the context as [`CONFIG`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name reported by the health endpoint and attached to log records
    pub app_name: String,
    /// `EnvFilter` directive, e.g. "info" or "server=debug,sqlx=warn"
    pub log_level: String,
    /// Log output target: "console", "humanizer" or "compact"
    pub log_target: String,
    pub database_url: String,
    /// Directory of sqlx migrations; skipped when it does not exist
    pub migrations_dir: PathBuf,
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "stex".to_string(),
            log_level: "info".to_string(),
            log_target: "humanizer".to_string(),
            database_url: "sqlite:stex.db".to_string(),
            migrations_dir: PathBuf::from("migrations"),
            bind_addr: "0.0.0.0:3001".to_string(),
        }
    }
}

impl AppConfig {
    /// Read config from a TOML file; a missing file yields the defaults.
    pub async fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ServerError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;

        let config = toml::from_str(&content).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Config loaded successfully");
        Ok(config)
    }

    /// Override fields from `STEX_*` variables looked up through `var`.
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = var("STEX_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(target) = var("STEX_LOG_TARGET") {
            self.log_target = target;
        }
        if let Some(url) = var("STEX_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(addr) = var("STEX_BIND_ADDR") {
            self.bind_addr = addr;
        }
        self
    }

    /// Read `path` (or `stex.toml`) and apply environment overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = Self::read(path).await?;
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }
}

/// Where the `config` initializer gets its configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Load from a file (default `stex.toml`) plus environment overrides
    File(Option<PathBuf>),
    /// Use an already built configuration as is
    Value(AppConfig),
}

/// Installs [`AppConfig`] as the `config` capability.
pub struct ConfigInitializer {
    source: ConfigSource,
}

impl ConfigInitializer {
    pub fn new(source: ConfigSource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Initialize for ConfigInitializer {
    fn phase(&self) -> &str {
        STARTUP
    }

    fn name(&self) -> &str {
        "config"
    }

    async fn run(&self, ctx: &mut Context) -> UnitResult {
        let config = match &self.source {
            ConfigSource::File(path) => AppConfig::load(path.as_deref()).await?,
            ConfigSource::Value(config) => config.clone(),
        };
        ctx.insert(CONFIG, config)?;
        Ok(())
    }
}
