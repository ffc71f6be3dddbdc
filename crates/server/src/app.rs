use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use axum::Router;
use initializer::{Context, InitError, Initializer, InitializerConfig, PhaseReport};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::{AppConfig, ConfigSource};
use crate::http::HttpApp;
use crate::{register_defaults, CONFIG, DB, HTTP, STARTUP};

/// A bootstrapped application: the initializer that builds it and the
/// context holding everything it built.
#[derive(Debug)]
pub struct App {
    initializer: Initializer,
    context: Context,
}

impl App {
    /// Application loading its configuration from `config_path` (or `stex.toml`).
    pub fn new(config_path: Option<PathBuf>) -> initializer::Result<Self> {
        Self::from_source(ConfigSource::File(config_path), InitializerConfig::default())
    }

    /// Application using `config` as is.
    pub fn with_config(config: AppConfig) -> initializer::Result<Self> {
        Self::from_source(ConfigSource::Value(config), InitializerConfig::default())
    }

    pub fn from_source(source: ConfigSource, config: InitializerConfig) -> initializer::Result<Self> {
        let mut initializer = Initializer::with_config(config);
        register_defaults(&mut initializer, source)?;
        Ok(Self {
            initializer,
            context: Context::new(),
        })
    }

    /// Register further units before [`App::init`].
    pub fn initializer_mut(&mut self) -> &mut Initializer {
        &mut self.initializer
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Resolved order of every registered phase, without running anything.
    pub fn plan(&self) -> initializer::Result<Vec<(String, Vec<String>)>> {
        self.initializer
            .registry()
            .phases()
            .iter()
            .map(|phase| Ok((phase.clone(), self.initializer.resolve(phase)?)))
            .collect()
    }

    /// Run the `startup` phase.
    pub async fn init(&mut self) -> Result<PhaseReport, InitError> {
        self.initializer.run(STARTUP, &mut self.context).await
    }

    /// Serve the bootstrapped router until ctrl-c, then shut down.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let config = self.context.get::<AppConfig>(CONFIG)?;
        let router: Router = self.context.get::<HttpApp>(HTTP)?.router().clone();

        let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str())
            .await
            .with_context(|| format!("binding {}", config.bind_addr))?;
        info!(app = %config.app_name, "Server listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Release what bootstrap acquired.
    pub async fn shutdown(&self) {
        if let Ok(pool) = self.context.get::<SqlitePool>(DB) {
            pool.close().await;
            info!("Database pool closed");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
