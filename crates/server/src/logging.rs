//! Logging setup and HTTP request logging.
//!
//! The `logging` initializer installs the global `tracing` subscriber with
//! the output target chosen by configuration and publishes the process-wide
//! [`LogFields`]. The `request-logging` initializer wraps the HTTP router so
//! every request and response is logged inside a span carrying those fields
//! and the request id.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use initializer::{Completion, Context, Initialize, UnitResult};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{Result, ServerError};
use crate::http::HttpApp;
use crate::{CONFIG, HTTP, LOG, STARTUP};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// JSON lines on stdout
    Console,
    /// Multi-line human readable output
    Humanizer,
    /// Single-line text output
    Compact,
    /// JSON records sent to the local syslog daemon
    Syslog,
}

impl FromStr for LogTarget {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "console" => Ok(LogTarget::Console),
            "humanizer" => Ok(LogTarget::Humanizer),
            "compact" => Ok(LogTarget::Compact),
            "syslog" => Ok(LogTarget::Syslog),
            other => Err(ServerError::InvalidLogTarget(other.to_string())),
        }
    }
}

/// Fields attached to every request span, installed as the `log` capability.
#[derive(Debug, Clone)]
pub struct LogFields {
    pub app_name: String,
    pub hostname: String,
    /// Unique per process, ties together all records of one run
    pub log_id: Uuid,
    pub version: &'static str,
}

impl LogFields {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            hostname: hostname(),
            log_id: Uuid::new_v4(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

fn hostname() -> String {
    let name = gethostname::gethostname().to_string_lossy().into_owned();
    if name.is_empty() {
        "localhost".to_string()
    } else {
        name
    }
}

/// Install the global subscriber. `identity` tags syslog records.
///
/// Returns `false` when a global subscriber was already installed, which
/// happens when several applications boot in one process (tests).
pub fn init_tracing(level: &str, target: LogTarget, identity: &str) -> Result<bool> {
    let filter = EnvFilter::try_new(level).map_err(|e| ServerError::InvalidLogLevel {
        level: level.to_string(),
        reason: e.to_string(),
    })?;

    let output: Box<dyn Layer<Registry> + Send + Sync> = match target {
        LogTarget::Console => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogTarget::Humanizer => fmt::layer().pretty().boxed(),
        LogTarget::Compact => fmt::layer().compact().boxed(),
        LogTarget::Syslog => syslog_layer(identity)?,
    };

    Ok(tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .is_ok())
}

#[cfg(unix)]
fn syslog_layer(identity: &str) -> Result<Box<dyn Layer<Registry> + Send + Sync>> {
    let syslog = crate::syslog::Syslog::connect(identity).map_err(ServerError::Syslog)?;
    Ok(fmt::layer()
        .json()
        .with_ansi(false)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(syslog)
        .boxed())
}

#[cfg(not(unix))]
fn syslog_layer(_identity: &str) -> Result<Box<dyn Layer<Registry> + Send + Sync>> {
    Err(ServerError::Syslog(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "syslog needs a unix socket",
    )))
}

/// Configures tracing from [`AppConfig`] and installs [`LogFields`].
pub struct LoggingInitializer;

#[async_trait]
impl Initialize for LoggingInitializer {
    fn phase(&self) -> &str {
        STARTUP
    }

    fn name(&self) -> &str {
        "logging"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["config".to_string()]
    }

    async fn run(&self, ctx: &mut Context) -> UnitResult {
        let config = ctx.get::<AppConfig>(CONFIG)?;
        let target: LogTarget = config.log_target.parse()?;

        if !init_tracing(&config.log_level, target, &config.app_name)? {
            warn!("Global subscriber already installed, keeping it");
        }

        let fields = LogFields::new(config.app_name.clone());
        info!(
            hostname = %fields.hostname,
            log_id = %fields.log_id,
            version = fields.version,
            target = ?target,
            "Logging initialized"
        );

        ctx.insert(LOG, fields)?;
        Ok(())
    }
}

/// Work of the `request-logging` unit: wrap the router with request ids and
/// request/response logging.
pub fn install_request_logging(ctx: &mut Context) -> Completion<'_> {
    Completion::ready(wrap_router(ctx))
}

fn wrap_router(ctx: &mut Context) -> UnitResult {
    let fields = Arc::new(ctx.get::<LogFields>(LOG)?.clone());

    ctx.get_mut::<HttpApp>(HTTP)?.map(|router| {
        router
            .layer(middleware::from_fn_with_state(fields, log_requests))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    });
    Ok(())
}

async fn log_requests(State(fields): State<Arc<LogFields>>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let span = info_span!(
        "request",
        request_id = %request_id,
        app = %fields.app_name,
        hostname = %fields.hostname,
        log_id = %fields.log_id,
        version = fields.version,
    );

    async move {
        info!(
            path = %req.uri().path(),
            method = %req.method(),
            ip = ip.as_deref().unwrap_or("unknown"),
            "HTTP request"
        );

        let response = next.run(req).await;

        info!(
            status = response.status().as_u16(),
            duration = started.elapsed().as_secs_f64() * 1000.0,
            "HTTP response"
        );
        response
    }
    .instrument(span)
    .await
}
