use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use initializer::{Completion, Context, UnitResult};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::{CONFIG, HTTP};

/// The application's router, installed as the `http` capability.
///
/// Later units add middleware through [`HttpApp::map`]; the application
/// serves [`HttpApp::router`] once bootstrap completes.
#[derive(Debug, Clone)]
pub struct HttpApp {
    router: Router,
}

impl HttpApp {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn map(&mut self, f: impl FnOnce(Router) -> Router) {
        let router = std::mem::replace(&mut self.router, Router::new());
        self.router = f(router);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: String,
    app: String,
    version: String,
}

async fn health_check(State(app): State<String>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        app,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn create_router(config: &AppConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(config.app_name.clone())
}

/// Work of the `http` unit.
pub fn install_http(ctx: &mut Context) -> Completion<'_> {
    Completion::ready(build(ctx))
}

fn build(ctx: &mut Context) -> UnitResult {
    let router = create_router(ctx.get::<AppConfig>(CONFIG)?);
    ctx.insert(HTTP, HttpApp::new(router))?;
    Ok(())
}
