pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod github;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod runtime;
pub mod services;
pub mod telemetry;
pub mod webhooks;
pub mod workers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use sqlx::{Pool, Postgres};

use crate::config::Config;
use crate::engine::ContainerEngine;
use crate::error::{ApiError, ApiResult};
use crate::queue::Queue;

#[derive(Clone)]
pub struct AppState {
    pub db: Option<Pool<Postgres>>,
    pub queue: Option<Queue>,
    pub engine: Option<Arc<dyn ContainerEngine>>,
    pub sealer: seal::Sealer,
    pub cfg: Arc<Config>,
}

impl AppState {
    pub fn pool(&self) -> ApiResult<&Pool<Postgres>> {
        self.db.as_ref().ok_or_else(ApiError::service_unavailable)
    }

    pub fn broker(&self) -> ApiResult<&Queue> {
        self.queue.as_ref().ok_or_else(ApiError::service_unavailable)
    }

    pub fn engine(&self) -> ApiResult<&Arc<dyn ContainerEngine>> {
        self.engine.as_ref().ok_or_else(ApiError::service_unavailable)
    }

    /// State with no external services attached, for router tests.
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        let cfg = Config::for_tests();
        let sealer = seal::Sealer::new(cfg.encryption_key.as_bytes()).expect("test key");
        Self { db: None, queue: None, engine: None, sealer, cfg: Arc::new(cfg) }
    }
}

pub fn build_router(state: AppState) -> Router {
    use handlers::{auth as auth_handlers, deployments, env_vars, health, projects, webhooks};

    let session_gated = Router::new()
        .route("/api/auth/logout", post(auth_handlers::logout))
        .route("/api/auth/me", get(auth_handlers::me))
        .route("/api/repos", get(projects::list_repos))
        .route("/api/projects", get(projects::list_projects).post(projects::create_project))
        .route(
            "/api/projects/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/api/projects/:id/env", get(env_vars::list_env_vars).post(env_vars::upsert_env_var))
        .route("/api/projects/:id/env/:key", delete(env_vars::delete_env_var))
        .route("/api/projects/:id/deployments", get(deployments::list_deployments))
        .route("/api/deployments/:id", get(deployments::get_deployment))
        .route("/api/deployments/:id/cancel", post(deployments::cancel_deployment))
        .route("/api/deployments/:id/redeploy", post(deployments::redeploy_deployment))
        .route("/api/deployments/:id/logs", get(deployments::deployment_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_session));

    Router::new()
        .route("/health", get(health::health))
        .route("/readyz", get(health::readiness))
        .route("/metrics", get(telemetry::metrics_handler))
        .route("/api/auth/github", get(auth_handlers::github_login))
        .route("/api/auth/github/callback", get(auth_handlers::github_callback))
        .route("/api/webhooks/github", post(webhooks::github_webhook))
        .merge(session_gated)
        .with_state(state)
}
