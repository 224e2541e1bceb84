//! Binary entrypoint for the rcnbuild control plane.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, middleware::{self, Next}, response::Response};
use control_plane::config::Config;
use control_plane::engine::DockerEngine;
use control_plane::queue::Queue;
use control_plane::telemetry::{normalize_path, HTTP_REQUESTS, HTTP_REQUEST_DURATION};
use control_plane::workers::{self, WorkerContext};
use control_plane::{build_router, db::init_db, AppState};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let cfg = Arc::new(Config::from_env()?);
    let sealer = seal::Sealer::new(cfg.encryption_key.as_bytes())
        .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY unusable: {e}"))?;

    let db_pool = init_db(&cfg.database_url).await?;
    let queue = Queue::connect(&cfg.redis_url)?;

    // The API stays up without Docker; the pipeline does not.
    match DockerEngine::connect().await {
        Ok(engine) => {
            let engine: Arc<dyn control_plane::engine::ContainerEngine> = Arc::new(engine);
            workers::spawn_all(WorkerContext {
                db: db_pool.clone(),
                queue: queue.clone(),
                engine: engine.clone(),
                sealer: sealer.clone(),
                cfg: cfg.clone(),
            });
            let state = AppState {
                db: Some(db_pool),
                queue: Some(queue),
                engine: Some(engine),
                sealer,
                cfg: cfg.clone(),
            };
            serve(state).await
        }
        Err(e) => {
            warn!(error = %e, "container engine unavailable, running API only");
            let state = AppState {
                db: Some(db_pool),
                queue: Some(queue),
                engine: None,
                sealer,
                cfg: cfg.clone(),
            };
            serve(state).await
        }
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let port = state.cfg.api_port;
    let app = build_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(track_metrics));

    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "control plane listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("shutdown complete");
    Ok(())
}

async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path_label = normalize_path(req.uri().path());
    let start = std::time::Instant::now();
    let resp = next.run(req).await;
    let status = resp.status().as_u16().to_string();
    HTTP_REQUESTS
        .with_label_values(&[method.as_str(), path_label.as_str(), status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), path_label.as_str()])
        .observe(start.elapsed().as_secs_f64());
    resp
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    // graceful drain window
    tokio::time::sleep(Duration::from_millis(200)).await;
}
