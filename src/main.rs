use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use wargames_backend::agent::AgentServiceClient;
use wargames_backend::lock::SessionLocks;
use wargames_backend::rate_limit::RateLimiter;
use wargames_backend::session::SessionController;
use wargames_backend::{api, config, db, metrics};

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "wargames-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = config::Config::load();
    config::set_local_mode(config.local_mode);
    metrics::register_metrics();

    let db = db::Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    if config.local_mode {
        // Offline development: a fixed identity plus demo fixtures
        db.ensure_user(config::LOCAL_SUBJECT)
            .await
            .expect("Failed to create local user");
        db.seed_local_fixtures()
            .await
            .expect("Failed to seed local fixtures");
        tracing::info!("Local mode: authentication relaxed, demo fixtures seeded");
    }

    let gateway = Arc::new(AgentServiceClient::new(
        &config.agent_service_url,
        config.agent_service_token.clone(),
        &config.agent_model,
        config.agent_timeout,
    ));
    let locks = SessionLocks::new(db.clone(), config.lock_wait_timeout, config.lease_ttl);
    let sessions = SessionController::new(db.clone(), gateway, locks);
    let rate_limiter = RateLimiter::new();

    // Inject Arc<Database> into request extensions so the auth extractor
    // can resolve token subjects to user rows without touching AppState.
    let db_for_ext = db.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(api::router(db, sessions, rate_limiter))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(api::track_metrics))
        .layer(axum::middleware::from_fn(
            move |mut req: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| {
                let db = db_for_ext.clone();
                async move {
                    req.extensions_mut().insert(db);
                    next.run(req).await
                }
            },
        ));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Wargames backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
