use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use harvester_common::config::parse_and_validate;
use harvester_common::Config;

mod csrf;
mod error;
mod mutating;
mod rate_limit;
mod routes;
mod state;
mod validate;

use state::AppState;

async fn csrf_token(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({"csrf_token": state.csrf.issue()}))
}

async fn health() -> &'static str {
    "ok"
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/csrf-token", get(csrf_token))
        .route("/api/status", get(routes::status::global_status))
        .route("/api/status/{retailer}", get(routes::status::single_status))
        .route("/api/scraper/start", post(routes::scraper::start))
        .route("/api/scraper/stop", post(routes::scraper::stop))
        .route("/api/scraper/restart", post(routes::scraper::restart))
        .route("/api/runs/{retailer}", get(routes::runs::list_runs))
        .route("/api/logs/{retailer}/{run_id}", get(routes::logs::get_logs))
        .route("/api/config", get(routes::config::get_config).post(routes::config::save_config))
        .route("/api/export/{retailer}/{format}", get(routes::export::export_one))
        .route("/api/export/multi", post(routes::export::export_multi))
        .with_state(state)
        .layer(if cfg!(debug_assertions) {
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-csrf-token")])
        } else {
            let origins: Vec<HeaderValue> = std::env::var("CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            tower_http::cors::CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-csrf-token")])
        })
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    harvester_common::logging::init_logging(false);

    let global = Config::from_env();
    global.log_redacted();

    let config_path = std::env::var("RETAILERS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/retailers.yaml"));
    let yaml = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let retailers = parse_and_validate(&yaml).map_err(|errs| anyhow::anyhow!(errs.join("; ")))?;

    let host = global.web_host.clone();
    let port = global.web_port;
    let state = Arc::new(AppState::new(global, config_path, retailers));
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    info!("harvester API starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
