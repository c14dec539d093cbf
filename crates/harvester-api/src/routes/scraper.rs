use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use harvester_common::{Config, ProxyMode, RetailerConfig};
use harvester_manager::TaskSupervisor;
use harvester_orchestrator::CliOverrides;

use crate::error::ApiError;
use crate::mutating::{require_csrf, require_json_content_type};
use crate::state::AppState;
use crate::validate::validate_retailer;

#[derive(Deserialize)]
pub struct StartRequest {
    retailer: String,
    #[serde(default)]
    resume: bool,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    test: bool,
    #[serde(default)]
    proxy: Option<ProxyMode>,
    #[serde(default)]
    render_js: bool,
    #[serde(default)]
    proxy_country: Option<String>,
}

#[derive(Deserialize)]
pub struct StopRequest {
    retailer: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Deserialize)]
pub struct RestartRequest {
    retailer: String,
    #[serde(default)]
    resume: bool,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    proxy: Option<ProxyMode>,
}

fn spawn_run(
    state: Arc<AppState>,
    retailer: String,
    cfg: RetailerConfig,
    overrides: CliOverrides,
    run_id: String,
) -> TaskSupervisor {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(async move {
        let global: Config = state.global.clone();
        let data_dir = state.data_dir();
        match harvester_orchestrator::run_retailer(&global, &data_dir, &retailer, &cfg, &overrides, Some(run_id)).await {
            Ok(summary) => info!(retailer = %summary.retailer, status = ?summary.status, "API-triggered run finished"),
            Err(e) => error!(retailer = %retailer, error = %e, "API-triggered run failed fatally"),
        }
    });
    TaskSupervisor::new(handle, cancel)
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_json_content_type(&headers)?;
    require_csrf(&state, &headers)?;

    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    validate_retailer(&body.retailer, &known)?;

    let cfg = {
        let retailers = state.retailers.read().await;
        retailers.retailers.get(&body.retailer).cloned().expect("validated above")
    };

    let mode = body.proxy.unwrap_or(cfg.proxy_mode);
    Config::validate_render_js(body.render_js, mode).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let overrides = CliOverrides {
        resume: body.resume,
        limit: if body.test { Some(10) } else { body.limit },
        test_mode: body.test,
        proxy: body.proxy,
        render_js: body.render_js,
        proxy_country: body.proxy_country,
        ..CliOverrides::default()
    };

    let run_id = harvester_tracker::generate_run_id(&body.retailer, chrono::Utc::now());
    let supervised = spawn_run(state.clone(), body.retailer.clone(), cfg, overrides, run_id.clone());
    state
        .manager
        .start(&body.retailer, &run_id, Box::new(supervised))
        .await
        .map_err(|_| ApiError::Conflict(format!("{} already has a run in progress", body.retailer)))?;

    Ok(Json(serde_json::json!({"status": "started", "retailer": body.retailer, "run_id": run_id})))
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StopRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_json_content_type(&headers)?;
    require_csrf(&state, &headers)?;

    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    validate_retailer(&body.retailer, &known)?;

    let timeout = Duration::from_secs(body.timeout.unwrap_or(30));
    let stop_fut = state.manager.stop(&body.retailer);
    match tokio::time::timeout(timeout, stop_fut).await {
        Ok(Ok(())) => Ok(Json(serde_json::json!({"status": "stopped", "retailer": body.retailer}))),
        Ok(Err(_)) => Err(ApiError::NotFound(format!("no run registered for {}", body.retailer))),
        Err(_) => Ok(Json(serde_json::json!({"status": "stop_timed_out", "retailer": body.retailer}))),
    }
}

pub async fn restart(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RestartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_json_content_type(&headers)?;
    require_csrf(&state, &headers)?;

    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    validate_retailer(&body.retailer, &known)?;

    let cfg = {
        let retailers = state.retailers.read().await;
        retailers.retailers.get(&body.retailer).cloned().expect("validated above")
    };

    let overrides = CliOverrides {
        resume: body.resume,
        limit: None,
        test_mode: false,
        proxy: body.proxy,
        render_js: false,
        proxy_country: None,
        ..CliOverrides::default()
    };

    let run_id = harvester_tracker::generate_run_id(&body.retailer, chrono::Utc::now());
    let supervised = spawn_run(state.clone(), body.retailer.clone(), cfg, overrides, run_id.clone());
    state
        .manager
        .restart(&body.retailer, &run_id, Box::new(supervised))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({"status": "restarted", "retailer": body.retailer, "run_id": run_id})))
}
