use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Serialize;

use harvester_tracker::RunTracker;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validate::validate_retailer;

#[derive(Serialize)]
pub struct RetailerStatus {
    retailer: String,
    enabled: bool,
    live: bool,
    latest_run: Option<harvester_tracker::RunMetadata>,
}

async fn retailer_status(state: &AppState, key: &str) -> Option<RetailerStatus> {
    let retailers = state.retailers.read().await;
    let cfg = retailers.retailers.get(key)?;
    let latest_run = RunTracker::list_runs(state.data_dir(), key).into_iter().last();
    let live = state.manager.status(key).await.map(|s| s.alive).unwrap_or(false);
    Some(RetailerStatus {
        retailer: key.to_string(),
        enabled: cfg.enabled,
        live,
        latest_run,
    })
}

pub async fn global_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let keys: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    let mut statuses = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(s) = retailer_status(&state, &key).await {
            statuses.push(s);
        }
    }
    Json(statuses)
}

pub async fn single_status(
    State(state): State<Arc<AppState>>,
    Path(retailer): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    validate_retailer(&retailer, &known)?;
    let status = retailer_status(&state, &retailer)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("unknown retailer: {retailer}")))?;
    Ok(Json(status))
}
