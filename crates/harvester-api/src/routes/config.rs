use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;

use harvester_common::config::parse_and_validate;

use crate::error::ApiError;
use crate::mutating::{require_csrf, require_json_content_type};
use crate::state::AppState;

pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let retailers = state.retailers.read().await;
    Json(serde_json::to_value(&*retailers).unwrap_or(serde_json::Value::Null))
}

#[derive(Deserialize)]
pub struct SaveConfigRequest {
    content: String,
}

/// (1) parse (2) validate (3) backup (4) temp write (5) atomic rename (6)
/// reload the in-memory retailers table (spec §4.9). Any failed step
/// leaves the active file untouched.
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SaveConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_json_content_type(&headers)?;
    require_csrf(&state, &headers)?;

    let parsed = parse_and_validate(&body.content).map_err(ApiError::validation)?;

    let backups_dir = state.config_path.parent().unwrap_or_else(|| std::path::Path::new(".")).join("backups");
    std::fs::create_dir_all(&backups_dir).map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Ok(existing) = std::fs::read_to_string(&state.config_path) {
        let backup_path = backups_dir.join(format!("retailers-{}.yaml", Utc::now().format("%Y%m%dT%H%M%S")));
        std::fs::write(&backup_path, existing).map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    let tmp_path = state.config_path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &body.content).map_err(|e| ApiError::Internal(e.to_string()))?;
    std::fs::rename(&tmp_path, &state.config_path).map_err(|e| ApiError::Internal(e.to_string()))?;

    *state.retailers.write().await = parsed;

    Ok(Json(serde_json::json!({"status": "saved"})))
}
