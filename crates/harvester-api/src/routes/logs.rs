use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use harvester_tracker::{RunStatus, RunTracker};

use crate::error::ApiError;
use crate::state::AppState;
use crate::validate::{safe_join, validate_retailer};

#[derive(Deserialize)]
pub struct LogsQuery {
    tail: Option<usize>,
    offset: Option<usize>,
}

#[derive(Serialize)]
pub struct LogsResponse {
    content: String,
    lines: usize,
    total_lines: usize,
    is_active: bool,
}

const DEFAULT_TAIL_LINES: usize = 200;

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path((retailer, run_id)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.log_rate_limiter.check(addr.ip()) {
        return Err(ApiError::TooManyRequests);
    }

    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    validate_retailer(&retailer, &known)?;

    let logs_dir = state.data_dir().join(&retailer).join("logs");
    let log_file = format!("{run_id}.log");
    let path = safe_join(&logs_dir, &log_file)?;

    let raw = std::fs::read_to_string(&path)
        .map_err(|_| ApiError::NotFound(format!("no log found for {retailer}/{run_id}")))?;

    let all_lines: Vec<&str> = raw.lines().collect();
    let total_lines = all_lines.len();

    let content = if let Some(offset) = query.offset {
        raw.get(offset.min(raw.len())..).unwrap_or_default().to_string()
    } else {
        let take = query.tail.unwrap_or(DEFAULT_TAIL_LINES).min(total_lines);
        all_lines[total_lines - take..].join("\n")
    };

    let is_active = RunTracker::load_metadata(state.data_dir(), &retailer, &run_id)
        .map(|m| m.status == RunStatus::Running)
        .unwrap_or(false);

    Ok(Json(LogsResponse {
        lines: content.lines().count(),
        content,
        total_lines,
        is_active,
    }))
}
