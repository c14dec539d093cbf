use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use harvester_tracker::RunTracker;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validate::validate_retailer;

#[derive(Deserialize)]
pub struct RunsQuery {
    limit: Option<usize>,
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(retailer): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    validate_retailer(&retailer, &known)?;

    let mut runs = RunTracker::list_runs(state.data_dir(), &retailer);
    runs.reverse();
    if let Some(limit) = query.limit {
        runs.truncate(limit);
    }
    Ok(Json(runs))
}
