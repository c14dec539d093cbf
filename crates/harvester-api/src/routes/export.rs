//! Store export in the formats named by spec §6. `csv` is hand-rolled (no
//! csv crate in the workspace); `xlsx` has no real crate anywhere in this
//! corpus so it is rejected rather than faked.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use harvester_common::Store;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validate::validate_retailer;

fn load_stores(state: &AppState, retailer: &str) -> Result<Vec<Store>, ApiError> {
    let path = harvester_orchestrator::stores_latest_path(&state.data_dir(), retailer);
    let raw = std::fs::read_to_string(&path)
        .map_err(|_| ApiError::NotFound(format!("no exported stores for {retailer}")))?;
    serde_json::from_str(&raw).map_err(|e| ApiError::Internal(e.to_string()))
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn stores_to_csv(stores: &[Store]) -> String {
    let mut out = String::from("store_id,name,street_address,city,state,postal_code,country,latitude,longitude,phone,url\n");
    for s in stores {
        let row = [
            s.store_id.as_str(),
            s.name.as_str(),
            s.street_address.as_str(),
            s.city.as_str(),
            s.state.as_str(),
            s.postal_code.as_str(),
            s.country.as_str(),
            &s.latitude.map(|v| v.to_string()).unwrap_or_default(),
            &s.longitude.map(|v| v.to_string()).unwrap_or_default(),
            s.phone.as_str(),
            s.url.as_str(),
        ];
        out.push_str(&row.iter().map(|f| csv_escape(f)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }
    out
}

fn stores_to_geojson(stores: &[Store]) -> serde_json::Value {
    let features: Vec<serde_json::Value> = stores
        .iter()
        .filter_map(|s| {
            let (lat, lng) = (s.latitude?, s.longitude?);
            Some(serde_json::json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [lng, lat]},
                "properties": {
                    "store_id": s.store_id,
                    "name": s.name,
                    "street_address": s.street_address,
                    "city": s.city,
                    "state": s.state,
                    "postal_code": s.postal_code,
                    "country": s.country,
                    "phone": s.phone,
                    "url": s.url,
                },
            }))
        })
        .collect();
    serde_json::json!({"type": "FeatureCollection", "features": features})
}

fn render(stores: &[Store], format: &str) -> Result<Response, ApiError> {
    match format {
        "json" => Ok(Json(stores).into_response()),
        "csv" => {
            let body = stores_to_csv(stores);
            Ok((
                [(axum::http::header::CONTENT_TYPE, "text/csv")],
                body,
            )
                .into_response())
        }
        "geojson" => Ok(Json(stores_to_geojson(stores)).into_response()),
        "xlsx" => Err(ApiError::bad_request("xlsx export is not supported")),
        other => Err(ApiError::bad_request(format!("unknown export format: {other}"))),
    }
}

pub async fn export_one(
    State(state): State<Arc<AppState>>,
    Path((retailer, format)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    validate_retailer(&retailer, &known)?;
    let stores = load_stores(&state, &retailer)?;
    render(&stores, &format)
}

#[derive(Deserialize)]
pub struct MultiExportRequest {
    retailers: Vec<String>,
    format: String,
    #[serde(default)]
    combine: bool,
}

pub async fn export_multi(
    State(state): State<Arc<AppState>>,
    _headers: HeaderMap,
    Json(body): Json<MultiExportRequest>,
) -> Result<Response, ApiError> {
    let known: Vec<String> = state.retailers.read().await.retailers.keys().cloned().collect();
    for retailer in &body.retailers {
        validate_retailer(retailer, &known)?;
    }

    if body.combine {
        let mut combined = Vec::new();
        for retailer in &body.retailers {
            combined.extend(load_stores(&state, retailer)?);
        }
        return render(&combined, &body.format);
    }

    let mut per_retailer = serde_json::Map::new();
    for retailer in &body.retailers {
        let stores = load_stores(&state, retailer)?;
        let rendered = match body.format.as_str() {
            "json" => serde_json::to_value(&stores).map_err(|e| ApiError::Internal(e.to_string()))?,
            "csv" => serde_json::Value::String(stores_to_csv(&stores)),
            "geojson" => stores_to_geojson(&stores),
            "xlsx" => return Err(ApiError::bad_request("xlsx export is not supported")),
            other => return Err(ApiError::bad_request(format!("unknown export format: {other}"))),
        };
        per_retailer.insert(retailer.clone(), rendered);
    }
    Ok(Json(serde_json::Value::Object(per_retailer)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn sample() -> Vec<Store> {
        vec![Store {
            store_id: "1".into(),
            name: "Acme, Inc.".into(),
            street_address: "1 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            postal_code: "62704".into(),
            country: "US".into(),
            latitude: Some(39.78),
            longitude: Some(-89.65),
            phone: "555-0100".into(),
            url: "https://example.com/1".into(),
            scraped_at: Utc::now(),
            attributes: Map::new(),
        }]
    }

    #[test]
    fn csv_quotes_fields_with_commas() {
        let csv = stores_to_csv(&sample());
        assert!(csv.contains("\"Acme, Inc.\""));
    }

    #[test]
    fn geojson_skips_stores_without_coordinates() {
        let mut stores = sample();
        stores.push(Store { latitude: None, ..stores[0].clone() });
        let geo = stores_to_geojson(&stores);
        assert_eq!(geo["features"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn xlsx_is_rejected() {
        assert!(render(&sample(), "xlsx").is_err());
    }
}
