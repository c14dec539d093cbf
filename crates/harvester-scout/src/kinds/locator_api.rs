use std::collections::HashSet;

use async_trait::async_trait;
use harvester_pipeline::PipelineOptions;
use serde_json::{json, Value};

use crate::kinds::extract::first_str;
use crate::{ExtractOutcome, RetailerContext, ScoutError, ScraperKind};

/// Discovers and extracts in one network round trip: the retailer exposes
/// a JSON endpoint that answers geographic queries (spec §4.4's
/// `locator_api` method), so `discover` POSTs once per configured ZIP or
/// lat/lng pair, merges the responses, de-duplicates by store id, and
/// embeds each surviving record as its own identifier — `extract` never
/// needs the network.
pub struct LocatorApiKind;

fn store_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(obj) => ["stores", "results", "data", "locations"]
            .iter()
            .find_map(|key| obj.get(*key))
            .and_then(|v| v.as_array()),
        _ => None,
    }
}

/// A query is a ZIP if every character is a digit, otherwise it's treated
/// as a `"lat,lng"` pair.
fn query_body(query: &str) -> Value {
    match query.split_once(',') {
        Some((lat, lng)) if lat.trim().parse::<f64>().is_ok() && lng.trim().parse::<f64>().is_ok() => {
            json!({ "lat": lat.trim().parse::<f64>().unwrap(), "lng": lng.trim().parse::<f64>().unwrap() })
        }
        _ => json!({ "zip": query }),
    }
}

fn record_id(record: &Value) -> Option<String> {
    first_str(record, &["id", "storeId", "store_id", "storeNumber"])
}

#[async_trait]
impl ScraperKind for LocatorApiKind {
    async fn discover(&self, ctx: &RetailerContext<'_>) -> Result<Vec<String>, ScoutError> {
        if ctx.config.geo_queries.is_empty() {
            return Err(ScoutError::Discovery("locator_api retailer has no geo_queries configured".into()));
        }

        let mut seen_ids = HashSet::new();
        let mut identifiers = Vec::new();

        for query in &ctx.config.geo_queries {
            let body = serde_json::to_vec(&query_body(query))
                .map_err(|e| ScoutError::Discovery(format!("failed to encode geo query {query}: {e}")))?;
            let opts = PipelineOptions {
                method: Some(reqwest::Method::POST),
                body: Some(body),
                ..ctx.options.clone()
            };

            let resp = ctx.pipeline.get(&ctx.config.base_url, opts).await.map_err(ScoutError::from)?;
            if resp.status_code != 200 {
                return Err(ScoutError::Discovery(format!(
                    "locator API fetch for {query} returned status {}",
                    resp.status_code
                )));
            }

            let parsed: Value = serde_json::from_str(&resp.text)
                .map_err(|e| ScoutError::Discovery(format!("locator API body is not valid JSON: {e}")))?;
            let records = store_array(&parsed)
                .ok_or_else(|| ScoutError::Discovery("locator API body has no recognizable store array".into()))?;

            for record in records {
                let id = record_id(record).unwrap_or_else(|| record.to_string());
                if !seen_ids.insert(id) {
                    continue;
                }
                if let Ok(identifier) = serde_json::to_string(record) {
                    identifiers.push(identifier);
                }
            }
        }

        Ok(identifiers)
    }

    async fn extract(&self, ctx: &RetailerContext<'_>, identifier: &str) -> ExtractOutcome {
        let value: Value = match serde_json::from_str(identifier) {
            Ok(v) => v,
            Err(e) => return ExtractOutcome::Failed(format!("corrupt record: {e}")),
        };
        match crate::kinds::extract::extract_from_json(&value, &ctx.config.base_url) {
            Some(store) => ExtractOutcome::Extracted(store),
            None => ExtractOutcome::Skipped("record missing a name field".into()),
        }
    }
}
