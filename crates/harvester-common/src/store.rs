//! Canonical store record and its validation/sanitization rules (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HarvestError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Store {
    pub store_id: String,
    pub name: String,
    #[serde(default)]
    pub street_address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub phone: String,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// First character classes that turn a spreadsheet cell into a formula
/// (CSV/spreadsheet-formula injection). Negative numerics are exempt.
const INJECTION_PREFIXES: [char; 5] = ['=', '+', '-', '@', '\t'];

/// Sanitize a single string field per spec §3: no value may begin with
/// `=`, `+`, `-`, `@`, tab, or CR — except a negative numeric literal.
/// Returns the sanitized value (prefixed with a `'` the way spreadsheet
/// tools neutralize formula cells) when the prefix is not a legitimate
/// negative number.
pub fn sanitize_field(value: &str) -> String {
    let trimmed = value.trim_start_matches('\r');
    let Some(first) = trimmed.chars().next() else {
        return trimmed.to_string();
    };

    if first == '-' && is_negative_numeric(trimmed) {
        return trimmed.to_string();
    }

    if INJECTION_PREFIXES.contains(&first) || first == '\r' {
        return format!("'{trimmed}");
    }

    trimmed.to_string()
}

fn is_negative_numeric(s: &str) -> bool {
    s.parse::<f64>().is_ok()
}

/// Validation outcome for a single Store. `Ok` carries the validated (and
/// sanitized) store; `Err` carries the reason it was dropped.
pub fn validate_and_sanitize(mut store: Store) -> Result<Store, HarvestError> {
    if store.store_id.trim().is_empty() {
        return Err(HarvestError::Validation("missing store_id".into()));
    }
    if store.name.trim().is_empty() {
        return Err(HarvestError::Validation("missing name".into()));
    }

    let has_address = !store.street_address.trim().is_empty()
        && !store.city.trim().is_empty()
        && !store.state.trim().is_empty();
    let has_coords = store.latitude.is_some() && store.longitude.is_some();
    if !has_address && !has_coords {
        return Err(HarvestError::Validation(
            "store has neither (street_address, city, state) nor (latitude, longitude)".into(),
        ));
    }

    if let Some(lat) = store.latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(HarvestError::Validation(format!(
                "latitude {lat} out of range"
            )));
        }
    }
    if let Some(lng) = store.longitude {
        if !(-180.0..=180.0).contains(&lng) {
            return Err(HarvestError::Validation(format!(
                "longitude {lng} out of range"
            )));
        }
    }

    store.name = sanitize_field(&store.name);
    store.street_address = sanitize_field(&store.street_address);
    store.city = sanitize_field(&store.city);
    store.state = sanitize_field(&store.state);
    store.postal_code = sanitize_field(&store.postal_code);
    store.phone = sanitize_field(&store.phone);

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_store() -> Store {
        Store {
            store_id: "sid-1".into(),
            name: "Example Store".into(),
            street_address: "123 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            postal_code: "62704".into(),
            country: "US".into(),
            latitude: None,
            longitude: None,
            phone: "555-0100".into(),
            url: "https://example.com/store/1".into(),
            scraped_at: Utc::now(),
            attributes: Map::new(),
        }
    }

    #[test]
    fn sanitize_neutralizes_formula_prefix() {
        assert_eq!(sanitize_field("=cmd|'/bin/sh'"), "'=cmd|'/bin/sh'");
        assert_eq!(sanitize_field("@SUM(A1:A2)"), "'@SUM(A1:A2)");
    }

    #[test]
    fn sanitize_preserves_negative_numbers() {
        assert_eq!(sanitize_field("-42.5"), "-42.5");
    }

    #[test]
    fn sanitize_neutralizes_plain_minus_text() {
        assert_eq!(sanitize_field("-not-a-number"), "'-not-a-number");
    }

    #[test]
    fn validate_requires_address_or_coords() {
        let mut s = base_store();
        s.street_address.clear();
        s.city.clear();
        s.state.clear();
        assert!(validate_and_sanitize(s).is_err());
    }

    #[test]
    fn validate_accepts_coords_only() {
        let mut s = base_store();
        s.street_address.clear();
        s.city.clear();
        s.state.clear();
        s.latitude = Some(39.78);
        s.longitude = Some(-89.65);
        assert!(validate_and_sanitize(s).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_coords() {
        let mut s = base_store();
        s.latitude = Some(120.0);
        s.longitude = Some(-89.65);
        assert!(validate_and_sanitize(s).is_err());
    }

    #[test]
    fn validate_sanitizes_injection_prefixed_name() {
        let mut s = base_store();
        s.name = "=HYPERLINK(\"evil\")".into();
        let validated = validate_and_sanitize(s).unwrap();
        assert!(validated.name.starts_with('\''));
    }
}
