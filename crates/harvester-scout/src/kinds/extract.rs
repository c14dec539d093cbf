//! Shared HTML/JSON → `Store` mapping used by every discovery kind's
//! `extract` phase. Store-locator pages overwhelmingly embed their data as
//! schema.org `LocalBusiness`/`Store` JSON-LD; locator APIs return bare
//! JSON objects under a handful of common field-name aliases. Neither
//! needs a retailer-specific parser, so the framework supplies both here
//! instead of asking each `ScraperKind` to reimplement them.

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use harvester_common::Store;

fn ld_json_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<script[^>]+type=["']application/ld\+json["'][^>]*>(.*?)</script>"#)
            .expect("valid regex")
    })
}

const BUSINESS_TYPES: [&str; 4] = ["LocalBusiness", "Store", "GroceryStore", "Restaurant"];

/// Scan `html` for a JSON-LD block describing the business at `url` and
/// map it onto a `Store`. Returns `None` when no recognizable block is
/// present — the caller treats that as a skip, not a hard failure, since
/// not every sitemap entry is a store-locator detail page.
pub fn extract_from_html(html: &str, url: &str) -> Option<Store> {
    for caps in ld_json_pattern().captures_iter(html) {
        let raw = caps.get(1)?.as_str();
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        if let Some(store) = find_business_node(&value).and_then(|node| map_ld_json(node, url)) {
            return Some(store);
        }
    }
    None
}

fn find_business_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_business_node),
        Value::Object(obj) => {
            let is_business = obj
                .get("@type")
                .map(|t| match t {
                    Value::String(s) => BUSINESS_TYPES.contains(&s.as_str()),
                    Value::Array(arr) => arr
                        .iter()
                        .any(|v| v.as_str().map(|s| BUSINESS_TYPES.contains(&s)).unwrap_or(false)),
                    _ => false,
                })
                .unwrap_or(false);
            if is_business {
                Some(value)
            } else if let Some(graph) = obj.get("@graph") {
                find_business_node(graph)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn map_ld_json(node: &Value, url: &str) -> Option<Store> {
    let name = node.get("name")?.as_str()?.to_string();
    let address = node.get("address");
    let geo = node.get("geo");

    Some(Store {
        store_id: node
            .get("@id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| url.to_string()),
        name,
        street_address: field_str(address, "streetAddress"),
        city: field_str(address, "addressLocality"),
        state: field_str(address, "addressRegion"),
        postal_code: field_str(address, "postalCode"),
        country: field_str(address, "addressCountry"),
        latitude: geo.and_then(|g| g.get("latitude")).and_then(Value::as_f64),
        longitude: geo.and_then(|g| g.get("longitude")).and_then(Value::as_f64),
        phone: node
            .get("telephone")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        url: url.to_string(),
        scraped_at: Utc::now(),
        attributes: node
            .get("openingHours")
            .map(|hours| {
                let mut attrs = Map::new();
                attrs.insert("hours".to_string(), hours.clone());
                attrs
            })
            .unwrap_or_default(),
    })
}

fn field_str(obj: Option<&Value>, key: &str) -> String {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Field-alias table for bare-JSON locator-API records (spec §4.4's
/// `locator_api` discovery method never renders HTML, so there is no
/// JSON-LD to read).
pub fn extract_from_json(value: &Value, fallback_url: &str) -> Option<Store> {
    let name = first_str(value, &["name", "storeName", "store_name"])?;
    let store_id = first_str(value, &["id", "storeId", "store_id", "storeNumber"])
        .unwrap_or_else(|| fallback_url.to_string());
    let url = first_str(value, &["url", "storeUrl", "detailUrl"]).unwrap_or_else(|| fallback_url.to_string());

    Some(Store {
        store_id,
        name,
        street_address: first_str(value, &["address", "street", "address1", "streetAddress"]).unwrap_or_default(),
        city: first_str(value, &["city", "locality"]).unwrap_or_default(),
        state: first_str(value, &["state", "region", "stateCode"]).unwrap_or_default(),
        postal_code: first_str(value, &["zip", "zipCode", "postalCode", "postal_code"]).unwrap_or_default(),
        country: first_str(value, &["country", "countryCode"]).unwrap_or_default(),
        latitude: first_f64(value, &["latitude", "lat"]),
        longitude: first_f64(value, &["longitude", "lng", "long"]),
        phone: first_str(value, &["phone", "telephone", "phoneNumber"]).unwrap_or_default(),
        url,
        scraped_at: Utc::now(),
        attributes: Map::new(),
    })
}

pub(crate) fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::to_string)
}

fn first_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| value.get(k).and_then(Value::as_f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_store_from_json_ld_local_business() {
        let html = r#"
            <html><body>
            <script type="application/ld+json">
            {"@type": "LocalBusiness", "name": "Acme Downtown",
             "address": {"streetAddress": "1 Main St", "addressLocality": "Springfield",
                          "addressRegion": "IL", "postalCode": "62704", "addressCountry": "US"},
             "geo": {"latitude": 39.78, "longitude": -89.65},
             "telephone": "555-0100"}
            </script>
            </body></html>
        "#;
        let store = extract_from_html(html, "https://acme.com/stores/1").unwrap();
        assert_eq!(store.name, "Acme Downtown");
        assert_eq!(store.city, "Springfield");
        assert_eq!(store.latitude, Some(39.78));
    }

    #[test]
    fn returns_none_when_no_ld_json_block_present() {
        assert!(extract_from_html("<html><body>no data here</body></html>", "https://acme.com/x").is_none());
    }

    #[test]
    fn extracts_store_from_generic_locator_api_json() {
        let value: Value = serde_json::from_str(
            r#"{"storeId": "42", "storeName": "Acme Uptown", "address1": "2 Oak St",
                "city": "Springfield", "state": "IL", "zipCode": "62704", "lat": 39.8, "lng": -89.6}"#,
        )
        .unwrap();
        let store = extract_from_json(&value, "https://acme.com/api").unwrap();
        assert_eq!(store.store_id, "42");
        assert_eq!(store.name, "Acme Uptown");
        assert_eq!(store.latitude, Some(39.8));
    }
}
