//! Change detector (spec §4.5): identity hashing, fingerprinting, and
//! new/closed/modified/unchanged classification with collision handling.
//! Grounded on the teacher's `dedup_utils::normalize_title` /
//! `batch_title_dedup` shape (pure functions, no I/O, unit-testable in
//! isolation) but replacing MD5-style ad hoc comparison with SHA-256 per
//! spec §9.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use harvester_common::Store;

fn normalize(s: &str) -> String {
    s.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x1f");
        }
        hasher.update(normalize(p).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Address-identity fields available for hashing, in the canonical order
/// spec §4.5 names them. Callers pick the subset via `identity_fields`.
fn field_value<'a>(store: &'a Store, field: &str) -> &'a str {
    match field {
        "name" => &store.name,
        "street_address" => &store.street_address,
        "city" => &store.city,
        "state" => &store.state,
        "zip" | "postal_code" => &store.postal_code,
        "phone" => &store.phone,
        _ => "",
    }
}

/// Deterministic SHA-256 hex identity key over the configured
/// address-identity field subset, prefixed by the retailer's own
/// `store_id` when present — so identity stays anchored to the retailer's
/// stable id even as address formatting drifts across runs.
pub fn identity_key(store: &Store, identity_fields: &[String]) -> String {
    let values: Vec<&str> = identity_fields.iter().map(|f| field_value(store, f)).collect();
    let hash = sha256_hex(&values);
    if store.store_id.trim().is_empty() {
        hash
    } else {
        format!("{}::{}", store.store_id.trim(), hash)
    }
}

/// Broader-field hash used to detect modification: identity fields plus
/// coordinates, hours/services (from `attributes`), and the source URL.
pub fn fingerprint(store: &Store, identity_fields: &[String]) -> String {
    let mut values: Vec<String> = identity_fields
        .iter()
        .map(|f| field_value(store, f).to_string())
        .collect();
    values.push(store.latitude.map(|v| v.to_string()).unwrap_or_default());
    values.push(store.longitude.map(|v| v.to_string()).unwrap_or_default());
    values.push(
        store
            .attributes
            .get("hours")
            .map(|v| v.to_string())
            .unwrap_or_default(),
    );
    values.push(
        store
            .attributes
            .get("services")
            .map(|v| v.to_string())
            .unwrap_or_default(),
    );
    values.push(store.url.clone());

    let refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
    sha256_hex(&refs)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedStore {
    pub store_id: String,
    pub fields_changed: HashMap<String, FieldChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    pub new: Vec<Store>,
    pub closed: Vec<Store>,
    pub modified: Vec<ModifiedStore>,
    pub unchanged_count: usize,
    pub total_current: usize,
    /// Number of identity-key collisions disambiguated this run (spec §4.5).
    pub collisions: usize,
}

/// Assign a unique identity key to every store, suffixing `::1`, `::2`, ...
/// on the second and later occurrence of the same base key so no store is
/// ever silently dropped (spec §8 invariant 8).
fn keyed(stores: &[Store], identity_fields: &[String]) -> (Vec<String>, usize) {
    let mut seen: HashMap<String, u32> = HashMap::new();
    let mut collisions = 0usize;
    let keys = stores
        .iter()
        .map(|s| {
            let base = identity_key(s, identity_fields);
            let count = seen.entry(base.clone()).or_insert(0);
            let key = if *count == 0 {
                base
            } else {
                collisions += 1;
                format!("{base}::{count}")
            };
            *count += 1;
            key
        })
        .collect();
    (keys, collisions)
}

fn compare_field(before: &Store, after: &Store, field: &str) -> Option<FieldChange> {
    let (b, a): (serde_json::Value, serde_json::Value) = match field {
        "name" => (before.name.clone().into(), after.name.clone().into()),
        "street_address" => (before.street_address.clone().into(), after.street_address.clone().into()),
        "city" => (before.city.clone().into(), after.city.clone().into()),
        "state" => (before.state.clone().into(), after.state.clone().into()),
        "postal_code" => (before.postal_code.clone().into(), after.postal_code.clone().into()),
        "country" => (before.country.clone().into(), after.country.clone().into()),
        "phone" => (before.phone.clone().into(), after.phone.clone().into()),
        "url" => (before.url.clone().into(), after.url.clone().into()),
        "latitude" => (
            before.latitude.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
            after.latitude.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
        ),
        "longitude" => (
            before.longitude.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
            after.longitude.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
        ),
        "attributes" => (
            serde_json::Value::Object(before.attributes.clone()),
            serde_json::Value::Object(after.attributes.clone()),
        ),
        _ => return None,
    };
    if b == a {
        None
    } else {
        Some(FieldChange { before: b, after: a })
    }
}

const COMPARED_FIELDS: [&str; 11] = [
    "name",
    "street_address",
    "city",
    "state",
    "postal_code",
    "country",
    "phone",
    "url",
    "latitude",
    "longitude",
    "attributes",
];

/// Diff `previous` against `current`. Order-independent and deterministic
/// up to ordering within each bucket (spec §8 invariant 5): the detector
/// never mutates its inputs.
pub fn diff(previous: &[Store], current: &[Store], identity_fields: &[String]) -> ChangeReport {
    let (prev_keys, _) = keyed(previous, identity_fields);
    let (curr_keys, collisions) = keyed(current, identity_fields);

    let prev_index: HashMap<&str, &Store> = prev_keys
        .iter()
        .zip(previous.iter())
        .map(|(k, s)| (k.as_str(), s))
        .collect();
    let curr_index: HashMap<&str, &Store> = curr_keys
        .iter()
        .zip(current.iter())
        .map(|(k, s)| (k.as_str(), s))
        .collect();

    let mut new = Vec::new();
    let mut modified = Vec::new();
    let mut unchanged_count = 0usize;

    for (key, store) in &curr_index {
        match prev_index.get(key) {
            None => new.push((*store).clone()),
            Some(prev_store) => {
                let prev_fp = fingerprint(prev_store, identity_fields);
                let curr_fp = fingerprint(store, identity_fields);
                if prev_fp == curr_fp {
                    unchanged_count += 1;
                } else {
                    let mut fields_changed = HashMap::new();
                    for field in COMPARED_FIELDS {
                        if let Some(change) = compare_field(prev_store, store, field) {
                            fields_changed.insert(field.to_string(), change);
                        }
                    }
                    modified.push(ModifiedStore {
                        store_id: store.store_id.clone(),
                        fields_changed,
                    });
                }
            }
        }
    }

    let mut closed = Vec::new();
    for (key, store) in &prev_index {
        if !curr_index.contains_key(key) {
            closed.push((*store).clone());
        }
    }

    if collisions > 0 {
        tracing::warn!(collisions, "identity key collisions disambiguated this run");
    }

    ChangeReport {
        new,
        closed,
        modified,
        unchanged_count,
        total_current: current.len(),
        collisions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn store(store_id: &str, name: &str, addr: &str, phone: &str) -> Store {
        Store {
            store_id: store_id.into(),
            name: name.into(),
            street_address: addr.into(),
            city: "Minneapolis".into(),
            state: "MN".into(),
            postal_code: "55401".into(),
            country: "US".into(),
            latitude: None,
            longitude: None,
            phone: phone.into(),
            url: format!("https://example.com/{store_id}"),
            scraped_at: Utc::now(),
            attributes: Map::new(),
        }
    }

    const FIELDS: &[&str] = &["name", "street_address", "city", "state", "zip", "phone"];

    fn fields() -> Vec<String> {
        FIELDS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identity_key_is_order_and_case_insensitive_on_whitespace() {
        let a = store("1", "Store A", "123 Mall  St", "555-0001");
        let mut b = a.clone();
        b.name = "  store a ".into();
        assert_eq!(identity_key(&a, &fields()), identity_key(&b, &fields()));
    }

    #[test]
    fn s4_collision_handling_preserves_new_store() {
        let previous = vec![
            store("", "Store A", "123 Mall", "555-0001"),
            store("", "Store B", "123 Mall", "555-0002"),
        ];
        let mut current = previous.clone();
        current.push(store("", "Store C", "123 Mall", "555-0003"));

        let report = diff(&previous, &current, &fields());
        assert_eq!(report.new.len(), 1);
        assert_eq!(report.new[0].name, "Store C");
        assert_eq!(report.closed.len(), 0);
        assert_eq!(report.modified.len(), 0);
        assert_eq!(report.unchanged_count, 2);
    }

    #[test]
    fn s1_new_stores_with_no_previous_run() {
        let current = vec![
            store("a", "Store A", "1 Main St", "555-0001"),
            store("b", "Store B", "2 Main St", "555-0002"),
        ];
        let report = diff(&[], &current, &fields());
        assert_eq!(report.new.len(), 2);
        assert_eq!(report.closed.len(), 0);
        assert_eq!(report.unchanged_count, 0);
    }

    #[test]
    fn closed_store_detected_when_absent_from_current() {
        let previous = vec![store("a", "Store A", "1 Main St", "555-0001")];
        let report = diff(&previous, &[], &fields());
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.new.len(), 0);
    }

    #[test]
    fn modified_store_produces_per_field_diff() {
        let previous = vec![store("a", "Store A", "1 Main St", "555-0001")];
        let mut current = previous.clone();
        current[0].phone = "555-9999".into();

        let report = diff(&previous, &current, &fields());
        assert_eq!(report.modified.len(), 1);
        assert!(report.modified[0].fields_changed.contains_key("phone"));
    }

    #[test]
    fn collision_suffixing_never_drops_a_current_store() {
        // Two current stores with identical identity fields and no
        // retailer store_id: the collision handler must still keep both.
        let current = vec![
            store("", "Dup", "1 Main St", "555-0001"),
            store("", "Dup", "1 Main St", "555-0001"),
        ];
        let (keys, collisions) = keyed(&current, &fields());
        assert_eq!(collisions, 1);
        assert_ne!(keys[0], keys[1]);

        let report = diff(&[], &current, &fields());
        assert_eq!(report.new.len(), 2);
    }

    #[test]
    fn diff_is_deterministic_regardless_of_input_order() {
        let previous = vec![
            store("a", "Store A", "1 Main St", "555-0001"),
            store("b", "Store B", "2 Main St", "555-0002"),
        ];
        let mut current_fwd = previous.clone();
        current_fwd.push(store("c", "Store C", "3 Main St", "555-0003"));
        let mut current_rev = current_fwd.clone();
        current_rev.reverse();

        let r1 = diff(&previous, &current_fwd, &fields());
        let r2 = diff(&previous, &current_rev, &fields());
        assert_eq!(r1.new.len(), r2.new.len());
        assert_eq!(r1.unchanged_count, r2.unchanged_count);
    }
}
