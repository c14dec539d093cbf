//! TTL-bound on-disk caches for URL sets and response bodies (spec §3,
//! component table §2). Cache keys are SHA-256 hex digests — the teacher's
//! design notes (spec §9) call out replacing MD5 with SHA-256 explicitly.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use harvester_common::HarvestError;

pub const URL_SET_TTL_DAYS: i64 = 7;
pub const RESPONSE_BODY_TTL_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    stored_at: DateTime<Utc>,
    value: T,
}

/// Deterministic cache key: the raw URL, or the SHA-256 hex digest of a
/// normalized request when the input isn't already key-shaped (spec §3).
pub fn cache_key_for_url(url: &str) -> String {
    url.to_string()
}

pub fn cache_key_for_request(method: &str, url: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\0");
    hasher.update(url.as_bytes());
    hasher.update(b"\0");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    pub fn new(root: impl AsRef<Path>, retailer: &str, namespace: &str, ttl_days: i64) -> Self {
        Self {
            dir: root.as_ref().join(retailer).join("cache").join(namespace),
            ttl: Duration::days(ttl_days),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe = key.replace(['/', ':', '?', '&'], "_");
        self.dir.join(format!("{safe}.json"))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let contents = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry<T> = serde_json::from_str(&contents).ok()?;

        if Utc::now() - entry.stored_at > self.ttl {
            return None;
        }
        Some(entry.value)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), HarvestError> {
        std::fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            stored_at: Utc::now(),
            value,
        };
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&entry)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_for_request_is_deterministic() {
        let a = cache_key_for_request("GET", "https://example.com/a", b"");
        let b = cache_key_for_request("GET", "https://example.com/a", b"");
        let c = cache_key_for_request("GET", "https://example.com/b", b"");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn set_then_get_round_trips_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), "acme", "url_sets", URL_SET_TTL_DAYS);
        cache.set("k1", &vec!["https://a".to_string(), "https://b".to_string()]).unwrap();
        let got: Option<Vec<String>> = cache.get("k1");
        assert_eq!(got, Some(vec!["https://a".to_string(), "https://b".to_string()]));
    }

    #[test]
    fn expired_entry_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), "acme", "url_sets", URL_SET_TTL_DAYS);
        let stale_entry = CacheEntry {
            stored_at: Utc::now() - Duration::days(8),
            value: vec!["https://a".to_string()],
        };
        std::fs::create_dir_all(&cache.dir).unwrap();
        std::fs::write(cache.path_for("k1"), serde_json::to_string(&stale_entry).unwrap()).unwrap();

        let got: Option<Vec<String>> = cache.get("k1");
        assert_eq!(got, None);
    }

    #[test]
    fn missing_entry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), "acme", "url_sets", URL_SET_TTL_DAYS);
        let got: Option<Vec<String>> = cache.get("missing");
        assert_eq!(got, None);
    }
}
