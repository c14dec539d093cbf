//! Path-parameter validation (spec §4.9 security notes): `{retailer}` must
//! be a key in the loaded `retailers.yaml`; `{run_id}` must match a safe
//! character set and never resolve outside its owning directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ApiError;

fn run_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-:.]+$").expect("valid regex"))
}

pub fn validate_run_id(run_id: &str) -> Result<(), ApiError> {
    if run_id.contains("..") || !run_id_pattern().is_match(run_id) {
        return Err(ApiError::bad_request(format!("invalid run_id: {run_id}")));
    }
    Ok(())
}

pub fn validate_retailer(retailer: &str, known: &[String]) -> Result<(), ApiError> {
    if !known.iter().any(|k| k == retailer) {
        return Err(ApiError::NotFound(format!("unknown retailer: {retailer}")));
    }
    Ok(())
}

/// Join `run_id` beneath `base` and reject if the resolved path escapes it.
/// `validate_run_id` already forbids `..` and path separators, but this is
/// the defense actually enforced at the filesystem boundary.
pub fn safe_join(base: &Path, run_id: &str) -> Result<PathBuf, ApiError> {
    validate_run_id(run_id)?;
    let candidate = base.join(run_id);
    let base_abs = base.to_path_buf();
    if !candidate.starts_with(&base_abs) {
        return Err(ApiError::bad_request("resolved path escapes its base directory"));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_sequences() {
        assert!(validate_run_id("../../etc/passwd").is_err());
        assert!(validate_run_id("acme-2026..01").is_ok());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(validate_run_id("acme/../secret").is_err());
        assert!(validate_run_id("acme-20260101120000-abcd1234").is_ok());
    }

    #[test]
    fn unknown_retailer_is_rejected() {
        let known = vec!["acme".to_string()];
        assert!(validate_retailer("acme", &known).is_ok());
        assert!(validate_retailer("evil", &known).is_err());
    }

    #[test]
    fn safe_join_stays_within_base() {
        let base = Path::new("/data/acme/logs");
        let joined = safe_join(base, "run-1").unwrap();
        assert_eq!(joined, Path::new("/data/acme/logs/run-1"));
    }
}
