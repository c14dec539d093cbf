use thiserror::Error;

/// Error taxonomy shared across the harvester workspace. Named by role
/// (spec.md §7), not by implementation, so callers can match on "what kind
/// of failure" without caring which crate raised it.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("blocked (persistent {status}) fetching {url}")]
    Blocked { url: String, status: u16 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
