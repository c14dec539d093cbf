use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("invalid transport configuration: {0}")]
    Config(String),

    #[error("timeout fetching {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.url().map(|u| u.to_string()).unwrap_or_default())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
