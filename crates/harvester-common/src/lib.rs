pub mod config;
pub mod error;
pub mod logging;
pub mod store;

pub use config::{Config, DiscoveryMethod, IncrementalMode, ProxyMode, RetailerConfig, RetailersFile};
pub use error::{HarvestError, Result};
pub use store::{sanitize_field, validate_and_sanitize, Store};
