use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Proxy/transport mode, selectable per retailer or overridden at the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    Direct,
    Residential,
    WebScraperApi,
}

impl Default for ProxyMode {
    fn default() -> Self {
        ProxyMode::Direct
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Sitemap,
    SitemapGzip,
    SitemapPaginated,
    HtmlCrawl,
    LocatorApi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalMode {
    UrlSet,
    StoreId,
}

impl Default for IncrementalMode {
    fn default() -> Self {
        IncrementalMode::UrlSet
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayProfiles {
    pub direct: DelayRange,
    pub proxied: DelayRange,
}

/// Per-retailer options recognized by the harvester (spec §4.2, §4.3, §4.4,
/// §4.7). One entry lives in `config/retailers.yaml` under the retailer's
/// key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetailerConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    pub discovery_method: DiscoveryMethod,
    #[serde(default)]
    pub sitemap_url_pattern: Option<String>,
    /// Geographic queries (ZIPs or `"lat,lng"` pairs) posted one at a time
    /// to a `locator_api` retailer's endpoint (spec §4.4).
    #[serde(default)]
    pub geo_queries: Vec<String>,
    /// Arbitrary grouping label (e.g. "grocery", "pharmacy") selectable by
    /// the orchestrator's `--group` flag (spec §6).
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default = "default_min_delay")]
    pub min_delay: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    #[serde(default)]
    pub delays: Option<DelayProfiles>,

    #[serde(default = "default_pause_50")]
    pub pause_50_requests: DelayRange,
    #[serde(default = "default_pause_200")]
    pub pause_200_requests: DelayRange,
    #[serde(default = "default_rate_limit_base_wait")]
    pub rate_limit_base_wait: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,

    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,

    #[serde(default)]
    pub proxy_mode: ProxyMode,
    #[serde(default)]
    pub incremental_mode: IncrementalMode,
    /// Identity fields used by the change detector when computing the
    /// address-identity key. Defaults to the full set including phone.
    #[serde(default = "default_identity_fields")]
    pub identity_fields: Vec<String>,
}

fn default_min_delay() -> f64 {
    1.0
}
fn default_max_delay() -> f64 {
    3.0
}
fn default_pause_50() -> DelayRange {
    DelayRange { min: 10.0, max: 20.0 }
}
fn default_pause_200() -> DelayRange {
    DelayRange { min: 60.0, max: 120.0 }
}
fn default_rate_limit_base_wait() -> f64 {
    30.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    5.0
}
fn default_parallel_workers() -> usize {
    2
}
fn default_checkpoint_interval() -> u32 {
    25
}
fn default_identity_fields() -> Vec<String> {
    vec![
        "name".into(),
        "street_address".into(),
        "city".into(),
        "state".into(),
        "zip".into(),
        "phone".into(),
    ]
}

/// Required keys per retailer, enforced by both the YAML loader and
/// `POST /api/config` (spec §4.9).
pub fn validate_retailer_config(key: &str, cfg: &RetailerConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if cfg.name.trim().is_empty() {
        errors.push(format!("retailers.{key}.name required"));
    }
    if cfg.base_url.trim().is_empty() {
        errors.push(format!("retailers.{key}.base_url required"));
    }
    if cfg.min_delay < 0.0 || cfg.max_delay < cfg.min_delay {
        errors.push(format!(
            "retailers.{key}.min_delay/max_delay must satisfy 0 <= min_delay <= max_delay"
        ));
    }
    if cfg.parallel_workers == 0 {
        errors.push(format!("retailers.{key}.parallel_workers must be > 0"));
    }
    if cfg.checkpoint_interval == 0 {
        errors.push(format!("retailers.{key}.checkpoint_interval must be > 0"));
    }
    if matches!(cfg.discovery_method, DiscoveryMethod::LocatorApi) && cfg.geo_queries.is_empty() {
        errors.push(format!("retailers.{key}.geo_queries required for locator_api discovery"));
    }
    errors
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetailersFile {
    pub retailers: HashMap<String, RetailerConfig>,
}

/// Parse and validate a `retailers.yaml` document. On any validation
/// failure, returns every per-field error instead of the first (spec's
/// `details` list contract for `POST /api/config`).
pub fn parse_and_validate(yaml: &str) -> Result<RetailersFile, Vec<String>> {
    let parsed: RetailersFile =
        serde_yaml::from_str(yaml).map_err(|e| vec![format!("invalid YAML: {e}")])?;

    let mut errors = Vec::new();
    for (key, cfg) in &parsed.retailers {
        errors.extend(validate_retailer_config(key, cfg));
    }

    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(errors)
    }
}

/// Process-wide configuration loaded from the environment (spec §6).
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub log_level: String,
    pub oxy_username: String,
    pub oxy_password: String,
    pub oxy_country: String,
    pub oxy_render_js: bool,
    pub proxy_mode: ProxyMode,
    pub web_host: String,
    pub web_port: u16,
    pub top_level_concurrency: usize,
}

impl Config {
    /// Load config shared by every binary (orchestrator, API server).
    pub fn from_env() -> Self {
        let proxy_mode = match env::var("PROXY_MODE").unwrap_or_default().as_str() {
            "residential" => ProxyMode::Residential,
            "web_scraper_api" => ProxyMode::WebScraperApi,
            _ => ProxyMode::Direct,
        };

        Self {
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            oxy_username: first_env(&["OXY_RESIDENTIAL_USERNAME", "OXY_USERNAME"]),
            oxy_password: first_env(&["OXY_RESIDENTIAL_PASSWORD", "OXY_PASSWORD"]),
            oxy_country: env::var("OXY_COUNTRY").unwrap_or_default(),
            oxy_render_js: env::var("OXY_RENDER_JS")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            proxy_mode,
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
            top_level_concurrency: env::var("TOP_LEVEL_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6),
        }
    }

    /// Log the presence (not the value) of every credential-bearing var.
    pub fn log_redacted(&self) {
        let vars = [
            ("OXY_USERNAME", &self.oxy_username),
            ("OXY_PASSWORD", &self.oxy_password),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }

    /// `--render-js` is only valid together with `--proxy web_scraper_api`
    /// (spec §6, invariant 10 in §8). Called by both the CLI validator and
    /// the HTTP start endpoint.
    pub fn validate_render_js(render_js: bool, mode: ProxyMode) -> Result<(), HarvestError> {
        if render_js && mode != ProxyMode::WebScraperApi {
            return Err(HarvestError::Config(
                "render_js is only valid with proxy mode web_scraper_api".into(),
            ));
        }
        Ok(())
    }
}

fn first_env(keys: &[&str]) -> String {
    for key in keys {
        if let Ok(v) = env::var(key) {
            if !v.is_empty() {
                return v;
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_js_requires_web_scraper_api() {
        assert!(Config::validate_render_js(true, ProxyMode::Direct).is_err());
        assert!(Config::validate_render_js(true, ProxyMode::Residential).is_err());
        assert!(Config::validate_render_js(true, ProxyMode::WebScraperApi).is_ok());
        assert!(Config::validate_render_js(false, ProxyMode::Direct).is_ok());
    }

    #[test]
    fn parse_and_validate_reports_all_field_errors() {
        let yaml = r#"
retailers:
  verizon:
    enabled: true
    base_url: ""
    discovery_method: sitemap
    parallel_workers: 0
    checkpoint_interval: 0
"#;
        let err = parse_and_validate(yaml).unwrap_err();
        assert!(err.iter().any(|e| e.contains("name")));
        assert!(err.iter().any(|e| e.contains("base_url")));
        assert!(err.iter().any(|e| e.contains("parallel_workers")));
        assert!(err.iter().any(|e| e.contains("checkpoint_interval")));
    }

    #[test]
    fn parse_and_validate_accepts_well_formed_config() {
        let yaml = r#"
retailers:
  verizon:
    name: Verizon
    enabled: true
    base_url: "https://www.verizon.com"
    discovery_method: sitemap
"#;
        assert!(parse_and_validate(yaml).is_ok());
    }
}
