//! Request pipeline: Transport + Pacer + retry (spec §4.3). One instance is
//! built per run and passed by reference into every `ScraperKind` call —
//! the "carry a RetailerContext explicitly" strategy from spec §9, in place
//! of the teacher's module-level mutable counters.

use std::collections::HashMap;
use std::time::Duration;

use harvester_common::ProxyMode;
use harvester_pacer::Pacer;
use harvester_transport::{GetOptions, Transport};
use thiserror::Error;
use tracing::{error, warn};

/// Realistic desktop-browser User-Agent strings, rotated per request
/// (spec §4.3: "at least 4").
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request to {url} failed after {attempts} attempts (last status: {final_status:?})")]
    Exhausted {
        url: String,
        attempts: u32,
        final_status: Option<u16>,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub render_js: bool,
    pub country: Option<String>,
    pub method: Option<reqwest::Method>,
    pub body: Option<Vec<u8>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            render_js: false,
            country: None,
            method: None,
            body: None,
        }
    }
}

/// Composes a Transport + Pacer + retry policy into the single `get()`
/// every scraper-kind uses.
pub struct Pipeline {
    transport: Transport,
    pacer: Pacer,
    mode: ProxyMode,
    max_retries: u32,
    retry_delay: f64,
}

impl Pipeline {
    pub fn new(transport: Transport, pacer: Pacer, mode: ProxyMode, max_retries: u32, retry_delay: f64) -> Self {
        Self {
            transport,
            pacer,
            mode,
            max_retries,
            retry_delay,
        }
    }

    pub async fn get(&self, url: &str, opts: PipelineOptions) -> Result<harvester_transport::Response, PipelineError> {
        let mut last_status: Option<u16> = None;

        for attempt in 0..=self.max_retries {
            let delay = self.pacer.before_request(self.mode);
            tokio::time::sleep(delay).await;

            let headers = default_headers(attempt);
            let get_opts = GetOptions {
                render_js: Some(opts.render_js),
                country: opts.country.clone(),
                method: opts.method.clone(),
                body: opts.body.clone(),
            };

            match self.transport.get_with_options(url, &headers, get_opts).await {
                Ok(resp) => {
                    last_status = Some(resp.status_code);
                    match resp.status_code {
                        200..=299 => return Ok(resp),
                        404 => return Ok(resp),
                        429 | 403 => {
                            if let Some(wait) = self.pacer.on_response(resp.status_code, url, attempt) {
                                if attempt < self.max_retries {
                                    tokio::time::sleep(wait).await;
                                    continue;
                                }
                            }
                            error!(url, status = resp.status_code, attempts = self.max_retries, "exhausted retries");
                        }
                        500..=599 => {
                            if attempt < self.max_retries {
                                let backoff = Duration::from_secs_f64(
                                    self.retry_delay * 2f64.powi(attempt as i32),
                                );
                                warn!(url, status = resp.status_code, attempt, "5xx, retrying");
                                tokio::time::sleep(backoff).await;
                                continue;
                            }
                        }
                        _ => return Ok(resp),
                    }
                }
                Err(e) => {
                    warn!(url, error = %e, attempt, "transport error, retrying");
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs_f64(self.retry_delay)).await;
                        continue;
                    }
                }
            }
        }

        error!(
            "Failed to fetch {url} after {} attempts (last status: {})",
            self.max_retries,
            last_status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
        );

        Err(PipelineError::Exhausted {
            url: url.to_string(),
            attempts: self.max_retries,
            final_status: last_status,
        })
    }

    pub fn requests_made(&self) -> u64 {
        self.pacer.requests_made()
    }
}

fn default_headers(attempt: u32) -> HashMap<String, String> {
    let ua = USER_AGENTS[attempt as usize % USER_AGENTS.len()];
    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), ua.to_string());
    headers.insert(
        "Accept".to_string(),
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
    );
    headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
    headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_rotation_has_at_least_four_entries() {
        assert!(USER_AGENTS.len() >= 4);
    }

    #[test]
    fn default_headers_rotate_by_attempt() {
        let h0 = default_headers(0);
        let h1 = default_headers(1);
        assert_ne!(h0.get("User-Agent"), h1.get("User-Agent"));
    }
}
