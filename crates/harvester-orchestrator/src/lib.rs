//! Retailer selection and the single-retailer run pipeline (spec §4.8).
//! The binary (`main.rs`) owns argument parsing and process exit codes;
//! this module owns everything reusable from tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use harvester_cache::Cache;
use harvester_changes::{diff, ChangeReport};
use harvester_checkpoint::CheckpointStore;
use harvester_common::{Config, DiscoveryMethod, IncrementalMode, ProxyMode, RetailerConfig, RetailersFile, Store};
use harvester_pacer::{DelayRange as PacerDelayRange, Pacer, PacerConfig};
use harvester_pipeline::{Pipeline, PipelineOptions};
use harvester_scout::kinds::{HtmlCrawlKind, LocatorApiKind, SitemapGzipKind, SitemapKind, SitemapPaginatedKind};
use harvester_scout::{HarvestRun, RetailerContext, ScoutError, ScraperKind};
use harvester_tracker::{RunStats, RunTracker};
use harvester_transport::{Credentials, Transport, TransportConfig};

/// Per-invocation flags that override what `RetailerConfig` would
/// otherwise supply (spec §6 CLI flags).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub resume: bool,
    pub incremental: bool,
    pub limit: Option<usize>,
    pub test_mode: bool,
    pub proxy: Option<ProxyMode>,
    pub render_js: bool,
    pub proxy_country: Option<String>,
}

/// Select retailer keys per spec §6: `--all` takes everything enabled;
/// `--retailer`/`--group` narrow; `--exclude` removes from the result.
pub fn select_retailers(
    file: &RetailersFile,
    all: bool,
    retailers: &[String],
    group: &Option<String>,
    exclude: &[String],
) -> Vec<String> {
    let excluded: HashSet<&str> = exclude.iter().map(|s| s.as_str()).collect();

    let mut selected: Vec<String> = file
        .retailers
        .iter()
        .filter(|(key, cfg)| {
            if !cfg.enabled {
                return false;
            }
            if !retailers.is_empty() {
                return retailers.iter().any(|r| r == *key);
            }
            if let Some(g) = group {
                return cfg.group.as_deref() == Some(g.as_str());
            }
            all
        })
        .map(|(key, _)| key.clone())
        .filter(|key| !excluded.contains(key.as_str()))
        .collect();

    selected.sort();
    selected
}

fn build_kind(cfg: &RetailerConfig) -> Result<Box<dyn ScraperKind>, ScoutError> {
    Ok(match cfg.discovery_method {
        DiscoveryMethod::Sitemap => Box::new(SitemapKind::new(&cfg.sitemap_url_pattern)?),
        DiscoveryMethod::SitemapGzip => Box::new(SitemapGzipKind::new(&cfg.sitemap_url_pattern)?),
        DiscoveryMethod::SitemapPaginated => Box::new(SitemapPaginatedKind::new(&cfg.sitemap_url_pattern)?),
        DiscoveryMethod::HtmlCrawl => Box::new(HtmlCrawlKind::new(&cfg.sitemap_url_pattern)?),
        DiscoveryMethod::LocatorApi => Box::new(LocatorApiKind),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcomeStatus {
    Complete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RetailerRunSummary {
    pub retailer: String,
    pub run_id: String,
    pub status: RunOutcomeStatus,
    pub stats: RunStats,
    pub error: Option<String>,
}

fn output_dir(data_dir: &Path, retailer: &str) -> PathBuf {
    data_dir.join(retailer).join("output")
}

pub fn stores_latest_path(data_dir: &Path, retailer: &str) -> PathBuf {
    output_dir(data_dir, retailer).join("stores_latest.json")
}

fn stores_previous_path(data_dir: &Path, retailer: &str) -> PathBuf {
    output_dir(data_dir, retailer).join("stores_previous.json")
}

fn load_previous_stores(data_dir: &Path, retailer: &str) -> Vec<Store> {
    let path = stores_latest_path(data_dir, retailer);
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Move the prior `stores_latest.json` to `stores_previous.json`, then
/// write the new snapshot — concurrent readers see either both old (while
/// the rename/write pair is mid-flight during the diff they started
/// before it) or both new (spec §5 ordering guarantees), never a mixed
/// partial document.
fn save_stores_snapshot(data_dir: &Path, retailer: &str, stores: &[Store]) -> Result<(), harvester_common::HarvestError> {
    let dir = output_dir(data_dir, retailer);
    std::fs::create_dir_all(&dir)?;

    let latest = stores_latest_path(data_dir, retailer);
    let previous = stores_previous_path(data_dir, retailer);
    if latest.exists() {
        std::fs::rename(&latest, &previous)?;
    }

    let tmp = latest.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(stores)?)?;
    std::fs::rename(&tmp, &latest)?;
    Ok(())
}

fn save_change_report(data_dir: &Path, retailer: &str, report: &ChangeReport) -> Result<(), harvester_common::HarvestError> {
    let dir = data_dir.join(retailer).join("history");
    std::fs::create_dir_all(&dir)?;
    let filename = format!("changes_{}.json", Utc::now().format("%Y-%m-%d"));
    std::fs::write(dir.join(filename), serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Run discovery + extraction + change detection for a single retailer,
/// updating its ledger throughout. Errors are captured on the tracker and
/// returned as an `Ok(summary)` with `status: Failed` rather than
/// propagated, so the orchestrator's fan-out can continue past one
/// retailer's failure (spec §8 invariant 9 / scenario S6's "continue on
/// exception" contract).
pub async fn run_retailer(
    global: &Config,
    data_dir: &Path,
    retailer_key: &str,
    cfg: &RetailerConfig,
    overrides: &CliOverrides,
    run_id: Option<String>,
) -> anyhow::Result<RetailerRunSummary> {
    let mut tracker = RunTracker::start(data_dir, retailer_key, run_id)?;
    let run_id = tracker.run_id().to_string();

    match run_retailer_inner(global, data_dir, retailer_key, cfg, overrides, &mut tracker).await {
        Ok(stats) => {
            tracker.update_stats(stats.clone())?;
            tracker.complete()?;
            Ok(RetailerRunSummary {
                retailer: retailer_key.to_string(),
                run_id,
                status: RunOutcomeStatus::Complete,
                stats,
                error: None,
            })
        }
        Err(e) => {
            tracker.log_error(&e.to_string())?;
            tracker.fail(&e.to_string())?;
            Ok(RetailerRunSummary {
                retailer: retailer_key.to_string(),
                run_id,
                status: RunOutcomeStatus::Failed,
                stats: RunStats::default(),
                error: Some(e.to_string()),
            })
        }
    }
}

async fn run_retailer_inner(
    global: &Config,
    data_dir: &Path,
    retailer_key: &str,
    cfg: &RetailerConfig,
    overrides: &CliOverrides,
    tracker: &mut RunTracker,
) -> anyhow::Result<RunStats> {
    let mode = overrides.proxy.unwrap_or(cfg.proxy_mode);
    Config::validate_render_js(overrides.render_js, mode)?;

    tracker.advance_phase("discovering")?;

    let env_credentials = Credentials {
        proxy_username: global.oxy_username.clone(),
        proxy_password: global.oxy_password.clone(),
        api_key: String::new(),
    };
    let credentials = Credentials::resolve(&[Some(&env_credentials)]);

    let transport = Transport::new(TransportConfig {
        mode,
        credentials,
        proxy_endpoint: std::env::var("OXY_PROXY_ENDPOINT").ok(),
        web_scraper_api_endpoint: std::env::var("WEB_SCRAPER_API_ENDPOINT").ok(),
        timeout: std::time::Duration::from_secs(30),
    })?;

    let delays = cfg.delays.clone();
    let (direct, proxied) = match delays {
        Some(d) => (PacerDelayRange::new(d.direct.min, d.direct.max), PacerDelayRange::new(d.proxied.min, d.proxied.max)),
        None => (PacerDelayRange::new(cfg.min_delay, cfg.max_delay), PacerDelayRange::new(cfg.min_delay, cfg.max_delay)),
    };

    let pacer = Pacer::new(
        retailer_key,
        PacerConfig {
            direct,
            proxied,
            pause_50_requests: PacerDelayRange::new(cfg.pause_50_requests.min, cfg.pause_50_requests.max),
            pause_200_requests: PacerDelayRange::new(cfg.pause_200_requests.min, cfg.pause_200_requests.max),
            rate_limit_base_wait: cfg.rate_limit_base_wait,
        },
    );

    let pipeline = Pipeline::new(transport, pacer, mode, cfg.max_retries, cfg.retry_delay);
    let cache = Cache::new(data_dir, retailer_key, "response_bodies", harvester_cache::RESPONSE_BODY_TTL_DAYS);
    let checkpoint_store = CheckpointStore::new(data_dir, retailer_key);

    let ctx = RetailerContext {
        retailer_key: retailer_key.to_string(),
        config: cfg,
        pipeline: &pipeline,
        cache: &cache,
        options: PipelineOptions {
            render_js: overrides.render_js,
            country: overrides.proxy_country.clone(),
            ..PipelineOptions::default()
        },
    };

    let kind = build_kind(cfg)?;
    let run = HarvestRun { ctx, checkpoint_store: &checkpoint_store };

    let previous = load_previous_stores(data_dir, retailer_key);
    let incremental_skip = overrides.incremental.then(|| match cfg.incremental_mode {
        IncrementalMode::UrlSet => previous.iter().map(|s| s.url.clone()).collect::<HashSet<_>>(),
        IncrementalMode::StoreId => previous.iter().map(|s| s.store_id.clone()).collect::<HashSet<_>>(),
    });

    tracker.advance_phase("extracting")?;
    let mut outcome = run.run(kind.as_ref(), overrides.resume, incremental_skip.as_ref()).await?;

    if let Some(limit) = overrides.limit {
        outcome.stores.truncate(limit);
    }

    tracker.advance_phase("detecting_changes")?;
    let report = diff(&previous, &outcome.stores, &cfg.identity_fields);

    if !overrides.test_mode {
        save_stores_snapshot(data_dir, retailer_key, &outcome.stores)?;
        save_change_report(data_dir, retailer_key, &report)?;
        checkpoint_store.clear()?;
    }

    Ok(RunStats {
        discovered: outcome.total_identifiers as u64,
        extracted: outcome.stores.len() as u64,
        skipped: outcome.skipped as u64,
        failed: outcome.failed as u64,
        new: report.new.len() as u64,
        closed: report.closed.len() as u64,
        modified: report.modified.len() as u64,
        unchanged: report.unchanged_count as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(enabled: bool, group: Option<&str>) -> RetailerConfig {
        RetailerConfig {
            name: "Acme".into(),
            enabled,
            base_url: "https://example.com".into(),
            discovery_method: DiscoveryMethod::Sitemap,
            sitemap_url_pattern: None,
            geo_queries: vec![],
            group: group.map(str::to_string),
            min_delay: 1.0,
            max_delay: 2.0,
            delays: None,
            pause_50_requests: harvester_common::config::DelayRange { min: 1.0, max: 2.0 },
            pause_200_requests: harvester_common::config::DelayRange { min: 1.0, max: 2.0 },
            rate_limit_base_wait: 30.0,
            max_retries: 3,
            retry_delay: 5.0,
            parallel_workers: 2,
            checkpoint_interval: 25,
            proxy_mode: ProxyMode::Direct,
            incremental_mode: harvester_common::IncrementalMode::UrlSet,
            identity_fields: vec!["name".into()],
        }
    }

    fn file_with(entries: Vec<(&str, RetailerConfig)>) -> RetailersFile {
        RetailersFile {
            retailers: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn all_flag_selects_every_enabled_retailer() {
        let file = file_with(vec![
            ("acme", cfg(true, None)),
            ("bravo", cfg(false, None)),
        ]);
        let selected = select_retailers(&file, true, &[], &None, &[]);
        assert_eq!(selected, vec!["acme".to_string()]);
    }

    #[test]
    fn retailer_flag_overrides_all_and_group() {
        let file = file_with(vec![("acme", cfg(true, None)), ("bravo", cfg(true, None))]);
        let selected = select_retailers(&file, true, &["bravo".to_string()], &None, &[]);
        assert_eq!(selected, vec!["bravo".to_string()]);
    }

    #[test]
    fn group_flag_selects_matching_group_only() {
        let file = file_with(vec![
            ("acme", cfg(true, Some("grocery"))),
            ("bravo", cfg(true, Some("pharmacy"))),
        ]);
        let selected = select_retailers(&file, false, &[], &Some("grocery".to_string()), &[]);
        assert_eq!(selected, vec!["acme".to_string()]);
    }

    #[test]
    fn exclude_removes_from_the_selection() {
        let file = file_with(vec![("acme", cfg(true, None)), ("bravo", cfg(true, None))]);
        let selected = select_retailers(&file, true, &[], &None, &["bravo".to_string()]);
        assert_eq!(selected, vec!["acme".to_string()]);
    }
}
