//! Scraper-kind framework (spec §4.4): a two-phase `discover`/`extract`
//! contract plus the checkpointed worker-pool loop that drives any
//! `ScraperKind` to completion. Grounded on the teacher's `ContentFetcher`
//! trait (`pipeline/traits.rs`) for the trait-over-network-dependency shape,
//! and on `PageScraper`/`FallbackScraper` (`scraper.rs`) for the
//! one-struct-per-strategy layout.

pub mod error;
pub mod kinds;

pub use error::ScoutError;

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use harvester_cache::Cache;
use harvester_checkpoint::{Checkpoint, CheckpointStore};
use harvester_common::{validate_and_sanitize, RetailerConfig, Store};
use harvester_pipeline::{Pipeline, PipelineOptions};

/// Everything a `ScraperKind` needs to talk to the network and to its own
/// retailer's configuration. Borrowed for the lifetime of one run.
pub struct RetailerContext<'a> {
    pub retailer_key: String,
    pub config: &'a RetailerConfig,
    pub pipeline: &'a Pipeline,
    pub cache: &'a Cache,
    pub options: PipelineOptions,
}

/// Outcome of extracting a single discovered identifier (spec §4.4). A
/// three-way result in place of the teacher's "return Ok(empty) to mean
/// skip" convention, so the loop can count skips and failures separately
/// without inspecting string content.
#[derive(Debug)]
pub enum ExtractOutcome {
    Extracted(Store),
    Skipped(String),
    Failed(String),
}

/// A discovery + extraction strategy. `discover` enumerates identifiers
/// (usually URLs); `extract` turns one identifier into a `Store`.
#[async_trait]
pub trait ScraperKind: Send + Sync {
    async fn discover(&self, ctx: &RetailerContext<'_>) -> Result<Vec<String>, ScoutError>;
    async fn extract(&self, ctx: &RetailerContext<'_>, identifier: &str) -> ExtractOutcome;
}

#[derive(Debug, Default)]
pub struct HarvestOutcome {
    pub stores: Vec<Store>,
    pub total_identifiers: usize,
    pub skipped: usize,
    pub failed: usize,
    pub resumed_from_checkpoint: bool,
}

/// Drives one `ScraperKind` through discovery, checkpointed extraction, and
/// validation (spec §4.4, §8 invariant 3). Owns nothing network-shaped
/// itself — all of that lives on `RetailerContext`.
pub struct HarvestRun<'a> {
    pub ctx: RetailerContext<'a>,
    pub checkpoint_store: &'a CheckpointStore,
}

/// Returns true when `identifier` matches one of the stores already present
/// in `stores_latest.json` (spec §6 `--incremental`). `skip_keys` holds
/// either URLs or store ids depending on the retailer's configured
/// `IncrementalMode`; a bare URL identifier is checked directly, a
/// locator-API identifier (a JSON record) is checked against its own id/url
/// fields.
fn identifier_already_present(identifier: &str, skip_keys: &HashSet<String>) -> bool {
    if skip_keys.contains(identifier) {
        return true;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(identifier) {
        const FIELDS: [&str; 7] = ["id", "storeId", "store_id", "storeNumber", "url", "storeUrl", "detailUrl"];
        return FIELDS
            .iter()
            .filter_map(|key| value.get(key).and_then(|v| v.as_str()))
            .any(|s| skip_keys.contains(s));
    }
    false
}

impl<'a> HarvestRun<'a> {
    pub async fn run(
        &self,
        kind: &dyn ScraperKind,
        resume: bool,
        incremental_skip: Option<&HashSet<String>>,
    ) -> Result<HarvestOutcome, ScoutError> {
        let mut checkpoint = if resume {
            self.checkpoint_store.load().unwrap_or_default()
        } else {
            Checkpoint::new()
        };
        let resumed_from_checkpoint = resume && !checkpoint.completed_identifiers.is_empty();

        let identifiers = kind.discover(&self.ctx).await?;
        let total_identifiers = identifiers.len();
        info!(
            retailer = %self.ctx.retailer_key,
            total_identifiers,
            already_completed = checkpoint.completed_identifiers.len(),
            "discovery complete"
        );

        let mut stores = checkpoint.partial_stores.clone();
        let mut skipped = 0usize;
        let mut failed = 0usize;

        let mut pending = Vec::with_capacity(identifiers.len());
        for id in identifiers {
            if checkpoint.completed_identifiers.contains(&id) {
                continue;
            }
            if let Some(skip_keys) = incremental_skip {
                if identifier_already_present(&id, skip_keys) {
                    skipped += 1;
                    continue;
                }
            }
            pending.push(id);
        }
        let workers = self.ctx.config.parallel_workers.max(1);
        let checkpoint_interval = self.ctx.config.checkpoint_interval.max(1) as usize;

        let ctx = &self.ctx;
        let mut results = stream::iter(pending)
            .map(|identifier| async move {
                let outcome = kind.extract(ctx, &identifier).await;
                (identifier, outcome)
            })
            .buffer_unordered(workers);

        let mut processed_since_checkpoint = 0usize;
        while let Some((identifier, outcome)) = results.next().await {
            match outcome {
                ExtractOutcome::Extracted(store) => match validate_and_sanitize(store) {
                    Ok(validated) => {
                        checkpoint.mark_completed(identifier, Some(validated.clone()));
                        stores.push(validated);
                    }
                    Err(e) => {
                        warn!(retailer = %self.ctx.retailer_key, error = %e, "validation rejected store");
                        checkpoint.mark_completed(identifier, None);
                        failed += 1;
                    }
                },
                ExtractOutcome::Skipped(reason) => {
                    debug!(retailer = %self.ctx.retailer_key, identifier, reason, "extraction skipped");
                    checkpoint.mark_completed(identifier, None);
                    skipped += 1;
                }
                ExtractOutcome::Failed(reason) => {
                    warn!(retailer = %self.ctx.retailer_key, identifier, reason, "extraction failed");
                    failed += 1;
                }
            }

            processed_since_checkpoint += 1;
            if processed_since_checkpoint >= checkpoint_interval {
                self.checkpoint_store.save(&checkpoint)?;
                processed_since_checkpoint = 0;
            }
        }

        self.checkpoint_store.save(&checkpoint)?;

        Ok(HarvestOutcome {
            stores,
            total_identifiers,
            skipped,
            failed,
            resumed_from_checkpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use harvester_common::{DiscoveryMethod, IncrementalMode, ProxyMode};
    use harvester_pacer::{Pacer, PacerConfig, DelayRange as PacerDelayRange};
    use harvester_transport::{Transport, TransportConfig};

    struct CountingKind;

    #[async_trait]
    impl ScraperKind for CountingKind {
        async fn discover(&self, _ctx: &RetailerContext<'_>) -> Result<Vec<String>, ScoutError> {
            Ok(vec!["a".into(), "b".into(), "c".into()])
        }

        async fn extract(&self, _ctx: &RetailerContext<'_>, identifier: &str) -> ExtractOutcome {
            if identifier == "b" {
                return ExtractOutcome::Skipped("no address".into());
            }
            ExtractOutcome::Extracted(Store {
                store_id: identifier.into(),
                name: format!("Store {identifier}"),
                street_address: "1 Main St".into(),
                city: "Springfield".into(),
                state: "IL".into(),
                postal_code: "62704".into(),
                country: "US".into(),
                latitude: None,
                longitude: None,
                phone: "555-0100".into(),
                url: format!("https://example.com/{identifier}"),
                scraped_at: Utc::now(),
                attributes: serde_json::Map::new(),
            })
        }
    }

    fn test_config() -> RetailerConfig {
        RetailerConfig {
            name: "Acme".into(),
            enabled: true,
            base_url: "https://example.com".into(),
            discovery_method: DiscoveryMethod::Sitemap,
            sitemap_url_pattern: None,
            geo_queries: vec![],
            group: None,
            min_delay: 0.0,
            max_delay: 0.0,
            delays: None,
            pause_50_requests: PacerDelayRangeCfg { min: 0.0, max: 0.0 },
            pause_200_requests: PacerDelayRangeCfg { min: 0.0, max: 0.0 },
            rate_limit_base_wait: 0.0,
            max_retries: 0,
            retry_delay: 0.0,
            parallel_workers: 2,
            checkpoint_interval: 1,
            proxy_mode: ProxyMode::Direct,
            incremental_mode: IncrementalMode::UrlSet,
            identity_fields: vec!["name".into()],
        }
    }

    use harvester_common::config::DelayRange as PacerDelayRangeCfg;

    #[tokio::test]
    async fn run_classifies_extracted_and_skipped_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_store = CheckpointStore::new(dir.path(), "acme");
        let config = test_config();

        let transport = Transport::new(TransportConfig {
            mode: ProxyMode::Direct,
            credentials: Default::default(),
            proxy_endpoint: None,
            web_scraper_api_endpoint: None,
            timeout: std::time::Duration::from_secs(5),
        })
        .unwrap();
        let pacer = Pacer::new(
            "acme",
            PacerConfig {
                direct: PacerDelayRange::new(0.0, 0.0),
                proxied: PacerDelayRange::new(0.0, 0.0),
                pause_50_requests: PacerDelayRange::new(0.0, 0.0),
                pause_200_requests: PacerDelayRange::new(0.0, 0.0),
                rate_limit_base_wait: 0.0,
            },
        );
        let pipeline = Pipeline::new(transport, pacer, ProxyMode::Direct, 0, 0.0);
        let cache = Cache::new(dir.path(), "acme", "response_bodies", 30);

        let ctx = RetailerContext {
            retailer_key: "acme".into(),
            config: &config,
            pipeline: &pipeline,
            cache: &cache,
            options: PipelineOptions::default(),
        };

        let run = HarvestRun {
            ctx,
            checkpoint_store: &checkpoint_store,
        };

        let outcome = run.run(&CountingKind, false, None).await.unwrap();
        assert_eq!(outcome.stores.len(), 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.total_identifiers, 3);

        let checkpoint = checkpoint_store.load().unwrap();
        assert_eq!(checkpoint.completed_identifiers.len(), 3);
    }

    #[tokio::test]
    async fn resume_skips_already_completed_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_store = CheckpointStore::new(dir.path(), "acme");
        let mut cp = Checkpoint::new();
        cp.mark_completed("a", None);
        checkpoint_store.save(&cp).unwrap();

        let config = test_config();
        let transport = Transport::new(TransportConfig {
            mode: ProxyMode::Direct,
            credentials: Default::default(),
            proxy_endpoint: None,
            web_scraper_api_endpoint: None,
            timeout: std::time::Duration::from_secs(5),
        })
        .unwrap();
        let pacer = Pacer::new(
            "acme",
            PacerConfig {
                direct: PacerDelayRange::new(0.0, 0.0),
                proxied: PacerDelayRange::new(0.0, 0.0),
                pause_50_requests: PacerDelayRange::new(0.0, 0.0),
                pause_200_requests: PacerDelayRange::new(0.0, 0.0),
                rate_limit_base_wait: 0.0,
            },
        );
        let pipeline = Pipeline::new(transport, pacer, ProxyMode::Direct, 0, 0.0);
        let cache = Cache::new(dir.path(), "acme", "response_bodies", 30);

        let ctx = RetailerContext {
            retailer_key: "acme".into(),
            config: &config,
            pipeline: &pipeline,
            cache: &cache,
            options: PipelineOptions::default(),
        };
        let run = HarvestRun {
            ctx,
            checkpoint_store: &checkpoint_store,
        };

        let outcome = run.run(&CountingKind, true, None).await.unwrap();
        assert!(outcome.resumed_from_checkpoint);
        // "a" was already completed; only "b" (skip) and "c" (extract) run.
        assert_eq!(outcome.stores.len(), 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn incremental_skip_filters_pending_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_store = CheckpointStore::new(dir.path(), "acme");
        let config = test_config();
        let transport = Transport::new(TransportConfig {
            mode: ProxyMode::Direct,
            credentials: Default::default(),
            proxy_endpoint: None,
            web_scraper_api_endpoint: None,
            timeout: std::time::Duration::from_secs(5),
        })
        .unwrap();
        let pacer = Pacer::new(
            "acme",
            PacerConfig {
                direct: PacerDelayRange::new(0.0, 0.0),
                proxied: PacerDelayRange::new(0.0, 0.0),
                pause_50_requests: PacerDelayRange::new(0.0, 0.0),
                pause_200_requests: PacerDelayRange::new(0.0, 0.0),
                rate_limit_base_wait: 0.0,
            },
        );
        let pipeline = Pipeline::new(transport, pacer, ProxyMode::Direct, 0, 0.0);
        let cache = Cache::new(dir.path(), "acme", "response_bodies", 30);

        let ctx = RetailerContext {
            retailer_key: "acme".into(),
            config: &config,
            pipeline: &pipeline,
            cache: &cache,
            options: PipelineOptions::default(),
        };
        let run = HarvestRun { ctx, checkpoint_store: &checkpoint_store };

        // "a" is the discovered identifier itself for the sitemap-style kinds
        // under test, so it doubles as the URL already present upstream.
        let skip: std::collections::HashSet<String> = ["a".to_string()].into_iter().collect();
        let outcome = run.run(&CountingKind, false, Some(&skip)).await.unwrap();
        assert_eq!(outcome.skipped, 2); // "a" incrementally skipped, "b" extract-skipped
        assert_eq!(outcome.stores.len(), 1); // only "c"
    }
}
