use async_trait::async_trait;
use regex::Regex;

use crate::kinds::{compile_pattern, extract_locs};
use crate::{ExtractOutcome, RetailerContext, ScoutError, ScraperKind};

/// Discovery stops as soon as a page comes back empty or 404 — most
/// sitemap-index implementations number pages densely from 1, so a gap
/// reliably marks the end.
const MAX_PAGES: u32 = 2000;

/// Sitemap split across `{base_url}/sitemap-{page}.xml` pages (spec §4.4).
/// Re-walks every page on every run — discovery isn't checkpointed, only
/// per-identifier extraction is (spec §3's checkpoint is keyed by
/// identifier, not by discovery progress).
pub struct SitemapPaginatedKind {
    pattern: Option<Regex>,
}

impl SitemapPaginatedKind {
    pub fn new(sitemap_url_pattern: &Option<String>) -> Result<Self, ScoutError> {
        Ok(Self {
            pattern: compile_pattern(sitemap_url_pattern)?,
        })
    }
}

#[async_trait]
impl ScraperKind for SitemapPaginatedKind {
    async fn discover(&self, ctx: &RetailerContext<'_>) -> Result<Vec<String>, ScoutError> {
        let base = ctx.config.base_url.trim_end_matches('/');
        let mut all_locs = Vec::new();

        for page in 1..=MAX_PAGES {
            let page_url = format!("{base}/sitemap-{page}.xml");
            let resp = ctx
                .pipeline
                .get(&page_url, ctx.options.clone())
                .await
                .map_err(ScoutError::from)?;

            if resp.status_code == 404 {
                break;
            }
            if resp.status_code != 200 {
                return Err(ScoutError::Discovery(format!(
                    "paginated sitemap page {page} returned status {}",
                    resp.status_code
                )));
            }

            let locs = extract_locs(&resp.text)?;
            if locs.is_empty() {
                break;
            }
            all_locs.extend(locs);

            if page == MAX_PAGES {
                tracing::warn!(retailer = %ctx.retailer_key, "paginated sitemap discovery hit MAX_PAGES cap");
            }
        }

        let filtered = match &self.pattern {
            Some(re) => all_locs.into_iter().filter(|url| re.is_match(url)).collect(),
            None => all_locs,
        };
        Ok(filtered)
    }

    async fn extract(&self, ctx: &RetailerContext<'_>, identifier: &str) -> ExtractOutcome {
        let resp = match ctx.pipeline.get(identifier, ctx.options.clone()).await {
            Ok(r) => r,
            Err(e) => return ExtractOutcome::Failed(e.to_string()),
        };
        if resp.status_code == 404 {
            return ExtractOutcome::Skipped("404".into());
        }
        match crate::kinds::extract::extract_from_html(&resp.text, identifier) {
            Some(store) => ExtractOutcome::Extracted(store),
            None => ExtractOutcome::Skipped("no recognizable store data".into()),
        }
    }
}
