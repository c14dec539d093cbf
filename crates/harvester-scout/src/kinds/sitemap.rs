use async_trait::async_trait;
use regex::Regex;

use crate::kinds::{compile_pattern, extract_locs};
use crate::{ExtractOutcome, RetailerContext, ScoutError, ScraperKind};

/// Discovers store-detail URLs from a plain-text sitemap at
/// `{base_url}/sitemap.xml`, optionally narrowed by `sitemap_url_pattern`.
pub struct SitemapKind {
    pattern: Option<Regex>,
}

impl SitemapKind {
    pub fn new(sitemap_url_pattern: &Option<String>) -> Result<Self, ScoutError> {
        Ok(Self {
            pattern: compile_pattern(sitemap_url_pattern)?,
        })
    }
}

#[async_trait]
impl ScraperKind for SitemapKind {
    async fn discover(&self, ctx: &RetailerContext<'_>) -> Result<Vec<String>, ScoutError> {
        let sitemap_url = format!("{}/sitemap.xml", ctx.config.base_url.trim_end_matches('/'));
        let resp = ctx
            .pipeline
            .get(&sitemap_url, ctx.options.clone())
            .await
            .map_err(ScoutError::from)?;

        if resp.status_code != 200 {
            return Err(ScoutError::Discovery(format!(
                "sitemap fetch returned status {}",
                resp.status_code
            )));
        }

        let locs = extract_locs(&resp.text)?;
        let filtered = match &self.pattern {
            Some(re) => locs.into_iter().filter(|url| re.is_match(url)).collect(),
            None => locs,
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
