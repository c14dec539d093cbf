use async_trait::async_trait;
use flate2::read::GzDecoder;
use regex::Regex;
use std::io::Read;

use crate::kinds::{compile_pattern, extract_locs};
use crate::{ExtractOutcome, RetailerContext, ScoutError, ScraperKind};

/// Same as `SitemapKind` but the sitemap itself is gzip-compressed at
/// `{base_url}/sitemap.xml.gz` (spec §4.4).
pub struct SitemapGzipKind {
    pattern: Option<Regex>,
}

impl SitemapGzipKind {
    pub fn new(sitemap_url_pattern: &Option<String>) -> Result<Self, ScoutError> {
        Ok(Self {
            pattern: compile_pattern(sitemap_url_pattern)?,
        })
    }
}

#[async_trait]
impl ScraperKind for SitemapGzipKind {
    async fn discover(&self, ctx: &RetailerContext<'_>) -> Result<Vec<String>, ScoutError> {
        let sitemap_url = format!("{}/sitemap.xml.gz", ctx.config.base_url.trim_end_matches('/'));
        let resp = ctx
            .pipeline
            .get(&sitemap_url, ctx.options.clone())
            .await
            .map_err(ScoutError::from)?;

        if resp.status_code != 200 {
            return Err(ScoutError::Discovery(format!(
                "gzip sitemap fetch returned status {}",
                resp.status_code
            )));
        }

        let mut xml = String::new();
        GzDecoder::new(resp.content.as_slice())
            .read_to_string(&mut xml)
            .map_err(ScoutError::Io)?;

        let locs = extract_locs(&xml)?;
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
