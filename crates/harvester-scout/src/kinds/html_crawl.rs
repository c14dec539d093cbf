use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use crate::kinds::compile_pattern;
use crate::{ExtractOutcome, RetailerContext, ScoutError, ScraperKind};

const MAX_DEPTH: u32 = 3;
const MAX_VISITED: usize = 5000;

fn href_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)href=["']([^"'#]+)["']"#).expect("valid regex"))
}

/// Breadth-first crawl from `base_url`, following same-origin links up to
/// `MAX_DEPTH`. `sitemap_url_pattern` (reused here as the store-detail URL
/// filter) decides which visited pages are returned as extraction targets;
/// every other same-origin page is just a stepping stone (spec §4.4).
pub struct HtmlCrawlKind {
    pattern: Option<Regex>,
}

impl HtmlCrawlKind {
    pub fn new(sitemap_url_pattern: &Option<String>) -> Result<Self, ScoutError> {
        Ok(Self {
            pattern: compile_pattern(sitemap_url_pattern)?,
        })
    }
}

#[async_trait]
impl ScraperKind for HtmlCrawlKind {
    async fn discover(&self, ctx: &RetailerContext<'_>) -> Result<Vec<String>, ScoutError> {
        let start = Url::parse(&ctx.config.base_url)
            .map_err(|e| ScoutError::Discovery(format!("invalid base_url: {e}")))?;
        let origin = start.origin();

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        let mut matched = Vec::new();

        queue.push_back((start.to_string(), 0));
        visited.insert(start.to_string());

        while let Some((current, depth)) = queue.pop_front() {
            if visited.len() > MAX_VISITED {
                tracing::warn!(retailer = %ctx.retailer_key, "html_crawl hit MAX_VISITED cap");
                break;
            }

            let resp = match ctx.pipeline.get(&current, ctx.options.clone()).await {
                Ok(r) if r.status_code == 200 => r,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(retailer = %ctx.retailer_key, url = %current, error = %e, "crawl fetch failed");
                    continue;
                }
            };

            let is_detail = self.pattern.as_ref().map(|re| re.is_match(&current)).unwrap_or(false);
            if is_detail {
                matched.push(current.clone());
            }

            if depth >= MAX_DEPTH {
                continue;
            }

            for href in href_pattern().captures_iter(&resp.text).filter_map(|c| c.get(1)) {
                let Ok(joined) = Url::parse(&current).and_then(|base| base.join(href.as_str())) else {
                    continue;
                };
                if joined.origin() != origin {
                    continue;
                }
                let normalized = joined.to_string();
                if visited.insert(normalized.clone()) {
                    queue.push_back((normalized, depth + 1));
                }
            }
        }

        Ok(matched)
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
