//! One struct per discovery strategy named in spec §4.4.

mod extract;
mod html_crawl;
mod locator_api;
mod sitemap;
mod sitemap_gzip;
mod sitemap_paginated;

pub use html_crawl::HtmlCrawlKind;
pub use locator_api::LocatorApiKind;
pub use sitemap::SitemapKind;
pub use sitemap_gzip::SitemapGzipKind;
pub use sitemap_paginated::SitemapPaginatedKind;

use regex::Regex;

/// Compile the retailer's `sitemap_url_pattern`, if any, once per kind
/// instance rather than once per candidate URL.
fn compile_pattern(pattern: &Option<String>) -> Result<Option<Regex>, crate::ScoutError> {
    match pattern {
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|e| crate::ScoutError::Discovery(format!("invalid sitemap_url_pattern: {e}"))),
        None => Ok(None),
    }
}

/// Extract `<loc>...</loc>` entries from a sitemap XML document.
fn extract_locs(xml: &str) -> Result<Vec<String>, crate::ScoutError> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut in_loc = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(t)) if in_loc => {
                locs.push(t.unescape().map_err(quick_xml::Error::from)?.into_owned());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(crate::ScoutError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(locs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_locs_reads_every_loc_entry() {
        let xml = r#"<?xml version="1.0"?><urlset>
            <url><loc>https://acme.com/stores/1</loc></url>
            <url><loc>https://acme.com/stores/2</loc></url>
        </urlset>"#;
        let locs = extract_locs(xml).unwrap();
        assert_eq!(locs, vec!["https://acme.com/stores/1", "https://acme.com/stores/2"]);
    }
}
