//! Sitemap discovery (§4.5 "Sitemap discovery"): fetch `robots.txt`, parse
//! `Sitemap:` entries, fetch each XML sitemap and extract `<loc>`, falling
//! back to the well-known sitemap paths if `robots.txt` names none.

use crate::fetch::{FetchClient, FetchOutcome};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use sitesearch_common::Result;
use tracing::warn;

/// Well-known sitemap paths tried when `robots.txt` lists none (§4.5).
pub const FALLBACK_SITEMAP_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml", "/sitemap/"];

/// Discover every URL named across a site's sitemap(s), starting from its
/// `robots.txt` and falling back to well-known paths.
pub async fn discover_sitemap_urls(client: &FetchClient, base_url: &str) -> Result<Vec<String>> {
    let mut sitemap_locations = fetch_robots_sitemaps(client, base_url).await;
    if sitemap_locations.is_empty() {
        sitemap_locations = FALLBACK_SITEMAP_PATHS
            .iter()
            .map(|p| join_base(base_url, p))
            .collect();
    }

    let mut urls = Vec::new();
    for location in sitemap_locations {
        match client.fetch(&location).await {
            Ok(FetchOutcome::Ok(resp)) => {
                let body = String::from_utf8_lossy(&resp.body);
                let locs = extract_locs(&body);
                if locs.is_empty() {
                    warn!(location, "sitemap contained no <loc> entries");
                }
                urls.extend(locs);
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(location, error = %e, "failed to fetch sitemap candidate");
            }
        }
    }
    Ok(urls)
}

async fn fetch_robots_sitemaps(client: &FetchClient, base_url: &str) -> Vec<String> {
    let robots_url = join_base(base_url, "/robots.txt");
    match client.fetch(&robots_url).await {
        Ok(FetchOutcome::Ok(resp)) => {
            let body = String::from_utf8_lossy(&resp.body);
            body.lines()
                .filter_map(|line| {
                    let line = line.trim();
                    line.strip_prefix("Sitemap:")
                        .or_else(|| line.strip_prefix("sitemap:"))
                        .map(|rest| rest.trim().to_string())
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Extract every `<loc>...</loc>` text content from a sitemap XML body.
fn extract_locs(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(text)) if in_loc => {
                if let Ok(s) = text.unescape() {
                    locs.push(s.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    locs
}

fn join_base(base_url: &str, path: &str) -> String {
    match url::Url::parse(base_url).and_then(|u| u.join(path)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}{}", base_url.trim_end_matches('/'), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_locs_from_sitemap_xml() {
        let xml = r#"<?xml version="1.0"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>https://a.test/one</loc></url>
                <url><loc>https://a.test/two</loc></url>
            </urlset>"#;
        let locs = extract_locs(xml);
        assert_eq!(locs, vec!["https://a.test/one", "https://a.test/two"]);
    }

    #[test]
    fn extracts_locs_from_sitemap_index() {
        let xml = r#"<sitemapindex><sitemap><loc>https://a.test/sitemap-1.xml</loc></sitemap></sitemapindex>"#;
        assert_eq!(extract_locs(xml), vec!["https://a.test/sitemap-1.xml"]);
    }

    #[test]
    fn returns_empty_for_malformed_xml() {
        assert!(extract_locs("not xml at all").is_empty());
    }

    #[test]
    fn joins_relative_fallback_paths() {
        assert_eq!(join_base("https://a.test", "/sitemap.xml"), "https://a.test/sitemap.xml");
    }
}
