//! Link and metadata extraction (§4.5 steps 7-8): anchors (dropping
//! `javascript:` and bare `#`), title/meta/heading/image-alt extraction.

use crate::normalize::resolve_and_normalize;
use scraper::{Html, Selector};
use sitesearch_common::model::{truncate_title, DocumentMetadata};
use std::collections::HashMap;

/// Extract every outbound anchor href, resolved against `base_url` and
/// normalized, dropping `javascript:` targets and bare `#` fragments
/// (§4.5 step 7).
pub fn extract_links(base_url: &str, html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let trimmed = href.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("javascript:") {
            continue;
        }
        if let Some(resolved) = resolve_and_normalize(base_url, trimmed) {
            links.push(resolved);
        }
    }
    links
}

/// Extract page metadata (§4.5 step 8): title (DOM `<title>` or
/// URL-derived basename, clipped to 250 chars), `description`/`keywords`/
/// OpenGraph meta tags, headings `h1..h6`, and image `alt` text.
pub fn extract_metadata(url: &str, html: &str) -> DocumentMetadata {
    let document = Html::parse_document(html);

    let title = extract_title(&document).unwrap_or_else(|| title_from_url(url));
    let title = truncate_title(&title);

    let mut description = None;
    let mut keywords = Vec::new();
    let mut open_graph = HashMap::new();

    if let Ok(meta_selector) = Selector::parse("meta") {
        for element in document.select(&meta_selector) {
            let value = element.value();
            let content = value.attr("content").unwrap_or("").to_string();
            if content.is_empty() {
                continue;
            }
            if let Some(name) = value.attr("name") {
                match name {
                    "description" => description = Some(content.clone()),
                    "keywords" => {
                        keywords = content.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
                    }
                    _ => {}
                }
            }
            if let Some(property) = value.attr("property") {
                if let Some(og_key) = property.strip_prefix("og:") {
                    open_graph.insert(og_key.to_string(), content);
                }
            }
        }
    }

    let mut headings: HashMap<String, Vec<String>> = HashMap::new();
    for level in 1..=6 {
        let tag = format!("h{level}");
        let Ok(selector) = Selector::parse(&tag) else { continue };
        let texts: Vec<String> = document
            .select(&selector)
            .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !texts.is_empty() {
            headings.insert(tag, texts);
        }
    }

    let mut image_alts = Vec::new();
    if let Ok(img_selector) = Selector::parse("img[alt]") {
        for element in document.select(&img_selector) {
            if let Some(alt) = element.value().attr("alt") {
                let trimmed = alt.trim();
                if !trimmed.is_empty() {
                    image_alts.push(trimmed.to_string());
                }
            }
        }
    }

    DocumentMetadata {
        title: Some(title),
        description,
        keywords,
        headings,
        image_alts,
        open_graph,
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|s| !s.is_empty())
}

fn title_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut segs| segs.next_back().map(str::to_string)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_resolves_links() {
        let html = r#"<a href="/a">A</a><a href="https://b.test/c">C</a><a href="#frag">skip</a><a href="javascript:void(0)">skip</a>"#;
        let links = extract_links("https://a.test/dir/", html);
        assert!(links.iter().any(|l| l == "https://a.test/a/"));
        assert!(links.iter().any(|l| l == "https://b.test/c/"));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn extracts_title_from_dom() {
        let html = "<html><head><title>My Page</title></head><body></body></html>";
        let meta = extract_metadata("https://a.test/page", html);
        assert_eq!(meta.title.as_deref(), Some("My Page"));
    }

    #[test]
    fn falls_back_to_url_basename_when_no_title() {
        let html = "<html><body>No title here</body></html>";
        let meta = extract_metadata("https://a.test/about-us", html);
        assert_eq!(meta.title.as_deref(), Some("about-us"));
    }

    #[test]
    fn extracts_description_keywords_and_open_graph() {
        let html = r#"<html><head>
            <meta name="description" content="A page about things">
            <meta name="keywords" content="a, b, c">
            <meta property="og:title" content="OG Title">
        </head><body></body></html>"#;
        let meta = extract_metadata("https://a.test/", html);
        assert_eq!(meta.description.as_deref(), Some("A page about things"));
        assert_eq!(meta.keywords, vec!["a", "b", "c"]);
        assert_eq!(meta.open_graph.get("title").map(String::as_str), Some("OG Title"));
    }

    #[test]
    fn extracts_headings_and_image_alts() {
        let html = r#"<html><body><h1>Heading One</h1><h2>Heading Two</h2><img src="x.png" alt="a picture"></body></html>"#;
        let meta = extract_metadata("https://a.test/", html);
        assert_eq!(meta.headings.get("h1"), Some(&vec!["Heading One".to_string()]));
        assert_eq!(meta.headings.get("h2"), Some(&vec!["Heading Two".to_string()]));
        assert_eq!(meta.image_alts, vec!["a picture".to_string()]);
    }
}
