//! The ordered cleaning strategy dispatch table (§4.2). Each strategy is a
//! `(should_handle, clean)` pair; the first match wins. If none match, the
//! raw content passes through unchanged with a warning — never a hard
//! failure (§7 "No cleaning strategy matches").

use crate::content::RawContent;
use crate::converter::DocumentConverter;
use crate::markdown::{html_to_markdown, sanitize_base64_images, strip_breadcrumbs, strip_facet_filters};
use crate::html;
use sitesearch_common::Result;
use std::sync::Arc;
use tracing::warn;

/// URL path fragments that mark a "search page" (§4.2 step 4).
const SEARCH_PAGE_MARKERS: &[&str] = &["teacher-search", "student-search", "PhDStudents"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    /// A strategy matched and produced cleaned text.
    Cleaned,
    /// No strategy matched; the raw content passed through unchanged.
    PassThrough,
}

/// Dispatch `content` through the ordered strategy table and return
/// `(clean_text, outcome)`.
pub async fn clean(
    url: &str,
    mimetype: &str,
    content: &RawContent,
    converter: &Arc<dyn DocumentConverter>,
) -> Result<(String, CleanOutcome)> {
    if mimetype == "application/pdf" {
        return Ok((clean_via_converter(content, mimetype, converter).await?, CleanOutcome::Cleaned));
    }

    if mimetype == "application/vnd.openxmlformats-officedocument.wordprocessingml.document" {
        return Ok((clean_via_converter(content, mimetype, converter).await?, CleanOutcome::Cleaned));
    }

    if is_other_office_format(mimetype) {
        return Ok((clean_via_converter(content, mimetype, converter).await?, CleanOutcome::Cleaned));
    }

    if mimetype == "text/html" {
        if let Some(text) = content.as_text() {
            if is_search_page(url, text) {
                return Ok((clean_search_page(text), CleanOutcome::Cleaned));
            }
            if is_common_content_page(url, text) {
                return Ok((clean_common_content_page(text), CleanOutcome::Cleaned));
            }
            return Ok((clean_markdown_from_html(text), CleanOutcome::Cleaned));
        }
    }

    if mimetype.starts_with("text/") {
        if let Some(text) = content.as_text() {
            return Ok((clean_plain_text(text), CleanOutcome::Cleaned));
        }
    }

    warn!(url, mimetype, "no cleaning strategy matched; passing raw content through");
    let raw = match content {
        RawContent::Text(s) => s.clone(),
        RawContent::Binary(b) => String::from_utf8_lossy(b).into_owned(),
    };
    Ok((sanitize_base64_images(&raw), CleanOutcome::PassThrough))
}

async fn clean_via_converter(
    content: &RawContent,
    mimetype: &str,
    converter: &Arc<dyn DocumentConverter>,
) -> Result<String> {
    let bytes = match content {
        RawContent::Binary(b) => b.clone(),
        RawContent::Text(s) => s.clone().into_bytes(),
    };
    let markdown = converter.convert(&bytes, mimetype).await?;
    let flattened = crate::converter::flatten_markdown_tables(&markdown);
    Ok(collapse_and_sanitize(&flattened))
}

fn is_search_page(url: &str, html: &str) -> bool {
    SEARCH_PAGE_MARKERS.iter().any(|m| url.contains(m)) && html::has_id(html, "content")
}

fn is_common_content_page(url: &str, html: &str) -> bool {
    url.contains("page/") && html::has_id(html, "main")
}

fn clean_search_page(html_doc: &str) -> String {
    let subtree = html::extract_by_id(html_doc, "content").unwrap_or_else(|| html_doc.to_string());
    let without_facets = strip_facet_filters(&subtree);
    collapse_and_sanitize(&html_to_markdown(&without_facets))
}

fn clean_common_content_page(html_doc: &str) -> String {
    let subtree = html::extract_by_id(html_doc, "main").unwrap_or_else(|| html_doc.to_string());
    let without_breadcrumbs = strip_breadcrumbs(&subtree);
    collapse_and_sanitize(&html_to_markdown(&without_breadcrumbs))
}

fn clean_markdown_from_html(html_doc: &str) -> String {
    let base = html::extract_by_id(html_doc, "main").unwrap_or_else(|| html_doc.to_string());
    let without_breadcrumbs = strip_breadcrumbs(&base);
    collapse_and_sanitize(&html_to_markdown(&without_breadcrumbs))
}

fn clean_plain_text(text: &str) -> String {
    collapse_and_sanitize(text)
}

fn is_other_office_format(mimetype: &str) -> bool {
    matches!(
        mimetype,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            | "application/vnd.ms-excel"
            | "application/vnd.ms-powerpoint"
            | "application/xml"
            | "text/xml"
    )
}

fn collapse_and_sanitize(text: &str) -> String {
    sanitize_base64_images(&html::collapse_whitespace(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeConverter(&'static str);

    #[async_trait]
    impl DocumentConverter for FakeConverter {
        async fn convert(&self, _content: &[u8], _mimetype: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn converter(out: &'static str) -> Arc<dyn DocumentConverter> {
        Arc::new(FakeConverter(out))
    }

    #[tokio::test]
    async fn pdf_routes_through_converter() {
        let (text, outcome) = clean(
            "https://a.test/doc.pdf",
            "application/pdf",
            &RawContent::Binary(b"%PDF-1.4".to_vec()),
            &converter("# Heading\n\nBody"),
        )
        .await
        .unwrap();
        assert_eq!(outcome, CleanOutcome::Cleaned);
        assert!(text.contains("Heading"));
    }

    #[tokio::test]
    async fn search_page_extracts_content_subtree() {
        let html = "<html><body><nav>Main Nav</nav><div id=\"content\"><p>Results here</p></div></body></html>";
        let (text, outcome) = clean(
            "https://a.test/teacher-search?q=x",
            "text/html",
            &RawContent::Text(html.to_string()),
            &converter(""),
        )
        .await
        .unwrap();
        assert_eq!(outcome, CleanOutcome::Cleaned);
        assert!(text.contains("Results here"));
        assert!(!text.contains("Main Nav"));
    }

    #[tokio::test]
    async fn common_content_page_extracts_main_subtree() {
        let html = "<html><body><div id=\"main\"><p>Article body</p></div></body></html>";
        let (text, _) = clean(
            "https://a.test/page/about",
            "text/html",
            &RawContent::Text(html.to_string()),
            &converter(""),
        )
        .await
        .unwrap();
        assert!(text.contains("Article body"));
    }

    #[tokio::test]
    async fn arbitrary_html_converts_to_markdown() {
        let html = "<html><body><h1>Title</h1><p>Body text</p></body></html>";
        let (text, _) = clean(
            "https://a.test/",
            "text/html",
            &RawContent::Text(html.to_string()),
            &converter(""),
        )
        .await
        .unwrap();
        assert!(text.contains("Title"));
        assert!(text.contains("Body text"));
    }

    #[tokio::test]
    async fn plain_text_collapses_whitespace() {
        let (text, outcome) = clean(
            "https://a.test/robots.txt",
            "text/plain",
            &RawContent::Text("  Hello   world  \n\n  ".to_string()),
            &converter(""),
        )
        .await
        .unwrap();
        assert_eq!(outcome, CleanOutcome::Cleaned);
        assert_eq!(text, "Hello world");
    }

    #[tokio::test]
    async fn unsupported_mime_passes_through_unchanged() {
        let (text, outcome) = clean(
            "https://a.test/file.bin",
            "application/octet-stream",
            &RawContent::Text("raw-bytes-as-text".to_string()),
            &converter(""),
        )
        .await
        .unwrap();
        assert_eq!(outcome, CleanOutcome::PassThrough);
        assert_eq!(text, "raw-bytes-as-text");
    }
}
