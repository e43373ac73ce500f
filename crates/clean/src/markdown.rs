//! HTML→Markdown conversion (§4.2 step 6) and the base64-image sanitizer
//! shared by every strategy (§4.2 final paragraph).

use regex::Regex;
use std::sync::LazyLock;

static BASE64_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/(?:png|jpeg|jpg);base64,[A-Za-z0-9+/=]*")
        .expect("hardcoded base64 image regex is valid")
});

/// Convert an HTML fragment to markdown with links, images, and tables
/// preserved, using `htmd` the way the teacher's markdown conversion
/// pipeline does.
pub fn html_to_markdown(html: &str) -> String {
    htmd::convert(html).unwrap_or_else(|_| html.to_string())
}

/// Replace `data:image/{png,jpeg,jpg};base64,...` link targets with the
/// literal `base64_image`, applied uniformly across every strategy.
pub fn sanitize_base64_images(text: &str) -> String {
    BASE64_IMAGE_RE.replace_all(text, "base64_image").into_owned()
}

/// Remove breadcrumb navigation blocks before converting to markdown
/// (§4.2 steps 4-5 "strip known faceted-filter blocks" / "strip
/// breadcrumbs").
pub fn strip_breadcrumbs(html: &str) -> String {
    crate::html::strip_selectors(
        html,
        &[
            ".breadcrumb",
            ".breadcrumbs",
            "[aria-label='breadcrumb']",
            "nav.breadcrumb",
        ],
    )
}

/// Remove the faceted-filter sidebar blocks that accompany search result
/// pages (§4.2 step 4).
pub fn strip_facet_filters(html: &str) -> String {
    crate::html::strip_selectors(
        html,
        &[".facet-filters", ".search-filters", ".filter-panel", "form.facets"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_basic_html_to_markdown() {
        let html = "<h1>Title</h1><p>Body <a href=\"https://x.test\">link</a></p>";
        let md = html_to_markdown(html);
        assert!(md.contains("Title"));
        assert!(md.contains("[link](https://x.test)"));
    }

    #[test]
    fn sanitizes_base64_png_image() {
        let text = "![x](data:image/png;base64,iVBORw0KGgoAAAANSU)";
        let out = sanitize_base64_images(text);
        assert_eq!(out, "![x](base64_image)");
    }

    #[test]
    fn sanitizes_base64_jpeg_image() {
        let text = "data:image/jpeg;base64,/9j/4AAQSkZJRg==";
        assert_eq!(sanitize_base64_images(text), "base64_image");
    }

    #[test]
    fn leaves_non_data_uri_images_untouched() {
        let text = "![x](https://example.test/image.png)";
        assert_eq!(sanitize_base64_images(text), text);
    }

    #[test]
    fn strips_breadcrumb_nav() {
        let html = "<nav class=\"breadcrumb\">Home &gt; Docs</nav><p>Body</p>";
        let stripped = strip_breadcrumbs(html);
        assert!(!stripped.contains("breadcrumb") || !stripped.contains("Home"));
        assert!(stripped.contains("Body"));
    }
}
