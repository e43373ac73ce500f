//! DOM helpers shared by the HTML-driven strategies (§4.2 steps 4-7):
//! subtree extraction by element id, tag stripping, and whitespace/line
//! normalization.

use scraper::{Html, Selector};

/// Tags stripped outright by the "HTML text" strategy (§4.2 step 7).
pub const STRIP_TAGS: &[&str] = &[
    "script", "style", "meta", "link", "noscript", "header", "footer", "nav", "iframe",
];

/// Returns the inner HTML of the first element matching `#id`, if present.
pub fn extract_by_id(html: &str, id: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(&format!("#{id}")).ok()?;
    document.select(&selector).next().map(|el| el.inner_html())
}

/// True if the document has any element with the given `id`.
pub fn has_id(html: &str, id: &str) -> bool {
    let document = Html::parse_document(html);
    match Selector::parse(&format!("#{id}")) {
        Ok(selector) => document.select(&selector).next().is_some(),
        Err(_) => false,
    }
}

/// Remove every element matching any of `selectors` from `html`, returning
/// the serialized remainder. Used to strip breadcrumb/facet blocks (§4.2
/// steps 4-6) before markdown conversion.
pub fn strip_selectors(html: &str, selectors: &[&str]) -> String {
    let document = Html::parse_fragment(html);
    let parsed: Vec<Selector> = selectors.iter().filter_map(|s| Selector::parse(s).ok()).collect();

    let mut to_remove = std::collections::HashSet::new();
    for selector in &parsed {
        for el in document.select(selector) {
            to_remove.insert(el.id());
        }
    }

    let root = document.root_element();
    let mut out = String::new();
    serialize_excluding(&root, &to_remove, &mut out);
    out
}

fn serialize_excluding(
    element: &scraper::ElementRef,
    exclude: &std::collections::HashSet<ego_tree::NodeId>,
    out: &mut String,
) {
    for child in element.children() {
        match child.value() {
            scraper::node::Node::Text(text) => out.push_str(text),
            scraper::node::Node::Element(elem) => {
                if let Some(child_ref) = scraper::ElementRef::wrap(child) {
                    if exclude.contains(&child_ref.id()) {
                        continue;
                    }
                    out.push('<');
                    out.push_str(elem.name());
                    out.push('>');
                    serialize_excluding(&child_ref, exclude, out);
                    out.push_str("</");
                    out.push_str(elem.name());
                    out.push('>');
                }
            }
            _ => {}
        }
    }
}

/// Strip `STRIP_TAGS` and any remaining markup, returning plain text
/// (§4.2 step 7 "HTML text").
pub fn strip_tags_to_text(html: &str) -> String {
    let without_blocked = strip_selectors(html, STRIP_TAGS);
    let document = Html::parse_fragment(&without_blocked);
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Collapse runs of whitespace within each line, trim each line, and drop
/// empty lines (§4.2 step 8 "Plain text", and the whitespace-collapsing
/// rule applied by every strategy).
pub fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop consecutive duplicate lines (§4.2 step 7 "dedupe consecutive
/// identical lines").
pub fn dedupe_consecutive_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        if out.last() != Some(&line) {
            out.push(line);
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_subtree_by_id() {
        let html = "<html><body><div id=\"content\"><p>Hi</p></div><div id=\"other\">X</div></body></html>";
        let extracted = extract_by_id(html, "content").unwrap();
        assert!(extracted.contains("Hi"));
        assert!(!extracted.contains("<div id=\"other\">"));
    }

    #[test]
    fn has_id_detects_presence() {
        let html = "<div id=\"main\">x</div>";
        assert!(has_id(html, "main"));
        assert!(!has_id(html, "sidebar"));
    }

    #[test]
    fn strips_script_and_style() {
        let html = "<div><script>evil()</script><style>.a{}</style><p>Hello</p></div>";
        let text = strip_tags_to_text(html);
        assert!(!text.contains("evil"));
        assert!(text.contains("Hello"));
    }

    #[test]
    fn collapses_whitespace_and_drops_blank_lines() {
        let text = "  Hello    world  \n\n  \n Second   line ";
        assert_eq!(collapse_whitespace(text), "Hello world\nSecond line");
    }

    #[test]
    fn dedupes_consecutive_identical_lines() {
        let text = "a\na\nb\nb\nb\nc";
        assert_eq!(dedupe_consecutive_lines(text), "a\nb\nc");
    }
}
