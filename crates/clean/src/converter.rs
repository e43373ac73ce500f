//! The "external OCR/AI-to-markdown converter" collaborator used by the
//! PDF, Word, and other-office strategies (§4.2 steps 1-3). Modeled as a
//! trait object so the strategy dispatch table has a real seam to test
//! against, instead of hard-wiring one HTTP implementation.

use async_trait::async_trait;
use sitesearch_common::retry::{with_retry, RetryPolicy};
use sitesearch_common::{CoreError, Result};

/// Converts a binary document body into markdown. The real implementation
/// calls a configurable external endpoint (OCR / AI-to-markdown service);
/// tests substitute a `FakeConverter`.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, content: &[u8], mimetype: &str) -> Result<String>;
}

/// HTTP-backed default implementation. Treated as a black-box collaborator
/// per §1 scope — the core only needs the `(bytes, mimetype) -> markdown`
/// contract.
pub struct HttpDocumentConverter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDocumentConverter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DocumentConverter for HttpDocumentConverter {
    async fn convert(&self, content: &[u8], mimetype: &str) -> Result<String> {
        let body = content.to_vec();
        let mimetype = mimetype.to_string();
        let markdown = with_retry(RetryPolicy::external_service(), || {
            let client = self.client.clone();
            let endpoint = self.endpoint.clone();
            let body = body.clone();
            let mimetype = mimetype.clone();
            async move {
                let response = client
                    .post(&endpoint)
                    .header("content-type", mimetype)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| CoreError::Http(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(CoreError::Http(format!(
                        "converter returned {}",
                        response.status()
                    )));
                }

                response
                    .text()
                    .await
                    .map_err(|e| CoreError::Http(e.to_string()))
            }
        })
        .await?;

        Ok(markdown)
    }
}

/// Flattens a markdown table's rows into `header: value` lines (§4.2 step 1
/// PDF post-processing). Applies to any markdown table, not just PDF
/// output, since the source post-processes the converter's output
/// uniformly regardless of which strategy called it.
pub fn flatten_markdown_tables(markdown: &str) -> String {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if is_table_header(line) && lines.get(i + 1).is_some_and(|l| is_table_separator(l)) {
            let headers: Vec<String> = split_row(line);
            let mut j = i + 2;
            while j < lines.len() && is_table_row(lines[j]) {
                let values = split_row(lines[j]);
                for (h, v) in headers.iter().zip(values.iter()) {
                    if !v.trim().is_empty() {
                        out.push_str(h.trim());
                        out.push_str(": ");
                        out.push_str(v.trim());
                        out.push('\n');
                    }
                }
                out.push('\n');
                j += 1;
            }
            i = j;
        } else {
            out.push_str(line);
            out.push('\n');
            i += 1;
        }
    }

    out
}

fn is_table_header(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.ends_with('|') && t.len() > 1
}

fn is_table_separator(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|')
        && t.chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn is_table_row(line: &str) -> bool {
    is_table_header(line)
}

fn split_row(line: &str) -> Vec<String> {
    line.trim()
        .trim_start_matches('|')
        .trim_end_matches('|')
        .split('|')
        .map(|s| s.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeConverter(String);

    #[async_trait]
    impl DocumentConverter for FakeConverter {
        async fn convert(&self, _content: &[u8], _mimetype: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fake_converter_returns_configured_markdown() {
        let converter = FakeConverter("# Title\n\nBody".to_string());
        let out = converter.convert(b"bytes", "application/pdf").await.unwrap();
        assert_eq!(out, "# Title\n\nBody");
    }

    #[test]
    fn flattens_simple_table() {
        let md = "| Name | Age |\n| --- | --- |\n| Alice | 30 |\n| Bob | 25 |\n";
        let flattened = flatten_markdown_tables(md);
        assert!(flattened.contains("Name: Alice"));
        assert!(flattened.contains("Age: 30"));
        assert!(flattened.contains("Name: Bob"));
    }

    #[test]
    fn leaves_non_table_text_unchanged() {
        let md = "Just a paragraph.\nAnother line.\n";
        assert_eq!(flatten_markdown_tables(md), md);
    }
}
