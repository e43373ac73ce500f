//! Cleaner Worker (C6, §4.6): dequeues crawler output, applies the §4.2
//! strategy table, and enqueues the cleaned payload for storage.

use crate::loop_runner::EnvelopeHandler;
use futures::FutureExt;
use sitesearch_broker::QueueBroker;
use sitesearch_clean::content::RawContent;
use sitesearch_clean::converter::DocumentConverter;
use sitesearch_clean::strategy::clean;
use sitesearch_common::error::WorkerFailure;
use sitesearch_common::model::{CleanedPayload, CrawlerContent, CrawlerOperation, CrawlerOutput, Envelope};
use sitesearch_common::{CoreError, Result};
use std::sync::Arc;
use tracing::warn;

/// Build the `EnvelopeHandler` the loop runner drives: clean the crawled
/// content, then forward it to `queue:cleaner` under the same `task_id`
/// (invariant 6).
pub fn handler(broker: QueueBroker, converter: Arc<dyn DocumentConverter>) -> EnvelopeHandler<CrawlerOutput> {
    Arc::new(move |envelope: Envelope<CrawlerOutput>| {
        let broker = broker.clone();
        let converter = converter.clone();
        async move {
            let task_id = envelope.task_id;
            let payload = process(envelope.payload, &converter)
                .await
                .map_err(WorkerFailure::Fail)?;
            broker
                .enqueue_with_id("cleaner", task_id, payload)
                .await
                .map_err(WorkerFailure::Fail)?;
            Ok(())
        }
        .boxed()
    })
}

/// Transform one crawler-output envelope into a cleaned payload. A
/// synthetic delete marker (§7: "previously-known URL now 4xx/5xx") skips
/// cleaning entirely and is forwarded as-is so storage can act on it.
pub async fn process(output: CrawlerOutput, converter: &Arc<dyn DocumentConverter>) -> Result<CleanedPayload> {
    if output.crawler_operation == Some(CrawlerOperation::Delete) {
        return Ok(forward_delete(output));
    }

    let raw = match &output.content {
        CrawlerContent::Text(s) => RawContent::Text(s.clone()),
        CrawlerContent::Base64Binary(b64) => {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| CoreError::MissingField(format!("invalid base64 payload: {e}")))?;
            RawContent::Binary(bytes)
        }
    };

    let (clean_content, outcome) = clean(&output.url, &output.mimetype, &raw, converter).await?;
    if outcome == sitesearch_clean::strategy::CleanOutcome::PassThrough {
        warn!(url = %output.url, mimetype = %output.mimetype, "cleaner passed raw content through unchanged");
    }

    Ok(CleanedPayload {
        url: output.url,
        site_id: output.site_id,
        clean_content,
        mimetype: output.mimetype,
        links: output.links,
        metadata: output.metadata,
        content_hash: output.content_hash,
        status_code: output.status_code,
        crawler_id: output.crawler_id,
        crawler_type: output.crawler_type,
        timestamp: output.timestamp,
        crawler_operation: None,
    })
}

fn forward_delete(output: CrawlerOutput) -> CleanedPayload {
    CleanedPayload {
        url: output.url,
        site_id: output.site_id,
        clean_content: String::new(),
        mimetype: output.mimetype,
        links: Vec::new(),
        metadata: output.metadata,
        content_hash: output.content_hash,
        status_code: output.status_code,
        crawler_id: output.crawler_id,
        crawler_type: output.crawler_type,
        timestamp: output.timestamp,
        crawler_operation: Some(CrawlerOperation::Delete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sitesearch_common::model::{CrawlerType, DocumentMetadata};

    struct FakeConverter;
    #[async_trait]
    impl DocumentConverter for FakeConverter {
        async fn convert(&self, _content: &[u8], _mimetype: &str) -> Result<String> {
            Ok("converted".to_string())
        }
    }

    fn base_output() -> CrawlerOutput {
        CrawlerOutput {
            url: "https://a.test/".to_string(),
            site_id: "s1".to_string(),
            content: CrawlerContent::Text("<html><body><h1>T</h1><p>Hello</p></body></html>".to_string()),
            mimetype: "text/html".to_string(),
            links: vec![],
            metadata: DocumentMetadata::default(),
            content_hash: "abc123".to_string(),
            status_code: 200,
            crawler_id: "crawler-1".to_string(),
            crawler_type: CrawlerType::Httpx,
            timestamp: 0,
            crawler_operation: None,
        }
    }

    #[tokio::test]
    async fn cleans_html_payload() {
        let converter: Arc<dyn DocumentConverter> = Arc::new(FakeConverter);
        let payload = process(base_output(), &converter).await.unwrap();
        assert!(payload.clean_content.contains("Hello"));
        assert!(payload.crawler_operation.is_none());
    }

    #[tokio::test]
    async fn delete_marker_passes_through_without_cleaning() {
        let converter: Arc<dyn DocumentConverter> = Arc::new(FakeConverter);
        let mut output = base_output();
        output.crawler_operation = Some(CrawlerOperation::Delete);
        let payload = process(output, &converter).await.unwrap();
        assert_eq!(payload.crawler_operation, Some(CrawlerOperation::Delete));
        assert!(payload.clean_content.is_empty());
    }

    #[tokio::test]
    async fn decodes_base64_binary_before_cleaning() {
        use base64::Engine;
        let converter: Arc<dyn DocumentConverter> = Arc::new(FakeConverter);
        let mut output = base_output();
        output.mimetype = "application/pdf".to_string();
        output.content = CrawlerContent::Base64Binary(base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4"));
        let payload = process(output, &converter).await.unwrap();
        assert!(payload.clean_content.contains("converted"));
    }
}
