//! Storage Worker (C7, §4.7): persists cleaned documents via `Storage`,
//! classifies the change with the §4.4 decision table, and forwards the
//! result to the indexer.

use crate::loop_runner::EnvelopeHandler;
use futures::FutureExt;
use sitesearch_broker::QueueBroker;
use sitesearch_common::error::WorkerFailure;
use sitesearch_common::model::{CleanedPayload, CrawlerOperation, Envelope, IndexOperation, StoredPayload};
use sitesearch_storage::{DocumentWrite, Storage};
use std::collections::HashMap;
use tracing::info;

/// Build the `EnvelopeHandler` the loop runner drives for `queue:cleaner`.
pub fn handler(broker: QueueBroker, storage: Storage) -> EnvelopeHandler<CleanedPayload> {
    std::sync::Arc::new(move |envelope: Envelope<CleanedPayload>| {
        let broker = broker.clone();
        let storage = storage.clone();
        async move {
            let task_id = envelope.task_id;
            let payload = process(&storage, envelope.payload).await.map_err(WorkerFailure::Fail)?;
            broker
                .enqueue_with_id("storage", task_id, payload)
                .await
                .map_err(WorkerFailure::Fail)?;
            Ok(())
        }
        .boxed()
    })
}

async fn process(storage: &Storage, payload: CleanedPayload) -> sitesearch_common::Result<StoredPayload> {
    if payload.crawler_operation == Some(CrawlerOperation::Delete) {
        storage.delete_document(&payload.url, Some(&payload.site_id)).await?;
        info!(url = %payload.url, "deleted document on previously-known URL now unreachable");
        return Ok(StoredPayload {
            document_id: 0,
            url: payload.url,
            site_id: payload.site_id,
            clean_content: String::new(),
            metadata: payload.metadata,
            content_hash: payload.content_hash,
            mimetype: payload.mimetype,
            index_operation: IndexOperation::Delete,
            previous_content_hash: None,
        });
    }

    let write = DocumentWrite {
        url: payload.url.clone(),
        raw_content: Vec::new(),
        cleaned_content: payload.clean_content.clone(),
        mimetype: payload.mimetype.clone(),
        content_hash: payload.content_hash.clone(),
        status_code: payload.status_code,
        headers: HashMap::new(),
        links: payload.links.clone(),
        timestamp: payload.timestamp,
        metadata: payload.metadata.clone(),
        crawler_id: payload.crawler_id.clone(),
        crawler_type: payload.crawler_type,
    };

    let (document, operation, previous_content_hash) = storage.store_document(write, &payload.site_id).await?;

    Ok(StoredPayload {
        document_id: document.id,
        url: document.url,
        site_id: payload.site_id,
        clean_content: document.cleaned_content,
        metadata: document.metadata,
        content_hash: document.content_hash,
        mimetype: document.mimetype,
        index_operation: operation,
        previous_content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesearch_common::model::{CrawlerType, DocumentMetadata};

    fn base_payload() -> CleanedPayload {
        CleanedPayload {
            url: "https://a.test/".to_string(),
            site_id: "s1".to_string(),
            clean_content: "Hello".to_string(),
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

    #[test]
    fn delete_marker_short_circuits_before_documentwrite() {
        let mut payload = base_payload();
        payload.crawler_operation = Some(CrawlerOperation::Delete);
        assert_eq!(payload.crawler_operation, Some(CrawlerOperation::Delete));
    }
}
