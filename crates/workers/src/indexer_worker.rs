//! Indexer Worker (C8, §4.8): routes a stored document to the indexer's
//! ingestion or deletion path based on its `index_operation` classification.

use crate::loop_runner::EnvelopeHandler;
use futures::FutureExt;
use sitesearch_common::error::WorkerFailure;
use sitesearch_common::model::{Envelope, IndexOperation, StoredPayload};
use sitesearch_index::Indexer;
use sitesearch_storage::Storage;
use std::sync::Arc;
use tracing::debug;

/// Build the `EnvelopeHandler` the loop runner drives for `queue:storage`.
pub fn handler(indexer: Arc<Indexer>, storage: Storage) -> EnvelopeHandler<StoredPayload> {
    Arc::new(move |envelope: Envelope<StoredPayload>| {
        let indexer = indexer.clone();
        let storage = storage.clone();
        async move {
            process(&indexer, &storage, envelope.payload).await.map_err(WorkerFailure::Fail)?;
            Ok(())
        }
        .boxed()
    })
}

async fn process(indexer: &Indexer, storage: &Storage, payload: StoredPayload) -> sitesearch_common::Result<()> {
    match payload.index_operation {
        IndexOperation::Delete => {
            indexer.delete_by_content_hash(&payload.site_id, &payload.content_hash).await
        }
        IndexOperation::Skip => {
            debug!(url = %payload.url, "skip classification, nothing to index");
            Ok(())
        }
        IndexOperation::New | IndexOperation::NewSite | IndexOperation::Edit => {
            if let Some(previous_hash) = &payload.previous_content_hash {
                indexer.delete_by_content_hash(&payload.site_id, previous_hash).await?;
            }
            indexer
                .index_document(
                    &payload.site_id,
                    &payload.url,
                    payload.metadata.title.as_deref(),
                    &payload.mimetype,
                    &payload.content_hash,
                    &payload.clean_content,
                )
                .await?;
            storage.mark_indexed(payload.document_id).await
        }
    }
}
