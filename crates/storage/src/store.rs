//! The `Storage` client: §4.4's four operations backed by a single
//! `sqlx::PgPool`, with the decision table in [`crate::decision`] driving
//! `store_document`/`check_exists`.

use crate::decision::{decide, MatchState};
use crate::rows::{change_type_str, DocumentRow, DocumentWrite};
use sitesearch_common::model::{ChangeType, Document, IndexOperation, SiteId};
use sitesearch_common::{CoreError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{instrument, warn};

/// Postgres error code for a unique-constraint violation (§7 "Storage
/// integrity conflict").
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Exposed for the `policy` module and for integration tests that seed
    /// fixture rows directly; not part of the component's operational API.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))
    }

    /// `store_document` (§4.4 steps 1-7). Retries once, end to end, on a
    /// unique-constraint violation raised mid-transaction. The third element
    /// is the document's previous `content_hash`, present only for `Edit`,
    /// which the indexer worker uses to delete the superseded chunks.
    #[instrument(skip(self, payload), fields(url = %payload.url, site_id = %site_id))]
    pub async fn store_document(
        &self,
        payload: DocumentWrite,
        site_id: &SiteId,
    ) -> Result<(Document, IndexOperation, Option<String>)> {
        match self.store_document_once(&payload, site_id).await {
            Ok(result) => Ok(result),
            Err(CoreError::StorageConflict(reason)) => {
                warn!(url = %payload.url, reason, "storage conflict, retrying once");
                self.store_document_once(&payload, site_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn store_document_once(
        &self,
        payload: &DocumentWrite,
        site_id: &SiteId,
    ) -> Result<(Document, IndexOperation, Option<String>)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;

        let existing = find_existing(&mut tx, &payload.url, &payload.content_hash).await?;

        let (document, operation, previous_content_hash) = match existing {
            None => {
                let doc = insert_document(&mut tx, payload).await?;
                link_site(&mut tx, site_id, doc.id).await?;
                append_history(
                    &mut tx,
                    doc.id,
                    &doc.url,
                    &doc.content_hash,
                    doc.version,
                    ChangeType::New,
                    serde_json::to_value(&doc.metadata)?,
                )
                .await?;
                (doc, IndexOperation::New, None)
            }
            Some((existing_row, matched_by_url)) => {
                let already_in_site = site_linked(&mut tx, site_id, existing_row.id).await?;
                let hash_equal = existing_row.content_hash == payload.content_hash;
                let state = MatchState {
                    matched_by_url,
                    matched_by_hash: !matched_by_url,
                    already_in_requested_site: already_in_site,
                    hash_equal_to_stored: hash_equal,
                };
                match decide(state) {
                    IndexOperation::NewSite => {
                        link_site(&mut tx, site_id, existing_row.id).await?;
                        let doc = existing_row.into_document()?;
                        (doc, IndexOperation::NewSite, None)
                    }
                    IndexOperation::Edit => {
                        let previous_hash = existing_row.content_hash.clone();
                        let doc = update_document(&mut tx, existing_row.id, payload).await?;
                        link_site(&mut tx, site_id, doc.id).await?;
                        append_history(
                            &mut tx,
                            doc.id,
                            &doc.url,
                            &doc.content_hash,
                            doc.version,
                            ChangeType::Edit,
                            serde_json::to_value(&doc.metadata)?,
                        )
                        .await?;
                        (doc, IndexOperation::Edit, Some(previous_hash))
                    }
                    IndexOperation::Skip => {
                        link_site(&mut tx, site_id, existing_row.id).await?;
                        let doc = existing_row.into_document()?;
                        (doc, IndexOperation::Skip, None)
                    }
                    IndexOperation::New | IndexOperation::Delete => {
                        unreachable!("decide() cannot return new/delete when a row matched")
                    }
                }
            }
        };

        tx.commit()
            .await
            .map_err(|e| classify_commit_error(e))?;

        Ok((document, operation, previous_content_hash))
    }

    /// `delete_document` (§4.4). Removes the requesting site's link; if
    /// that was the last site referencing the document, the document row
    /// itself (and its link) is removed outright. Either way a `delete`
    /// CrawlHistory row is appended.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, url: &str, site_id: Option<&SiteId>) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;

        let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE url = $1")
            .bind(url)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;

        let Some(row) = row else {
            tx.commit().await.map_err(|e| CoreError::Database(e.to_string()))?;
            return Ok(());
        };

        if let Some(site_id) = site_id {
            sqlx::query("DELETE FROM site_documents WHERE site_id = $1 AND document_id = $2")
                .bind(site_id)
                .bind(row.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::Database(e.to_string()))?;
        }

        let remaining: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM site_documents WHERE document_id = $1",
        )
        .bind(row.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoreError::Database(e.to_string()))?;

        if site_id.is_none() || remaining == 0 {
            sqlx::query("DELETE FROM site_documents WHERE document_id = $1")
                .bind(row.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::Database(e.to_string()))?;
            sqlx::query("DELETE FROM documents WHERE id = $1")
                .bind(row.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::Database(e.to_string()))?;
        }

        append_history(
            &mut tx,
            row.id,
            &row.url,
            &row.content_hash,
            row.version,
            ChangeType::Delete,
            row.metadata.clone(),
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn mark_indexed(&self, document_id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET is_indexed = TRUE WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// `check_exists` (§4.4 final paragraph): same decision table, read-only,
    /// used by the crawler to short-circuit before fetching.
    #[instrument(skip(self))]
    pub async fn check_exists(
        &self,
        url: &str,
        site_id: &SiteId,
        content_hash: Option<&str>,
    ) -> Result<(bool, Option<Document>, IndexOperation)> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;

        let by_url: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE url = $1")
            .bind(url)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;

        let (row, matched_by_url) = match by_url {
            Some(row) => (Some(row), true),
            None => match content_hash {
                Some(hash) => {
                    let by_hash: Option<DocumentRow> =
                        sqlx::query_as("SELECT * FROM documents WHERE content_hash = $1")
                            .bind(hash)
                            .fetch_optional(&mut *conn)
                            .await
                            .map_err(|e| CoreError::Database(e.to_string()))?;
                    (by_hash, false)
                }
                None => (None, false),
            },
        };

        let Some(row) = row else {
            return Ok((false, None, IndexOperation::New));
        };

        let already_in_site: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM site_documents WHERE site_id = $1 AND document_id = $2",
        )
        .bind(site_id)
        .bind(row.id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| CoreError::Database(e.to_string()))?;

        let hash_equal = content_hash.map(|h| h == row.content_hash).unwrap_or(false);
        let state = MatchState {
            matched_by_url,
            matched_by_hash: !matched_by_url,
            already_in_requested_site: already_in_site > 0,
            hash_equal_to_stored: hash_equal,
        };
        let operation = decide(state);
        let document = row.into_document()?;
        Ok((true, Some(document), operation))
    }
}

async fn find_existing(
    tx: &mut Transaction<'_, Postgres>,
    url: &str,
    content_hash: &str,
) -> Result<Option<(DocumentRow, bool)>> {
    let by_url: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE url = $1")
        .bind(url)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::Database(e.to_string()))?;

    if let Some(row) = by_url {
        return Ok(Some((row, true)));
    }

    let by_hash: Option<DocumentRow> =
        sqlx::query_as("SELECT * FROM documents WHERE content_hash = $1")
            .bind(content_hash)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;

    Ok(by_hash.map(|row| (row, false)))
}

async fn site_linked(tx: &mut Transaction<'_, Postgres>, site_id: &SiteId, document_id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM site_documents WHERE site_id = $1 AND document_id = $2",
    )
    .bind(site_id)
    .bind(document_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| CoreError::Database(e.to_string()))?;
    Ok(count > 0)
}

async fn link_site(tx: &mut Transaction<'_, Postgres>, site_id: &SiteId, document_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO site_documents (site_id, document_id) VALUES ($1, $2) \
         ON CONFLICT (site_id, document_id) DO NOTHING",
    )
    .bind(site_id)
    .bind(document_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| CoreError::Database(e.to_string()))?;
    Ok(())
}

async fn insert_document(tx: &mut Transaction<'_, Postgres>, payload: &DocumentWrite) -> Result<Document> {
    let row: DocumentRow = sqlx::query_as(
        "INSERT INTO documents \
         (url, raw_content, cleaned_content, mimetype, content_hash, status_code, headers, links, ts, metadata, crawler_id, crawler_type, version, index_operation, is_indexed) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1, 'new', FALSE) \
         RETURNING *",
    )
    .bind(&payload.url)
    .bind(&payload.raw_content)
    .bind(&payload.cleaned_content)
    .bind(&payload.mimetype)
    .bind(&payload.content_hash)
    .bind(payload.status_code as i32)
    .bind(payload.headers_json()?)
    .bind(payload.links_json()?)
    .bind(payload.timestamp)
    .bind(payload.metadata_json()?)
    .bind(&payload.crawler_id)
    .bind(payload.crawler_type_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(classify_insert_error)?;
    row.into_document()
}

async fn update_document(
    tx: &mut Transaction<'_, Postgres>,
    document_id: i64,
    payload: &DocumentWrite,
) -> Result<Document> {
    let row: DocumentRow = sqlx::query_as(
        "UPDATE documents SET \
         raw_content = $1, cleaned_content = $2, mimetype = $3, content_hash = $4, \
         status_code = $5, headers = $6, links = $7, ts = $8, metadata = $9, \
         crawler_id = $10, crawler_type = $11, version = version + 1, index_operation = 'edit' \
         WHERE id = $12 RETURNING *",
    )
    .bind(&payload.raw_content)
    .bind(&payload.cleaned_content)
    .bind(&payload.mimetype)
    .bind(&payload.content_hash)
    .bind(payload.status_code as i32)
    .bind(payload.headers_json()?)
    .bind(payload.links_json()?)
    .bind(payload.timestamp)
    .bind(payload.metadata_json()?)
    .bind(&payload.crawler_id)
    .bind(payload.crawler_type_str())
    .bind(document_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| CoreError::Database(e.to_string()))?;
    row.into_document()
}

async fn append_history(
    tx: &mut Transaction<'_, Postgres>,
    document_id: i64,
    url: &str,
    content_hash: &str,
    version: i64,
    change_type: ChangeType,
    metadata_snapshot: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO crawl_history (document_id, url, content_hash, version, change_type, metadata_snapshot) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(document_id)
    .bind(url)
    .bind(content_hash)
    .bind(version)
    .bind(change_type_str(change_type))
    .bind(metadata_snapshot)
    .execute(&mut **tx)
    .await
    .map_err(|e| CoreError::Database(e.to_string()))?;
    Ok(())
}

fn classify_insert_error(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return CoreError::StorageConflict(db_err.to_string());
        }
    }
    CoreError::Database(e.to_string())
}

fn classify_commit_error(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return CoreError::StorageConflict(db_err.to_string());
        }
    }
    CoreError::Database(e.to_string())
}
