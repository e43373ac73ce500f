//! Read/update access to Site, CrawlPolicy, RefreshPolicy, and ScheduleTask
//! (§3), used by the manager, scheduler, and refresh worker. These rows are
//! owned by the (out-of-scope) admin surface; the core only ever reads and
//! advances their scheduling bookkeeping columns.

use crate::rows::{CrawlPolicyRow, RefreshPolicyRow, ScheduleTaskRow, SiteRow};
use crate::store::Storage;
use chrono::{DateTime, Utc};
use sitesearch_common::model::{CrawlPolicy, RefreshPolicy, ScheduleTask, Site, SiteId};
use sitesearch_common::{CoreError, Result};

impl Storage {
    #[tracing::instrument(skip(self))]
    pub async fn get_site(&self, site_id: &SiteId) -> Result<Option<Site>> {
        let row: Option<SiteRow> = sqlx::query_as("SELECT * FROM sites WHERE id = $1")
            .bind(site_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(row.map(Into::into))
    }

    pub async fn list_enabled_sites(&self) -> Result<Vec<Site>> {
        let rows: Vec<SiteRow> = sqlx::query_as("SELECT * FROM sites WHERE enabled = TRUE")
            .fetch_all(self.pool())
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Every enabled CrawlPolicy, or only those for one site.
    pub async fn list_crawl_policies(&self, site_id: Option<&SiteId>) -> Result<Vec<CrawlPolicy>> {
        let rows: Vec<CrawlPolicyRow> = match site_id {
            Some(id) => {
                sqlx::query_as("SELECT * FROM crawl_policies WHERE enabled = TRUE AND site_id = $1")
                    .bind(id)
                    .fetch_all(self.pool())
                    .await
            }
            None => {
                sqlx::query_as("SELECT * FROM crawl_policies WHERE enabled = TRUE")
                    .fetch_all(self.pool())
                    .await
            }
        }
        .map_err(|e| CoreError::Database(e.to_string()))?;

        rows.into_iter().map(CrawlPolicyRow::into_policy).collect()
    }

    pub async fn get_crawl_policy(&self, id: i64) -> Result<Option<CrawlPolicy>> {
        let row: Option<CrawlPolicyRow> = sqlx::query_as("SELECT * FROM crawl_policies WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        row.map(CrawlPolicyRow::into_policy).transpose()
    }

    pub async fn touch_crawl_policy_executed(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE crawl_policies SET last_executed = $1, updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn list_refresh_policies(&self) -> Result<Vec<RefreshPolicy>> {
        let rows: Vec<RefreshPolicyRow> = sqlx::query_as("SELECT * FROM refresh_policies WHERE enabled = TRUE")
            .fetch_all(self.pool())
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        rows.into_iter().map(RefreshPolicyRow::into_policy).collect()
    }

    pub async fn get_refresh_policy(&self, site_id: &SiteId) -> Result<Option<RefreshPolicy>> {
        let row: Option<RefreshPolicyRow> =
            sqlx::query_as("SELECT * FROM refresh_policies WHERE site_id = $1")
                .bind(site_id)
                .fetch_optional(self.pool())
                .await
                .map_err(|e| CoreError::Database(e.to_string()))?;
        row.map(RefreshPolicyRow::into_policy).transpose()
    }

    /// Advance a RefreshPolicy's bookkeeping after the refresh worker has
    /// enqueued its task (§4.9 final step).
    pub async fn update_refresh_schedule(
        &self,
        site_id: &SiteId,
        last_refresh: DateTime<Utc>,
        next_refresh: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE refresh_policies SET last_refresh = $1, next_refresh = $2 WHERE site_id = $3",
        )
        .bind(last_refresh)
        .bind(next_refresh)
        .bind(site_id)
        .execute(self.pool())
        .await
        .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn list_schedule_tasks(&self) -> Result<Vec<ScheduleTask>> {
        let rows: Vec<ScheduleTaskRow> = sqlx::query_as("SELECT * FROM schedule_tasks WHERE enabled = TRUE")
            .fetch_all(self.pool())
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        rows.into_iter().map(ScheduleTaskRow::into_task).collect()
    }

    /// Record a firing: bump `run_count`, set `last_run`/`next_run`, and
    /// disable the task if `max_runs` has now been reached (§4.10).
    pub async fn record_schedule_run(
        &self,
        id: i64,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE schedule_tasks SET run_count = run_count + 1, last_run = $1, next_run = $2, \
             enabled = CASE WHEN max_runs IS NOT NULL AND run_count + 1 >= max_runs THEN FALSE ELSE enabled END \
             WHERE id = $3",
        )
        .bind(last_run)
        .bind(next_run)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// Page through a site's URLs in ascending document-id order, for the
    /// refresh worker's "iterate all known documents" step (§4.9). `after_id`
    /// is exclusive; pass `0` for the first page.
    pub async fn list_site_document_urls(
        &self,
        site_id: &SiteId,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<(i64, String, i64)>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT d.id, d.url, d.ts FROM documents d \
             JOIN site_documents sd ON sd.document_id = d.id \
             WHERE sd.site_id = $1 AND d.id > $2 ORDER BY d.id ASC LIMIT $3",
        )
        .bind(site_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(rows)
    }
}
