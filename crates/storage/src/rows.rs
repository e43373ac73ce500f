//! `sqlx::FromRow` mirrors of the `sitesearch_common::model` types, for the
//! subset of columns actually queried by this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitesearch_common::model::{
    ChangeType, CrawlPolicy, CrawlerType, Document, DocumentMetadata, IndexOperation, RefreshPolicy,
    RefreshStrategy, ScheduleTask, ScheduleVariant, Site, SiteDocument,
};
use sitesearch_common::{CoreError, Result};
use std::collections::HashMap;

#[derive(Debug, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: i64,
    pub url: String,
    pub raw_content: Vec<u8>,
    pub cleaned_content: String,
    pub mimetype: String,
    pub content_hash: String,
    pub status_code: i32,
    pub headers: serde_json::Value,
    pub links: serde_json::Value,
    pub ts: i64,
    pub metadata: serde_json::Value,
    pub crawler_id: String,
    pub crawler_type: String,
    pub version: i64,
    pub index_operation: String,
    pub is_indexed: bool,
}

fn parse_crawler_type(s: &str) -> Result<CrawlerType> {
    match s {
        "httpx" | "Httpx" => Ok(CrawlerType::Httpx),
        "firecrawl" | "Firecrawl" => Ok(CrawlerType::Firecrawl),
        other => Err(CoreError::Database(format!("unknown crawler_type {other}"))),
    }
}

fn crawler_type_str(t: CrawlerType) -> &'static str {
    match t {
        CrawlerType::Httpx => "httpx",
        CrawlerType::Firecrawl => "firecrawl",
    }
}

fn parse_index_operation(s: &str) -> Result<IndexOperation> {
    match s {
        "new" => Ok(IndexOperation::New),
        "new_site" => Ok(IndexOperation::NewSite),
        "edit" => Ok(IndexOperation::Edit),
        "skip" => Ok(IndexOperation::Skip),
        "delete" => Ok(IndexOperation::Delete),
        other => Err(CoreError::Database(format!("unknown index_operation {other}"))),
    }
}

impl DocumentRow {
    pub fn into_document(self) -> Result<Document> {
        let headers: HashMap<String, String> = serde_json::from_value(self.headers)?;
        let links: Vec<String> = serde_json::from_value(self.links)?;
        let metadata: DocumentMetadata = serde_json::from_value(self.metadata)?;
        Ok(Document {
            id: self.id,
            url: self.url,
            raw_content: self.raw_content,
            cleaned_content: self.cleaned_content,
            mimetype: self.mimetype,
            content_hash: self.content_hash,
            status_code: self.status_code as u16,
            headers,
            links,
            timestamp: self.ts,
            metadata,
            crawler_id: self.crawler_id,
            crawler_type: parse_crawler_type(&self.crawler_type)?,
            version: self.version,
            index_operation: parse_index_operation(&self.index_operation)?,
            is_indexed: self.is_indexed,
        })
    }
}

/// Fields needed to insert or update a Document row; distinct from the
/// domain `Document` because `id`/`version`/`is_indexed` are server-assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentWrite {
    pub url: String,
    pub raw_content: Vec<u8>,
    pub cleaned_content: String,
    pub mimetype: String,
    pub content_hash: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub links: Vec<String>,
    pub timestamp: i64,
    pub metadata: DocumentMetadata,
    pub crawler_id: String,
    pub crawler_type: CrawlerType,
}

impl DocumentWrite {
    pub fn headers_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.headers)?)
    }
    pub fn links_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.links)?)
    }
    pub fn metadata_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.metadata)?)
    }
    pub fn crawler_type_str(&self) -> &'static str {
        crawler_type_str(self.crawler_type)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SiteDocumentRow {
    pub site_id: String,
    pub document_id: i64,
    pub created_at: DateTime<Utc>,
}

impl From<SiteDocumentRow> for SiteDocument {
    fn from(r: SiteDocumentRow) -> Self {
        SiteDocument {
            site_id: r.site_id,
            document_id: r.document_id,
            created_at: r.created_at,
        }
    }
}

pub fn change_type_str(c: ChangeType) -> &'static str {
    match c {
        ChangeType::New => "new",
        ChangeType::Edit => "edit",
        ChangeType::Delete => "delete",
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SiteRow {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub enabled: bool,
    pub document_count: i64,
}

impl From<SiteRow> for Site {
    fn from(r: SiteRow) -> Self {
        Site {
            id: r.id,
            display_name: r.display_name,
            base_url: r.base_url,
            enabled: r.enabled,
            document_count: r.document_count,
        }
    }
}

fn parse_json_strings(v: serde_json::Value) -> Result<Vec<String>> {
    Ok(serde_json::from_value(v)?)
}

#[derive(Debug, sqlx::FromRow)]
pub struct CrawlPolicyRow {
    pub id: i64,
    pub site_id: String,
    pub name: String,
    pub start_urls: serde_json::Value,
    pub include_patterns: serde_json::Value,
    pub exclude_patterns: serde_json::Value,
    pub max_depth: i32,
    pub max_urls: i32,
    pub crawl_delay_ms: i64,
    pub crawler_type: String,
    pub advanced_config: serde_json::Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_executed: Option<DateTime<Utc>>,
}

impl CrawlPolicyRow {
    pub fn into_policy(self) -> Result<CrawlPolicy> {
        Ok(CrawlPolicy {
            id: self.id,
            site_id: self.site_id,
            name: self.name,
            start_urls: parse_json_strings(self.start_urls)?,
            include_patterns: parse_json_strings(self.include_patterns)?,
            exclude_patterns: parse_json_strings(self.exclude_patterns)?,
            max_depth: self.max_depth as u32,
            max_urls: self.max_urls as u32,
            crawl_delay_ms: self.crawl_delay_ms as u64,
            crawler_type: parse_crawler_type(&self.crawler_type)?,
            advanced_config: serde_json::from_value(self.advanced_config)?,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_executed: self.last_executed,
        })
    }
}

fn parse_refresh_strategy(s: &str) -> Result<RefreshStrategy> {
    match s {
        "all" => Ok(RefreshStrategy::All),
        "incremental" => Ok(RefreshStrategy::Incremental),
        "selective" => Ok(RefreshStrategy::Selective),
        other => Err(CoreError::Database(format!("unknown refresh strategy {other}"))),
    }
}

pub fn refresh_strategy_str(s: RefreshStrategy) -> &'static str {
    match s {
        RefreshStrategy::All => "all",
        RefreshStrategy::Incremental => "incremental",
        RefreshStrategy::Selective => "selective",
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RefreshPolicyRow {
    pub id: i64,
    pub site_id: String,
    pub strategy: String,
    pub refresh_interval_days: i32,
    pub include_patterns: serde_json::Value,
    pub exclude_patterns: serde_json::Value,
    pub priority_patterns: serde_json::Value,
    pub max_age_days: Option<i32>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub next_refresh: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl RefreshPolicyRow {
    pub fn into_policy(self) -> Result<RefreshPolicy> {
        Ok(RefreshPolicy {
            id: self.id,
            site_id: self.site_id,
            strategy: parse_refresh_strategy(&self.strategy)?,
            refresh_interval_days: self.refresh_interval_days as u32,
            include_patterns: parse_json_strings(self.include_patterns)?,
            exclude_patterns: parse_json_strings(self.exclude_patterns)?,
            priority_patterns: parse_json_strings(self.priority_patterns)?,
            max_age_days: self.max_age_days.map(|v| v as u32),
            last_refresh: self.last_refresh,
            next_refresh: self.next_refresh,
            enabled: self.enabled,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ScheduleTaskRow {
    pub id: i64,
    pub crawl_policy_id: i64,
    pub variant: String,
    pub one_time_date: Option<DateTime<Utc>>,
    pub interval_seconds: Option<i64>,
    pub cron_expression: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub max_runs: Option<i64>,
    pub enabled: bool,
}

impl ScheduleTaskRow {
    pub fn into_task(self) -> Result<ScheduleTask> {
        let variant = match self.variant.as_str() {
            "once" => ScheduleVariant::Once {
                one_time_date: self
                    .one_time_date
                    .ok_or_else(|| CoreError::Database("once schedule missing one_time_date".into()))?,
            },
            "interval" => ScheduleVariant::Interval {
                interval_seconds: self
                    .interval_seconds
                    .ok_or_else(|| CoreError::Database("interval schedule missing interval_seconds".into()))?,
            },
            "cron" => ScheduleVariant::Cron {
                cron_expression: self
                    .cron_expression
                    .ok_or_else(|| CoreError::Database("cron schedule missing cron_expression".into()))?,
            },
            other => return Err(CoreError::Database(format!("unknown schedule variant {other}"))),
        };
        Ok(ScheduleTask {
            id: self.id,
            crawl_policy_id: self.crawl_policy_id,
            variant,
            start_date: self.start_date,
            end_date: self.end_date,
            last_run: self.last_run,
            next_run: self.next_run,
            run_count: self.run_count as u64,
            max_runs: self.max_runs.map(|v| v as u64),
            enabled: self.enabled,
        })
    }
}
