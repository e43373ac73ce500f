//! The data model of §3: Site, CrawlPolicy, RefreshPolicy, ScheduleTask,
//! Document, SiteDocument, CrawlHistory, and the task envelope exchanged
//! through the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Site identifier. Must match `[A-Za-z0-9_]+`; validated wherever a new one
/// is accepted from outside the core (task creation, envelope construction).
pub type SiteId = String;

pub fn is_valid_site_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A configured site, owned by the (out-of-scope) admin surface. The core
/// only ever reads these rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    pub id: SiteId,
    pub display_name: String,
    pub base_url: String,
    pub enabled: bool,
    pub document_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlerType {
    Httpx,
    Firecrawl,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlPolicy {
    pub id: i64,
    pub site_id: SiteId,
    pub name: String,
    pub start_urls: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_depth: u32,
    pub max_urls: u32,
    pub crawl_delay_ms: u64,
    pub crawler_type: CrawlerType,
    pub advanced_config: HashMap<String, serde_json::Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_executed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshStrategy {
    All,
    Incremental,
    Selective,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshPolicy {
    pub id: i64,
    pub site_id: SiteId,
    pub strategy: RefreshStrategy,
    pub refresh_interval_days: u32,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub priority_patterns: Vec<String>,
    pub max_age_days: Option<u32>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub next_refresh: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// The schedule-task variant. Corresponds to the `once`/`interval`/`cron`
/// discriminated union in spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum ScheduleVariant {
    Once { one_time_date: DateTime<Utc> },
    Interval { interval_seconds: i64 },
    Cron { cron_expression: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleTask {
    pub id: i64,
    pub crawl_policy_id: i64,
    pub variant: ScheduleVariant,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub max_runs: Option<u64>,
    pub enabled: bool,
}

/// The classification returned by Storage (§4.4) and consumed by the
/// Indexer Worker (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOperation {
    New,
    NewSite,
    Edit,
    Skip,
    Delete,
}

impl std::fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::NewSite => "new_site",
            Self::Edit => "edit",
            Self::Skip => "skip",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Change classification recorded in CrawlHistory. A strict subset of
/// `IndexOperation` (history never records `new_site` or `skip` — those
/// don't change content identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    Edit,
    Delete,
}

/// Structured metadata extracted from a crawled page (title, description,
/// keywords, headings, image alts, OpenGraph fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub headings: HashMap<String, Vec<String>>,
    pub image_alts: Vec<String>,
    pub open_graph: HashMap<String, String>,
}

/// Maximum title length before ellipsis truncation (§9 Open Question 5:
/// the source's 245/250 split is resolved to a single fixed 250).
pub const TITLE_MAX_CHARS: usize = 250;

/// Truncate `title` to `TITLE_MAX_CHARS`, appending `…` on overflow.
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= TITLE_MAX_CHARS {
        return title.to_string();
    }
    let mut truncated: String = title.chars().take(TITLE_MAX_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

/// Document row (§3). Primary identity is `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
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
    pub version: i64,
    pub index_operation: IndexOperation,
    pub is_indexed: bool,
}

/// Many-to-many relation between a Site and a Document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteDocument {
    pub site_id: SiteId,
    pub document_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable append-only record per version transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlHistory {
    pub id: i64,
    pub document_id: i64,
    pub url: String,
    pub content_hash: String,
    pub version: i64,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    pub metadata_snapshot: serde_json::Value,
}

/// The envelope exchanged through the broker (§4.1, GLOSSARY). `task_id` is
/// preserved across every downstream stage (invariant 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub task_id: Uuid,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(task_id: Uuid, payload: T) -> Self {
        Self { task_id, payload }
    }
}

/// Payload produced by the crawler worker and consumed by the cleaner
/// worker (§4.5 step 11, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerOutput {
    pub url: String,
    pub site_id: SiteId,
    pub content: CrawlerContent,
    pub mimetype: String,
    pub links: Vec<String>,
    pub metadata: DocumentMetadata,
    pub content_hash: String,
    pub status_code: u16,
    pub crawler_id: String,
    pub crawler_type: CrawlerType,
    pub timestamp: i64,
    /// Synthetic marker set when a previously-known URL now 404s/5xxs
    /// (§7 "HTTP 4xx/5xx"); downstream storage then issues a delete.
    pub crawler_operation: Option<CrawlerOperation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlerOperation {
    Delete,
}

/// Raw body as classified by the crawler (§4.5 step 6): text is kept
/// inline, binary is carried base64-encoded until the cleaner decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrawlerContent {
    Text(String),
    Base64Binary(String),
}

/// Payload produced by the cleaner worker (§4.6) and consumed by storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedPayload {
    pub url: String,
    pub site_id: SiteId,
    pub clean_content: String,
    pub mimetype: String,
    pub links: Vec<String>,
    pub metadata: DocumentMetadata,
    pub content_hash: String,
    pub status_code: u16,
    pub crawler_id: String,
    pub crawler_type: CrawlerType,
    pub timestamp: i64,
    pub crawler_operation: Option<CrawlerOperation>,
}

/// Payload produced by the storage worker (§4.7) and consumed by the
/// indexer worker (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPayload {
    pub document_id: i64,
    pub url: String,
    pub site_id: SiteId,
    pub clean_content: String,
    pub metadata: DocumentMetadata,
    pub content_hash: String,
    pub mimetype: String,
    pub index_operation: IndexOperation,
    /// The document's prior `content_hash`, set only for `Edit` (§4.4); the
    /// indexer worker uses it to delete the superseded chunks before
    /// indexing the new content under the new `content_hash`-derived doc_id.
    pub previous_content_hash: Option<String>,
}

/// The refresh worker's input (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTask {
    pub site_id: SiteId,
    pub crawl_task_id: Uuid,
    pub strategy: RefreshStrategy,
    pub url_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_age_days: Option<u32>,
    pub priority_patterns: Vec<String>,
}

/// The crawler's unit of work (§4.5 input envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTaskItem {
    pub url: String,
    pub site_id: SiteId,
    pub task_id: Uuid,
    pub depth: u32,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_id_validation() {
        assert!(is_valid_site_id("my_site_1"));
        assert!(!is_valid_site_id(""));
        assert!(!is_valid_site_id("my site"));
        assert!(!is_valid_site_id("my-site"));
    }

    #[test]
    fn title_truncation_under_limit_is_unchanged() {
        let short = "a".repeat(10);
        assert_eq!(truncate_title(&short), short);
    }

    #[test]
    fn title_truncation_at_exact_limit_is_unchanged() {
        let exact = "a".repeat(TITLE_MAX_CHARS);
        assert_eq!(truncate_title(&exact), exact);
    }

    #[test]
    fn title_truncation_over_limit_gets_ellipsis() {
        let long = "a".repeat(TITLE_MAX_CHARS + 50);
        let truncated = truncate_title(&long);
        assert_eq!(truncated.chars().count(), TITLE_MAX_CHARS);
        assert!(truncated.ends_with('…'));
    }
}
