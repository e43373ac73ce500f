//! `SystemConfig`, loaded from TOML with environment variable overrides for
//! the variables named in §6 of the spec (broker URL, database DSN, vector
//! store URL, embedding/reranker endpoints, worker pool defaults, scheduler
//! poll interval).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub storage: StorageConfig,
    pub crawler: CrawlerConfig,
    pub indexing: IndexingConfig,
    pub workers: WorkerPoolConfig,
    pub scheduler: SchedulerConfig,
    /// The LLM-driven whole-site crawler endpoint (§3 `CrawlPolicy.crawler_type
    /// = firecrawl`). `None` disables the `firecrawl` crawler type entirely.
    #[serde(default)]
    pub firecrawl: Option<FirecrawlConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirecrawlConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub redis_url: String,
    pub database_url: String,
    pub qdrant_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub follow_redirects: bool,
    pub verify_tls: bool,
    pub proxy: Option<String>,
    #[serde(default)]
    pub cookies: Vec<(String, String)>,
    #[serde(default)]
    pub default_headers: Vec<(String, String)>,
}

impl CrawlerConfig {
    pub fn read_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs * 2
    }

    pub fn write_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs
    }

    pub fn pool_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs * 3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub embedding_url: String,
    pub embedding_api_key: Option<String>,
    pub reranker_url: Option<String>,
    pub reranker_api_key: Option<String>,
    /// The OCR/AI-to-markdown converter endpoint for the PDF/Word/office
    /// cleaning strategies (§4.2 steps 1-3).
    pub converter_url: String,
    pub vector_dimension: u64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub default_top_k: usize,
    pub rerank_top_k: usize,
    pub retrieval: RetrievalDefaults,
}

/// Shared defaults for retrieval cutoffs (§9 Open Question 3: one constant,
/// not separately tunable server vs. indexer defaults until recall
/// regressions are observed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalDefaults {
    pub similarity_cutoff: f32,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            similarity_cutoff: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub cleaner_workers: usize,
    pub storage_workers: usize,
    pub indexer_workers: usize,
    pub refresh_workers: usize,
    pub crawlers_per_task: usize,
    pub claim_batch_size: usize,
    pub monitor_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
}

impl SystemConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: SystemConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment overlays per §6 "Environment variables". Applied after
    /// the file is parsed so a deployment can keep one checked-in TOML and
    /// override secrets/URLs per environment.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SITESEARCH_REDIS_URL") {
            self.storage.redis_url = v;
        }
        if let Ok(v) = std::env::var("SITESEARCH_DATABASE_URL") {
            self.storage.database_url = v;
        }
        if let Ok(v) = std::env::var("SITESEARCH_QDRANT_URL") {
            self.storage.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("SITESEARCH_EMBEDDING_URL") {
            self.indexing.embedding_url = v;
        }
        if let Ok(v) = std::env::var("SITESEARCH_EMBEDDING_API_KEY") {
            self.indexing.embedding_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("SITESEARCH_RERANKER_URL") {
            self.indexing.reranker_url = Some(v);
        }
        if let Ok(v) = std::env::var("SITESEARCH_RERANKER_API_KEY") {
            self.indexing.reranker_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("SITESEARCH_SCHEDULER_POLL_SECS") {
            if let Ok(n) = v.parse() {
                self.scheduler.poll_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SITESEARCH_CONVERTER_URL") {
            self.indexing.converter_url = v;
        }
        if let Ok(v) = std::env::var("SITESEARCH_FIRECRAWL_URL") {
            let mut cfg = self.firecrawl.take().unwrap_or(FirecrawlConfig { base_url: v.clone(), api_key: None });
            cfg.base_url = v;
            self.firecrawl = Some(cfg);
        }
        if let Ok(v) = std::env::var("SITESEARCH_FIRECRAWL_API_KEY") {
            if let Some(cfg) = self.firecrawl.as_mut() {
                cfg.api_key = Some(v);
            }
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                redis_url: "redis://localhost:6379".to_string(),
                database_url: "postgres://localhost/sitesearch".to_string(),
                qdrant_url: "http://localhost:6334".to_string(),
            },
            crawler: CrawlerConfig {
                user_agent: "SiteSearchBot/1.0".to_string(),
                connect_timeout_secs: 30,
                follow_redirects: true,
                verify_tls: true,
                proxy: None,
                cookies: Vec::new(),
                default_headers: Vec::new(),
            },
            indexing: IndexingConfig {
                embedding_url: "http://localhost:8001".to_string(),
                embedding_api_key: None,
                reranker_url: None,
                reranker_api_key: None,
                converter_url: "http://localhost:8002".to_string(),
                vector_dimension: 1024,
                chunk_size: 1024,
                chunk_overlap: 256,
                default_top_k: 10,
                rerank_top_k: 5,
                retrieval: RetrievalDefaults::default(),
            },
            workers: WorkerPoolConfig {
                cleaner_workers: 2,
                storage_workers: 2,
                indexer_workers: 2,
                refresh_workers: 1,
                crawlers_per_task: 4,
                claim_batch_size: 8,
                monitor_interval_secs: 10,
            },
            scheduler: SchedulerConfig {
                poll_interval_secs: 60,
            },
            firecrawl: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_scale_off_connect() {
        let cfg = SystemConfig::default().crawler;
        assert_eq!(cfg.read_timeout_secs(), cfg.connect_timeout_secs * 2);
        assert_eq!(cfg.write_timeout_secs(), cfg.connect_timeout_secs);
        assert_eq!(cfg.pool_timeout_secs(), cfg.connect_timeout_secs * 3);
    }

    #[test]
    fn load_round_trips_through_toml() {
        let cfg = SystemConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();

        let loaded = SystemConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.storage.redis_url, cfg.storage.redis_url);
        assert_eq!(loaded.indexing.chunk_size, cfg.indexing.chunk_size);
    }

    #[test]
    fn env_override_wins_over_file() {
        let cfg = SystemConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();

        std::env::set_var("SITESEARCH_REDIS_URL", "redis://override:6380");
        let loaded = SystemConfig::load(path.to_str().unwrap()).unwrap();
        std::env::remove_var("SITESEARCH_REDIS_URL");

        assert_eq!(loaded.storage.redis_url, "redis://override:6380");
    }

    #[test]
    fn firecrawl_env_override_creates_config_when_absent() {
        let mut cfg = SystemConfig::default();
        assert!(cfg.firecrawl.is_none());

        std::env::set_var("SITESEARCH_FIRECRAWL_URL", "https://firecrawl.example.com");
        cfg.apply_env_overrides();
        std::env::remove_var("SITESEARCH_FIRECRAWL_URL");

        let firecrawl = cfg.firecrawl.expect("firecrawl config should be set");
        assert_eq!(firecrawl.base_url, "https://firecrawl.example.com");
        assert!(firecrawl.api_key.is_none());
    }

    #[test]
    fn firecrawl_api_key_override_is_ignored_without_a_base_url() {
        let mut cfg = SystemConfig::default();
        std::env::set_var("SITESEARCH_FIRECRAWL_API_KEY", "secret");
        cfg.apply_env_overrides();
        std::env::remove_var("SITESEARCH_FIRECRAWL_API_KEY");

        assert!(cfg.firecrawl.is_none());
    }
}
