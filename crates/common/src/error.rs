use thiserror::Error;

/// Top-level error for the SiteSearch core.
///
/// Every crate-specific error (`sitesearch-broker`, `sitesearch-storage`, ...)
/// converts into this one at the boundary where a worker reports outcome to
/// its queue, so callers only ever need to match on one enum.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("unsupported mime type: {0}")]
    UnsupportedMime(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("storage integrity conflict: {0}")]
    StorageConflict(String),

    #[error("indexer failure: {0}")]
    IndexerFailure(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Outcome of processing a single queue envelope, matching the task's
/// ack-success / ack-skip / ack-failure trichotomy in the broker client.
///
/// Replaces the `SkipError` exception idiom of the source system with an
/// explicit result variant (see DESIGN.md for the corresponding design
/// note).
#[derive(Debug, Error)]
pub enum WorkerFailure {
    /// The envelope should be dropped without being recorded as a failure
    /// (e.g. a 4xx crawl response, an already-crawled URL).
    #[error("skip: {0}")]
    Skip(String),

    /// The envelope should be moved to the `failed:*` queue for operator
    /// inspection.
    #[error("fail: {0}")]
    Fail(#[from] CoreError),
}

impl WorkerFailure {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }
}
