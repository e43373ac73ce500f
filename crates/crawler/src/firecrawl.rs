//! Firecrawl-style LLM-driven crawler client (§6 "LLM-driven crawler
//! (optional `firecrawl` type)"), an out-of-scope external collaborator
//! whose interface is specified and implemented as a black-box HTTP client,
//! the same seam `sitesearch-index::embed` uses for the embedding/reranker
//! services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitesearch_common::retry::{with_retry, RetryPolicy};
use sitesearch_common::{CoreError, Result};
use std::time::Duration;

/// One page returned by `scrape_url` or as an item of `crawl_url`'s batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirecrawlPage {
    pub markdown: Option<String>,
    pub html: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// The URL the page was actually fetched from (Firecrawl resolves
    /// redirects server-side), falling back to the request URL.
    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
pub trait FirecrawlClient: Send + Sync {
    async fn scrape_url(&self, url: &str, formats: &[&str]) -> Result<FirecrawlPage>;
    async fn crawl_url(&self, url: &str) -> Result<String>;
    async fn check_crawl_status(&self, id: &str) -> Result<CrawlStatus>;
}

#[derive(Debug, Clone)]
pub struct CrawlStatus {
    pub completed: bool,
    pub pages: Vec<FirecrawlPage>,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
}

#[derive(Serialize)]
struct CrawlRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct CrawlStartResponse {
    id: String,
}

#[derive(Deserialize)]
struct CrawlStatusResponse {
    status: String,
    #[serde(default)]
    data: Vec<FirecrawlPage>,
}

pub struct HttpFirecrawlClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpFirecrawlClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl FirecrawlClient for HttpFirecrawlClient {
    async fn scrape_url(&self, url: &str, formats: &[&str]) -> Result<FirecrawlPage> {
        let body = ScrapeRequest { url, formats };
        with_retry(RetryPolicy::external_service(), || async {
            self.request(reqwest::Method::POST, "/v1/scrape")
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| CoreError::Http(e.to_string()))?
                .json::<FirecrawlPage>()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))
        })
        .await
    }

    async fn crawl_url(&self, url: &str) -> Result<String> {
        let body = CrawlRequest { url };
        let resp: CrawlStartResponse = with_retry(RetryPolicy::external_service(), || async {
            self.request(reqwest::Method::POST, "/v1/crawl")
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| CoreError::Http(e.to_string()))?
                .json::<CrawlStartResponse>()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))
        })
        .await?;
        Ok(resp.id)
    }

    async fn check_crawl_status(&self, id: &str) -> Result<CrawlStatus> {
        let resp: CrawlStatusResponse = with_retry(RetryPolicy::external_service(), || async {
            self.request(reqwest::Method::GET, &format!("/v1/crawl/{id}"))
                .send()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| CoreError::Http(e.to_string()))?
                .json::<CrawlStatusResponse>()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))
        })
        .await?;
        Ok(CrawlStatus {
            completed: resp.status == "completed",
            pages: resp.data,
        })
    }
}

/// Poll `check_crawl_status` until it reports completion or `max_polls` is
/// reached, sleeping `poll_interval` between checks.
pub async fn wait_for_crawl(
    client: &dyn FirecrawlClient,
    id: &str,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<Vec<FirecrawlPage>> {
    for attempt in 0..max_polls {
        let status = client.check_crawl_status(id).await?;
        if status.completed {
            return Ok(status.pages);
        }
        if attempt + 1 < max_polls {
            tokio::time::sleep(poll_interval).await;
        }
    }
    Err(CoreError::Http(format!("firecrawl job {id} did not complete within the poll budget")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakeClient {
        polls_until_done: u32,
        calls: AtomicU32,
        pages: Mutex<Vec<FirecrawlPage>>,
    }

    #[async_trait]
    impl FirecrawlClient for FakeClient {
        async fn scrape_url(&self, _url: &str, _formats: &[&str]) -> Result<FirecrawlPage> {
            unimplemented!()
        }
        async fn crawl_url(&self, _url: &str) -> Result<String> {
            Ok("job-1".to_string())
        }
        async fn check_crawl_status(&self, _id: &str) -> Result<CrawlStatus> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CrawlStatus {
                completed: call + 1 >= self.polls_until_done,
                pages: if call + 1 >= self.polls_until_done {
                    self.pages.lock().unwrap().clone()
                } else {
                    Vec::new()
                },
            })
        }
    }

    #[tokio::test]
    async fn wait_for_crawl_polls_until_complete() {
        let client = FakeClient {
            polls_until_done: 3,
            calls: AtomicU32::new(0),
            pages: Mutex::new(vec![FirecrawlPage { title: Some("T".into()), ..Default::default() }]),
        };
        let pages = wait_for_crawl(&client, "job-1", Duration::from_millis(1), 5).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wait_for_crawl_gives_up_after_max_polls() {
        let client = FakeClient {
            polls_until_done: 10,
            calls: AtomicU32::new(0),
            pages: Mutex::new(Vec::new()),
        };
        let result = wait_for_crawl(&client, "job-1", Duration::from_millis(1), 2).await;
        assert!(result.is_err());
    }
}
