//! HTTP fetch (§4.5 step 5): a `reqwest` client built from
//! `sitesearch_common::config::CrawlerConfig`'s timeouts, proxy, cookies,
//! headers, and TLS-verification policy, with the 4xx/5xx classification
//! §7 "Error Handling Design" requires.

use sitesearch_common::config::CrawlerConfig;
use sitesearch_common::{CoreError, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
    pub mimetype: String,
    pub headers: std::collections::HashMap<String, String>,
    pub final_url: String,
}

/// The crawler's classification of a non-2xx response (§7).
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ok(FetchResponse),
    /// 4xx: unconditionally a skip.
    ClientError { status_code: u16 },
    /// 5xx: a skip at the crawler, but instructs storage to delete the URL
    /// if it was previously known (§4.5 step 5, §7).
    ServerError { status_code: u16 },
}

#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
}

impl FetchClient {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs()))
            .danger_accept_invalid_certs(!config.verify_tls);

        builder = if config.follow_redirects {
            builder.redirect(reqwest::redirect::Policy::limited(1))
        } else {
            builder.redirect(reqwest::redirect::Policy::none())
        };

        if let Some(proxy) = &config.proxy {
            builder = builder
                .proxy(reqwest::Proxy::all(proxy).map_err(|e| CoreError::Http(e.to_string()))?);
        }

        if !config.default_headers.is_empty() {
            let mut header_map = reqwest::header::HeaderMap::new();
            for (k, v) in &config.default_headers {
                if let (Ok(name), Ok(value)) = (
                    reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                    reqwest::header::HeaderValue::from_str(v),
                ) {
                    header_map.insert(name, value);
                }
            }
            builder = builder.default_headers(header_map);
        }

        if !config.cookies.is_empty() {
            builder = builder.cookie_store(true);
        }

        let client = builder
            .build()
            .map_err(|e| CoreError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetch `url`, classifying the response per §4.5 step 5 / §7.
    pub async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::Http(e.to_string()))?;

        let status = response.status();
        let final_url = response.url().to_string();

        if status.is_client_error() {
            return Ok(FetchOutcome::ClientError { status_code: status.as_u16() });
        }
        if status.is_server_error() {
            return Ok(FetchOutcome::ServerError { status_code: status.as_u16() });
        }

        let mimetype = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::Http(e.to_string()))?
            .to_vec();

        Ok(FetchOutcome::Ok(FetchResponse {
            status_code: status.as_u16(),
            body,
            mimetype,
            headers,
            final_url,
        }))
    }
}

/// Plain-text MIME types whose body is carried as text rather than
/// base64-encoded bytes (§4.5 step 6).
pub fn is_text_mimetype(mimetype: &str) -> bool {
    mimetype.starts_with("text/")
        || mimetype == "application/json"
        || mimetype == "application/xml"
        || mimetype == "application/xhtml+xml"
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn default_config() -> CrawlerConfig {
        CrawlerConfig {
            user_agent: "SiteSearchBot/1.0".to_string(),
            connect_timeout_secs: 5,
            follow_redirects: true,
            verify_tls: true,
            proxy: None,
            cookies: Vec::new(),
            default_headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fetches_2xx_as_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello").insert_header("content-type", "text/html"))
            .mount(&server)
            .await;

        let client = FetchClient::new(&default_config()).unwrap();
        let outcome = client.fetch(&format!("{}/page", server.uri())).await.unwrap();
        match outcome {
            FetchOutcome::Ok(resp) => {
                assert_eq!(resp.status_code, 200);
                assert_eq!(resp.mimetype, "text/html");
                assert_eq!(resp.body, b"hello");
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn classifies_404_as_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = FetchClient::new(&default_config()).unwrap();
        let outcome = client.fetch(&format!("{}/missing", server.uri())).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::ClientError { status_code: 404 }));
    }

    #[tokio::test]
    async fn classifies_500_as_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = FetchClient::new(&default_config()).unwrap();
        let outcome = client.fetch(&format!("{}/broken", server.uri())).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::ServerError { status_code: 500 }));
    }

    #[test]
    fn text_mimetype_classification() {
        assert!(is_text_mimetype("text/html"));
        assert!(is_text_mimetype("application/json"));
        assert!(!is_text_mimetype("application/pdf"));
        assert!(!is_text_mimetype("image/png"));
    }
}
