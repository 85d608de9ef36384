//! Fetch pipeline: HTTP fetch, extraction and blob write for one task
//!
//! The pipeline never talks to the coordinator. It turns a URL into either
//! a `FetchedPage` or a typed `FetchFailure` that the worker reports.

use crate::config::UserAgentConfig;
use crate::coordinator::protocol::FetchFailure;
use crate::url::domain_of;
use crate::worker::parser::{parse_html, ParsedPage};
use crate::worker::sinks::{content_address, BlobStore};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, ClientBuilder};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    pub content_type: String,
    /// Blob store key; `None` for non-HTML content, which is not stored
    pub content_ref: Option<String>,
    pub page: ParsedPage,
}

/// Fetches and processes one URL
#[async_trait]
pub trait FetchPipeline: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchFailure>;
}

const MAX_REDIRECTS: usize = 10;
const MAX_ROBOTS_REDIRECTS: usize = 5;

/// Builds an HTTP client with the crawler's user agent
///
/// Redirects are followed only within the politeness domain of the original
/// request. A redirect elsewhere is returned as is, so the pipeline can hand
/// its target back to the coordinator as a discovered link.
///
/// # Example
///
/// ```no_run
/// use driftnet::config::UserAgentConfig;
/// use driftnet::worker::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "driftnet".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    client_builder(config, timeout)
        .redirect(same_domain_redirects())
        .build()
}

/// Builds the client used for robots.txt fetches
///
/// Unlike page fetches, robots.txt redirects are followed across hosts (up
/// to five hops), since `http://example.com/robots.txt` commonly moves to
/// `https://www.example.com/robots.txt`.
pub fn build_robots_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    client_builder(config, timeout)
        .redirect(Policy::limited(MAX_ROBOTS_REDIRECTS))
        .build()
}

fn client_builder(config: &UserAgentConfig, timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .gzip(true)
        .brotli(true)
}

fn same_domain_redirects() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let same_domain = attempt
            .previous()
            .first()
            .map_or(true, |first| domain_of(first) == domain_of(attempt.url()));
        if same_domain {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

/// reqwest-backed pipeline
///
/// # Failure Mapping
///
/// | Condition | Reported as |
/// |-----------|-------------|
/// | Redirect to another domain | Success, target as the only link |
/// | Redirect without a usable `Location` | `HttpError { status }` |
/// | Other non-2xx status (including 429) | `HttpError { status }` |
/// | Request timeout | `Timeout` |
/// | Connect/redirect/body errors | `Network { message }` |
/// | Blob store write error | `Network { message }` |
#[derive(Clone)]
pub struct HttpPipeline {
    client: Client,
    blobs: Arc<dyn BlobStore>,
}

impl HttpPipeline {
    pub fn new(client: Client, blobs: Arc<dyn BlobStore>) -> Self {
        Self { client, blobs }
    }
}

#[async_trait]
impl FetchPipeline for HttpPipeline {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchFailure> {
        let response = self.client.get(url).send().await.map_err(classify_error)?;

        let status = response.status();
        if status.is_redirection() {
            return redirect_page(&response).ok_or(FetchFailure::HttpError {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchFailure::HttpError {
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !is_html(&content_type) {
            tracing::debug!("Skipping body of {} ({})", url, content_type);
            return Ok(FetchedPage {
                status: status.as_u16(),
                final_url: final_url.to_string(),
                content_type,
                content_ref: None,
                page: ParsedPage::default(),
            });
        }

        let body = response.text().await.map_err(classify_error)?;
        let page = parse_html(&body, &final_url);
        let content_ref = self
            .blobs
            .put(url, body.as_bytes())
            .await
            .map_err(|e| FetchFailure::Network {
                message: format!("blob store: {}", e),
            })?;

        Ok(FetchedPage {
            status: status.as_u16(),
            final_url: final_url.to_string(),
            content_type,
            content_ref: Some(content_ref),
            page,
        })
    }
}

/// A redirect the client stopped at, with its target as the only link
fn redirect_page(response: &reqwest::Response) -> Option<FetchedPage> {
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)?
        .to_str()
        .ok()?;
    let target = response.url().join(location).ok()?;
    tracing::debug!("{} redirects to {}", response.url(), target);

    Some(FetchedPage {
        status: response.status().as_u16(),
        final_url: response.url().to_string(),
        content_type: String::new(),
        content_ref: None,
        page: ParsedPage {
            links: vec![target.to_string()],
            ..ParsedPage::default()
        },
    })
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

fn classify_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else if e.is_connect() {
        FetchFailure::Network {
            message: format!("connection failed: {}", e),
        }
    } else {
        FetchFailure::Network {
            message: e.to_string(),
        }
    }
}

/// Serves canned pages from memory, keyed by URL
///
/// URLs without an entry fail with `HttpError { status: 404 }`. Bodies are
/// not stored; the content reference is still the URL's content address.
#[derive(Debug, Clone, Default)]
pub struct StaticPipeline {
    pages: std::collections::HashMap<String, Result<String, FetchFailure>>,
}

impl StaticPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), Ok(html.to_string()));
        self
    }

    pub fn failing(mut self, url: &str, failure: FetchFailure) -> Self {
        self.pages.insert(url.to_string(), Err(failure));
        self
    }
}

#[async_trait]
impl FetchPipeline for StaticPipeline {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchFailure> {
        match self.pages.get(url) {
            Some(Ok(html)) => {
                let base = Url::parse(url).map_err(|e| FetchFailure::ParseError {
                    message: e.to_string(),
                })?;
                Ok(FetchedPage {
                    status: 200,
                    final_url: url.to_string(),
                    content_type: "text/html".to_string(),
                    content_ref: Some(content_address(url)),
                    page: parse_html(html, &base),
                })
            }
            Some(Err(failure)) => Err(failure.clone()),
            None => Err(FetchFailure::HttpError { status: 404 }),
        }
    }
}
