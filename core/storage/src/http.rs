//! HTTP page fetcher for the WaniKani v2 REST API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use kanisync_common::{CollectionRequest, Error, Page, Record, ResourceType, Result, Snapshot};

use crate::fetcher::{PageFetcher, PageStream};
use crate::retry::{RetryConfig, RetryExecutor};

/// Public API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.wanikani.com/v2/";

/// API revision the decoders are written against.
const API_REVISION: &str = "20170710";
const REVISION_HEADER: &str = "Wanikani-Revision";
/// Epoch second at which the rate-limit window resets.
const RATE_LIMIT_RESET_HEADER: &str = "ratelimit-reset";

/// Settings for [`HttpFetcher`].
#[derive(Clone)]
pub struct HttpConfig {
    /// API root; collection endpoints are resolved relative to it.
    pub base_url: String,
    /// Personal access token.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for transient request failures.
    pub retry: RetryConfig,
}

impl HttpConfig {
    /// Create a configuration for the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Point at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CollectionBody {
    total_count: u64,
    pages: PagesBody,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PagesBody {
    per_page: u32,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemHeader {
    id: i64,
    #[serde(default)]
    data_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ResourceBody {
    data_updated_at: DateTime<Utc>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Path of a resource type's endpoint relative to the API root.
fn endpoint(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::User => "user",
        ResourceType::Assignments => "assignments",
        ResourceType::LevelProgression => "level_progressions",
        ResourceType::ReviewStatistics => "review_statistics",
        ResourceType::StudyMaterials => "study_materials",
        ResourceType::Subjects => "subjects",
    }
}

fn estimated_page_count(total_count: u64, per_page: u32) -> u32 {
    if total_count == 0 {
        0
    } else if per_page == 0 {
        1
    } else {
        total_count.div_ceil(u64::from(per_page)) as u32
    }
}

fn decode_item(value: serde_json::Value) -> Result<Record> {
    let item: ItemHeader = serde_json::from_value(value.clone())
        .map_err(|e| Error::Decode(format!("Invalid collection item: {}", e)))?;
    let hidden = value
        .pointer("/data/hidden_at")
        .is_some_and(|hidden_at| !hidden_at.is_null());

    Ok(Record {
        id: item.id,
        updated_at: item.data_updated_at,
        hidden,
        payload: value,
    })
}

fn decode_collection(value: serde_json::Value) -> Result<(Page, Option<Url>)> {
    let body: CollectionBody = serde_json::from_value(value)
        .map_err(|e| Error::Decode(format!("Invalid collection body: {}", e)))?;

    let next_url = body
        .pages
        .next_url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| Error::Decode(format!("Invalid next page URL: {}", e)))?;

    let records = body
        .data
        .into_iter()
        .map(decode_item)
        .collect::<Result<Vec<_>>>()?;

    let page = Page::new(
        records,
        body.total_count,
        estimated_page_count(body.total_count, body.pages.per_page),
    );
    Ok((page, next_url))
}

fn decode_snapshot(value: serde_json::Value) -> Result<Snapshot> {
    let body: ResourceBody = serde_json::from_value(value)
        .map_err(|e| Error::Decode(format!("Invalid resource body: {}", e)))?;

    Ok(Snapshot {
        data_updated_at: body.data_updated_at,
        record: body.data.map(|data| Record {
            id: 0,
            updated_at: Some(body.data_updated_at),
            hidden: false,
            payload: data,
        }),
    })
}

/// Wait requested by a throttling response, from `Retry-After` (seconds or
/// HTTP date) or else `RateLimit-Reset`. A time already past means no wait.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let until = |at: DateTime<Utc>| (at - now).to_std().unwrap_or(Duration::ZERO);

    if let Some(value) = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            return Some(until(at.with_timezone(&Utc)));
        }
    }

    headers
        .get(RATE_LIMIT_RESET_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0))
        .map(until)
}

/// Map a non-success status to the error taxonomy.
fn status_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> Error {
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        Error::NoContent
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::Unauthorized(format!("API refused credentials: {}", status))
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited {
            message: format!("{} - {}", status, body),
            retry_after,
        }
    } else if status.is_server_error() {
        Error::Transport(format!("API error: {} - {}", status, body))
    } else {
        Error::InvalidInput(format!("API rejected request: {} - {}", status, body))
    }
}

/// Page fetcher backed by `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
    base_url: Url,
    token: String,
    retry: RetryExecutor,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Create a fetcher.
    ///
    /// # Errors
    /// - `InvalidInput` if the base URL does not parse
    /// - `Transport` if the HTTP client cannot be built
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut base = config.base_url;
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL {}: {}", base, e)))?;

        let http = Client::builder()
            .user_agent(concat!("kanisync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            token: config.token,
            retry: RetryExecutor::new(config.retry),
        })
    }

    fn resource_url(&self, resource_type: ResourceType) -> Result<Url> {
        self.base_url
            .join(endpoint(resource_type))
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint URL: {}", e)))
    }

    fn collection_url(&self, request: &CollectionRequest) -> Result<Url> {
        let mut url = self.resource_url(request.resource_type)?;
        if let Some(since) = request.updated_after {
            url.query_pairs_mut().append_pair(
                "updated_after",
                &since.to_rfc3339_opts(SecondsFormat::Micros, true),
            );
        }
        Ok(url)
    }

    async fn get_json(&self, url: &Url) -> Result<serde_json::Value> {
        self.retry
            .execute(move || async move {
                let response = self
                    .http
                    .get(url.clone())
                    .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
                    .header(REVISION_HEADER, API_REVISION)
                    .send()
                    .await
                    .map_err(|e| Error::Transport(format!("Request to {} failed: {}", url, e)))?;

                let status = response.status();
                if status.is_success() && status != StatusCode::NO_CONTENT {
                    response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| Error::Decode(format!("Failed to parse response: {}", e)))
                } else {
                    let wait = retry_after(response.headers(), Utc::now());
                    let body = response.text().await.unwrap_or_default();
                    Err(status_error(status, &body, wait))
                }
            })
            .await
    }

    async fn fetch_page(&self, url: &Url) -> Result<(Page, Option<Url>)> {
        debug!("Fetching page {}", url);
        let value = self.get_json(url).await?;
        decode_collection(value)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_snapshot(&self, resource_type: ResourceType) -> Result<Snapshot> {
        let url = self.resource_url(resource_type)?;
        debug!("Fetching resource {}", url);
        let value = self.get_json(&url).await?;
        decode_snapshot(value)
    }

    async fn fetch_collection(&self, request: CollectionRequest) -> Result<PageStream> {
        let first = self.collection_url(&request)?;
        let fetcher = self.clone();

        let pages = stream::unfold(Some(first), move |next| {
            let fetcher = fetcher.clone();
            async move {
                let url = next?;
                match fetcher.fetch_page(&url).await {
                    Ok((page, next_url)) => Some((Ok(page), next_url)),
                    Err(e) => Some((Err(e), None)),
                }
            }
        });

        Ok(Box::pin(pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpConfig::new("token").with_base_url("https://example.test/v2"))
            .unwrap()
    }

    #[test]
    fn test_collection_url_full_fetch() {
        let url = fetcher()
            .collection_url(&CollectionRequest::full(ResourceType::LevelProgression))
            .unwrap();
        assert_eq!(url.as_str(), "https://example.test/v2/level_progressions");
    }

    #[test]
    fn test_collection_url_incremental_fetch() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let url = fetcher()
            .collection_url(&CollectionRequest::updated_after(ResourceType::Assignments, since))
            .unwrap();
        assert_eq!(url.path(), "/v2/assignments");
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "updated_after");
        assert_eq!(value, "2024-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpFetcher::new(HttpConfig::new("t").with_base_url("not a url")).is_err());
    }

    #[test]
    fn test_decode_collection() {
        let body = json!({
            "object": "collection",
            "total_count": 1200,
            "data_updated_at": "2024-01-02T00:00:00.000000Z",
            "pages": {
                "per_page": 500,
                "next_url": "https://example.test/v2/subjects?page_after_id=500"
            },
            "data": [
                {
                    "id": 1,
                    "object": "radical",
                    "data_updated_at": "2024-01-01T12:00:00.000000Z",
                    "data": { "level": 1, "hidden_at": null }
                },
                {
                    "id": 2,
                    "object": "radical",
                    "data_updated_at": "2024-01-01T13:00:00.000000Z",
                    "data": { "level": 1, "hidden_at": "2023-12-01T00:00:00.000000Z" }
                }
            ]
        });

        let (page, next) = decode_collection(body).unwrap();
        assert_eq!(page.total_count, 1200);
        assert_eq!(page.estimated_page_count, 3);
        assert_eq!(page.records.len(), 2);
        assert!(!page.records[0].hidden);
        assert!(page.records[1].hidden);
        assert_eq!(
            page.records[0].updated_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(
            next.unwrap().as_str(),
            "https://example.test/v2/subjects?page_after_id=500"
        );
    }

    #[test]
    fn test_decode_empty_collection() {
        let body = json!({
            "total_count": 0,
            "pages": { "per_page": 500, "next_url": null },
            "data": []
        });

        let (page, next) = decode_collection(body).unwrap();
        assert!(page.is_empty_result());
        assert!(next.is_none());
    }

    #[test]
    fn test_decode_item_without_id_fails() {
        let err = decode_item(json!({ "object": "assignment" })).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_decode_snapshot() {
        let snapshot = decode_snapshot(json!({
            "object": "user",
            "data_updated_at": "2024-01-01T00:00:00.000000Z",
            "data": { "username": "koichi", "level": 5 }
        }))
        .unwrap();
        let record = snapshot.record.unwrap();
        assert_eq!(record.payload["level"], 5);
        assert_eq!(record.updated_at, Some(snapshot.data_updated_at));

        let empty = decode_snapshot(json!({
            "data_updated_at": "2024-01-01T00:00:00.000000Z",
            "data": null
        }))
        .unwrap();
        assert!(empty.record.is_none());
    }

    #[test]
    fn test_estimated_page_count() {
        assert_eq!(estimated_page_count(0, 500), 0);
        assert_eq!(estimated_page_count(1, 500), 1);
        assert_eq!(estimated_page_count(500, 500), 1);
        assert_eq!(estimated_page_count(501, 500), 2);
        assert_eq!(estimated_page_count(10, 0), 1);
    }

    #[test]
    fn test_status_mapping() {
        let mapped = |status| status_error(status, "", None);
        assert!(matches!(mapped(StatusCode::NOT_MODIFIED), Error::NoContent));
        assert!(matches!(mapped(StatusCode::NO_CONTENT), Error::NoContent));
        assert!(matches!(mapped(StatusCode::UNAUTHORIZED), Error::Unauthorized(_)));
        assert!(matches!(mapped(StatusCode::BAD_GATEWAY), Error::Transport(_)));
        assert!(matches!(mapped(StatusCode::NOT_FOUND), Error::InvalidInput(_)));
        assert!(!mapped(StatusCode::NOT_FOUND).is_transient());
    }

    #[test]
    fn test_too_many_requests_carries_server_wait() {
        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            "slow down",
            Some(Duration::from_secs(12)),
        );
        assert!(matches!(err, Error::RateLimited { .. }));
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_retry_after_headers() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
            let mut map = HeaderMap::new();
            for (name, value) in pairs {
                map.insert(*name, value.parse().unwrap());
            }
            map
        }

        assert_eq!(
            retry_after(&headers(&[("retry-after", "30")]), now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Mon, 01 Jan 2024 12:00:45 GMT")]), now),
            Some(Duration::from_secs(45))
        );

        let reset = now.timestamp() + 20;
        assert_eq!(
            retry_after(&headers(&[("ratelimit-reset", reset.to_string().as_str())]), now),
            Some(Duration::from_secs(20))
        );

        let past = now.timestamp() - 5;
        assert_eq!(
            retry_after(&headers(&[("ratelimit-reset", past.to_string().as_str())]), now),
            Some(Duration::ZERO)
        );

        assert_eq!(retry_after(&headers(&[]), now), None);
        assert_eq!(retry_after(&headers(&[("retry-after", "soon")]), now), None);
    }
}
