//! HTTP plumbing, record store access and the export intent journal.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

pub mod journal;
pub mod records;
pub mod repository;

pub use journal::{IntentJournal, JournalEntry};
pub use records::{Filter, ListQuery, MemoryStore, PocketBaseStore, RecordStore, StoreError};
pub use repository::Repository;

pub const CRATE_NAME: &str = "roster-storage";

/// Longest body excerpt kept in error messages and logs.
const BODY_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let shift = u32::try_from(attempt_index).unwrap_or(u32::MAX);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("non-JSON response from {url}: {body}")]
    NonJson { url: String, body: String },
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(BODY_SNIPPET_CHARS).collect()
}

/// JSON-over-HTTP client rooted at a base URL with a fixed authorization header.
///
/// Only GETs are retried; mutations are sent once so a timed-out POST never books twice.
#[derive(Debug, Clone)]
pub struct JsonHttpClient {
    client: reqwest::Client,
    base_url: String,
    authorization: Option<HeaderValue>,
    backoff: BackoffPolicy,
}

impl JsonHttpClient {
    pub fn new(base_url: &str, config: &HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: None,
            backoff: config.backoff,
        })
    }

    pub fn with_authorization(mut self, value: &str) -> anyhow::Result<Self> {
        let mut header =
            HeaderValue::from_str(value).context("authorization header is not valid ASCII")?;
        header.set_sensitive(true);
        self.authorization = Some(header);
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = &self.authorization {
            headers.insert(AUTHORIZATION, auth.clone());
        }
        headers
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<JsonValue, HttpError> {
        let url = self.url_for(path);
        let span = info_span!("http_get", url = %url);

        async {
            for attempt in 0..=self.backoff.max_retries {
                let sent = self
                    .client
                    .get(&url)
                    .headers(self.headers())
                    .query(query)
                    .send()
                    .await;

                let retry = match sent {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success()
                            || classify_status(status) == RetryDisposition::NonRetryable
                            || attempt == self.backoff.max_retries
                        {
                            return Self::read_json(&url, resp).await;
                        }
                        status.to_string()
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                            || attempt == self.backoff.max_retries
                        {
                            return Err(HttpError::Request { url: url.clone(), source: err });
                        }
                        err.to_string()
                    }
                };

                let delay = self.backoff.delay_for_attempt(attempt);
                warn!(attempt, ?delay, reason = %retry, "retrying GET");
                tokio::time::sleep(delay).await;
            }
            unreachable_retry(&url)
        }
        .instrument(span)
        .await
    }

    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, HttpError> {
        let url = self.url_for(path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(self.headers());
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .instrument(info_span!("http_send", %method, url = %url))
            .await
            .map_err(|source| HttpError::Request { url: url.clone(), source })?;
        Self::read_json(&url, resp).await
    }

    async fn read_json(url: &str, resp: reqwest::Response) -> Result<JsonValue, HttpError> {
        let status = resp.status();
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        let text = resp.text().await.map_err(|source| HttpError::Request {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: snippet(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        if !is_json {
            return Err(HttpError::NonJson {
                url: url.to_string(),
                body: snippet(&text),
            });
        }
        serde_json::from_str(&text).map_err(|_| HttpError::NonJson {
            url: url.to_string(),
            body: snippet(&text),
        })
    }
}

// The retry loop always returns on its final attempt.
fn unreachable_retry(url: &str) -> Result<JsonValue, HttpError> {
    Err(HttpError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
        url: url.to_string(),
        body: "retries exhausted".to_string(),
    })
}

/// Unwraps the `{ "data": ... }` envelope both backends use, tolerating bare payloads.
pub fn envelope_data(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(JsonValue::Null)
        }
        other => other,
    }
}

/// Envelope data as a list; anything that is not an array yields an empty list.
pub fn envelope_list(value: JsonValue) -> Vec<JsonValue> {
    match envelope_data(value) {
        JsonValue::Array(items) => items,
        _ => Vec::new(),
    }
}
