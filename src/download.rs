//! Artifact download with retry, backoff and progress tracking.
//!
//! Downloading is split in two layers:
//! - a [`Transport`] performs exactly one request and classifies its failure;
//! - [`RetryingFetcher`] drives attempts under a [`RetryPolicy`] and is the
//!   [`ArtifactFetcher`] the installer talks to.
//!
//! Nothing in this module writes to disk. The fetched bytes stay in memory
//! until they have been verified.

use crate::retry::{RetryDecision, RetryPolicy};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("pour/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Likely to succeed on retry (timeout, reset connection, 5xx).
    Transient,
    /// Will not succeed without an external change (404, malformed URL).
    Permanent,
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("failed to fetch {url}: {reason}")]
    Permanent { url: String, reason: String },

    #[error("gave up fetching {url} after {attempts} attempt(s)")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<NetworkError>,
    },
}

impl NetworkError {
    /// Exhausted retries count as permanent: the caller must not retry again.
    pub fn kind(&self) -> FailureKind {
        match self {
            NetworkError::Transient { .. } => FailureKind::Transient,
            NetworkError::Permanent { .. } | NetworkError::Exhausted { .. } => {
                FailureKind::Permanent
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    pub fn url(&self) -> &str {
        match self {
            NetworkError::Transient { url, .. }
            | NetworkError::Permanent { url, .. }
            | NetworkError::Exhausted { url, .. } => url,
        }
    }

    fn transient(url: &str, reason: impl Into<String>) -> Self {
        NetworkError::Transient {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    fn permanent(url: &str, reason: impl Into<String>) -> Self {
        NetworkError::Permanent {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Bytes retrieved by a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub bytes: Bytes,
    pub source_url: String,
    /// Number of attempts it took, including the successful one.
    pub attempts: u32,
}

/// Retrieves an artifact, retrying transient failures internally.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResult, NetworkError>;
}

/// One download attempt, with no retrying.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes, NetworkError>;
}

/// Classify an HTTP status for retry decisions.
pub fn classify_status(status: StatusCode) -> FailureKind {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

fn status_error(url: &str, status: StatusCode) -> NetworkError {
    let reason = format!("HTTP {status}");
    match classify_status(status) {
        FailureKind::Transient => NetworkError::transient(url, reason),
        FailureKind::Permanent => NetworkError::permanent(url, reason),
    }
}

/// Map a reqwest error onto transient/permanent.
fn request_error(url: &str, err: reqwest::Error) -> NetworkError {
    if let Some(status) = err.status() {
        return status_error(url, status);
    }
    if err.is_builder() || err.is_redirect() {
        return NetworkError::permanent(url, err.to_string());
    }
    // Timeouts, refused/reset connections and truncated bodies
    NetworkError::transient(url, err.to_string())
}

/// Reject URLs no retry could fix.
pub fn validate_url(url: &str) -> Result<reqwest::Url, NetworkError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| NetworkError::permanent(url, format!("malformed URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(NetworkError::permanent(
            url,
            format!("unsupported URL scheme `{other}`"),
        )),
    }
}

/// HTTP transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    progress: bool,
}

impl HttpTransport {
    /// Create a transport with the default client configuration.
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            progress: false,
        }
    }

    /// Show a progress bar on stderr while downloading.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn progress_bar(&self, url: &str, total: Option<u64>) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total.unwrap_or(0));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        let name = url.rsplit('/').next().unwrap_or(url);
        pb.set_message(format!("⬇ {name}"));
        pb
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Bytes, NetworkError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }

        let total = response.content_length();
        let pb = self.progress_bar(url, total);
        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0).min(64 << 20) as usize);

        while let Some(chunk) = response.chunk().await.map_err(|e| {
            pb.abandon();
            request_error(url, e)
        })? {
            buffer.extend_from_slice(&chunk);
            pb.set_position(buffer.len() as u64);
        }

        if let Some(expected) = total
            && expected != buffer.len() as u64
        {
            pb.abandon();
            return Err(NetworkError::transient(
                url,
                format!(
                    "connection closed after {} of {} bytes",
                    buffer.len(),
                    expected
                ),
            ));
        }

        pb.finish_and_clear();
        Ok(buffer.freeze())
    }
}

/// [`ArtifactFetcher`] that retries transient transport failures.
#[derive(Debug, Clone)]
pub struct RetryingFetcher<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: Transport> ArtifactFetcher for RetryingFetcher<T> {
    async fn fetch(&self, url: &str) -> Result<FetchResult, NetworkError> {
        validate_url(url)?;

        let started = Instant::now();
        let mut attempt = 1u32;

        loop {
            let timeout = self.policy.attempt_timeout_after(started.elapsed());
            debug!(url, attempt, ?timeout, "fetching artifact");

            let outcome = match tokio::time::timeout(timeout, self.transport.get(url)).await {
                Ok(result) => result,
                Err(_) => Err(NetworkError::transient(
                    url,
                    format!("attempt timed out after {timeout:?}"),
                )),
            };

            let err = match outcome {
                Ok(bytes) => {
                    debug!(url, attempt, size = bytes.len(), "fetched artifact");
                    return Ok(FetchResult {
                        bytes,
                        source_url: url.to_string(),
                        attempts: attempt,
                    });
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            match self.policy.decide(attempt, started.elapsed()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(url, attempt, ?delay, error = %err, "transient download failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::Stop(reason) => {
                    warn!(url, attempt, ?reason, error = %err, "giving up on download");
                    return Err(NetworkError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
            }
        }
    }
}
