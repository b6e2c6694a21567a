//! HTTP probe implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use super::{ProbeError, ProbeOutcome, Prober};

/// Upper bound on a whole probe, HEAD and GET fallback included.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = concat!("sitewatch/", env!("CARGO_PKG_VERSION"));

/// Probes targets with a HEAD request, falling back to GET when HEAD is
/// refused.
#[derive(Clone)]
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let result = run_http_probe(&self.client, url, self.timeout).await;

        match &result {
            Ok(ms) => tracing::debug!(url, response_time_ms = ms, "probe succeeded"),
            Err(e) => tracing::debug!(url, error = %e, "probe failed"),
        }

        result.into()
    }
}

/// Run an HTTP probe against `url`.
///
/// Returns the time to response headers in milliseconds when the status code
/// is 2xx or 3xx.
pub async fn run_http_probe(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<u64, ProbeError> {
    let start = Instant::now();

    let status = match tokio::time::timeout(timeout, head_then_get(client, url)).await {
        Ok(result) => result?,
        Err(_) => return Err(ProbeError::Timeout),
    };

    let elapsed = start.elapsed().as_millis() as u64;

    if status.is_success() || status.is_redirection() {
        Ok(elapsed)
    } else {
        Err(ProbeError::Status(status.as_u16()))
    }
}

async fn head_then_get(client: &Client, url: &str) -> Result<StatusCode, ProbeError> {
    match client.head(url).send().await {
        Ok(resp) if !head_unsupported(resp.status()) => return Ok(resp.status()),
        Ok(resp) => {
            tracing::debug!(url, status = %resp.status(), "HEAD refused, retrying with GET");
        }
        Err(e) if !retry_with_get(&e) => return Err(classify_error(e)),
        Err(e) => {
            tracing::debug!(url, error = %e, "HEAD failed, retrying with GET");
        }
    }

    // Only the status line matters; the body is never read.
    let resp = client.get(url).send().await.map_err(classify_error)?;
    Ok(resp.status())
}

/// Whether a failed HEAD is worth repeating as GET. A timeout, a bad URL or
/// an unreachable host would fail the same way again.
fn retry_with_get(e: &reqwest::Error) -> bool {
    !(e.is_timeout() || e.is_builder() || e.is_connect())
}

fn head_unsupported(status: StatusCode) -> bool {
    status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED
}

fn classify_error(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else if e.is_builder() {
        ProbeError::InvalidUrl(root_cause(&e))
    } else if e.is_connect() {
        ProbeError::Connect(root_cause(&e))
    } else {
        ProbeError::Request(root_cause(&e))
    }
}

/// The innermost error message, which names the real failure (DNS, refused,
/// TLS) rather than reqwest's generic wrapper.
fn root_cause(e: &(dyn StdError + 'static)) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
