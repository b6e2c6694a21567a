//! Probe module for reachability checks.
//!
//! A probe never fails: every transport or protocol problem is folded into an
//! offline [`ProbeOutcome`] carrying the reason.

mod http;

pub use http::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::CheckStatus;

/// Reasons a target is considered unreachable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("timeout")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: CheckStatus,
    /// Set only when the target answered with a 2xx/3xx status.
    pub response_time_millis: Option<u64>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn online(response_time_millis: u64) -> Self {
        Self {
            status: CheckStatus::Online,
            response_time_millis: Some(response_time_millis),
            error: None,
        }
    }

    pub fn offline(reason: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Offline,
            response_time_millis: None,
            error: Some(reason.into()),
        }
    }
}

impl From<Result<u64, ProbeError>> for ProbeOutcome {
    fn from(result: Result<u64, ProbeError>) -> Self {
        match result {
            Ok(ms) => ProbeOutcome::online(ms),
            Err(e) => ProbeOutcome::offline(e.to_string()),
        }
    }
}

/// Performs reachability checks.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `url` and report whether it is reachable.
    async fn probe(&self, url: &str) -> ProbeOutcome;
}
