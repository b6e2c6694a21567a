//! Target model types.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::MonitorError;

/// Maximum number of check records kept per target.
pub const HISTORY_CAPACITY: usize = 100;

/// Opaque, immutable target identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Generate a fresh identifier: hex millisecond timestamp plus a random suffix.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(format!("{:x}-{}", millis, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Current health of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
    /// A check has been dispatched and has not resolved yet.
    Checking,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
            Status::Checking => "checking",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Status::Online),
            "offline" => Ok(Status::Offline),
            "checking" => Ok(Status::Checking),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Outcome of a completed check. Never `Checking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Online,
    Offline,
}

impl From<CheckStatus> for Status {
    fn from(s: CheckStatus) -> Self {
        match s {
            CheckStatus::Online => Status::Online,
            CheckStatus::Offline => Status::Offline,
        }
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(CheckStatus::Online),
            "offline" => Ok(CheckStatus::Offline),
            other => Err(format!("invalid check status: {}", other)),
        }
    }
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        Status::from(*self).as_str()
    }
}

/// A single entry in a target's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub timestamp: DateTime<Utc>,
    pub status: CheckStatus,
    /// Present only when the target was reachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_millis: Option<u64>,
}

impl CheckRecord {
    pub fn online(timestamp: DateTime<Utc>, response_time_millis: u64) -> Self {
        Self {
            timestamp,
            status: CheckStatus::Online,
            response_time_millis: Some(response_time_millis),
        }
    }

    pub fn offline(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            status: CheckStatus::Offline,
            response_time_millis: None,
        }
    }
}

/// A monitored website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub url: String,
    pub status: Status,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub history: VecDeque<CheckRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Target {
    /// Build a new target from user input, validating the name and
    /// normalizing the URL.
    pub fn new(name: &str, url: &str) -> Result<Self, MonitorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MonitorError::validation("name is required"));
        }

        Ok(Self {
            id: TargetId::generate(),
            name: name.to_string(),
            url: normalize_url(url)?,
            status: Status::Checking,
            last_checked: None,
            created_at: Utc::now(),
            history: VecDeque::new(),
            last_error: None,
        })
    }

    /// Record a completed check: status, history (with eviction), last
    /// checked time and last error.
    pub fn record_check(&mut self, record: CheckRecord, error: Option<String>) {
        self.status = record.status.into();
        self.last_checked = Some(record.timestamp);
        self.last_error = match record.status {
            CheckStatus::Online => None,
            CheckStatus::Offline => error,
        };

        self.history.push_back(record);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    /// Check a target decoded from storage.
    ///
    /// Used at the storage boundary: anything that would not have been
    /// produced by `Target::new` plus `record_check` is rejected. An
    /// over-long history keeps its newest entries.
    pub fn validate(mut self) -> Result<Self, MonitorError> {
        if self.id.as_str().trim().is_empty() {
            return Err(MonitorError::validation("id is empty"));
        }
        if self.name.trim().is_empty() {
            return Err(MonitorError::validation("name is required"));
        }
        let normalized = normalize_url(&self.url)?;
        if normalized != self.url {
            return Err(MonitorError::validation(format!(
                "url {:?} is not normalized",
                self.url
            )));
        }
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
        Ok(self)
    }
}

/// Normalize user input into an absolute http(s) URL.
///
/// A value without a scheme is treated as `https://`. A bare origin is
/// returned without a trailing slash.
pub fn normalize_url(input: &str) -> Result<String, MonitorError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(MonitorError::validation("url is required"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| MonitorError::validation(format!("invalid url {:?}: {}", trimmed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(MonitorError::validation(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(MonitorError::validation(format!(
            "url {:?} has no host",
            trimmed
        )));
    }

    let mut normalized = url.to_string();
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        normalized.pop();
    }
    Ok(normalized)
}
