//! Downtime notifications.
//!
//! The coordinator only talks to the [`Notifier`] and
//! [`NotificationPreferences`] traits. Delivery is fire-and-forget from its
//! point of view: errors are logged and never fail a check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::store::TargetId;

/// Upper bound on a single webhook delivery.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook rejected notification with status {0}")]
    Rejected(u16),
}

/// Emitted when a target goes from online to offline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DowntimeEvent {
    pub target_id: TargetId,
    pub target_name: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_downtime(&self, event: &DowntimeEvent) -> Result<(), NotifyError>;
}

/// Per-target notification opt-in lookup.
pub trait NotificationPreferences: Send + Sync {
    fn is_enabled(&self, id: &TargetId) -> bool;
}

/// Notifier that only writes the event to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_downtime(&self, event: &DowntimeEvent) -> Result<(), NotifyError> {
        tracing::warn!(
            target_id = %event.target_id,
            url = %event.url,
            "{} is down (detected at {})",
            event.target_name,
            event.timestamp.to_rfc3339()
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookMessage {
    content: String,
}

/// Posts a Discord-compatible `{"content": ...}` message to a webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    mention: Option<String>,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>, mention: Option<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(webhook_url, mention, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Like [`WebhookNotifier::new`], bounding each delivery by `timeout`.
    pub fn with_timeout(
        webhook_url: impl Into<String>,
        mention: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            mention,
        })
    }

    fn message(&self, event: &DowntimeEvent) -> String {
        // If no mention is configured, nobody gets tagged.
        let tag = self
            .mention
            .as_ref()
            .map_or(String::new(), |id| format!("<@{}> ", id));

        format!(
            "{}Alert: {} ({}) is DOWN! Detected at {}",
            tag,
            event.target_name,
            event.url,
            event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_downtime(&self, event: &DowntimeEvent) -> Result<(), NotifyError> {
        let payload = WebhookMessage {
            content: self.message(event),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(resp.status().as_u16()));
        }

        tracing::info!(target_id = %event.target_id, "Sent downtime notification");
        Ok(())
    }
}

/// In-memory notification preferences with a default for targets that have
/// no explicit setting.
#[derive(Debug, Default)]
pub struct PreferenceSet {
    default_enabled: bool,
    overrides: RwLock<HashMap<TargetId, bool>>,
}

impl PreferenceSet {
    pub fn new(default_enabled: bool) -> Self {
        Self {
            default_enabled,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, id: TargetId, enabled: bool) {
        tracing::info!(target_id = %id, enabled, "Set notification preference");
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, enabled);
    }

    /// Drop the explicit setting for a deleted target.
    pub fn clear(&self, id: &TargetId) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Targets among `ids` with notifications enabled.
    pub fn enabled_among<'a>(&self, ids: impl IntoIterator<Item = &'a TargetId>) -> Vec<TargetId> {
        ids.into_iter()
            .filter(|id| self.is_enabled(id))
            .cloned()
            .collect()
    }
}

impl NotificationPreferences for PreferenceSet {
    fn is_enabled(&self, id: &TargetId) -> bool {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(self.default_enabled)
    }
}
