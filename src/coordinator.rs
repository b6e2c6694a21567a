//! Runs checks with at most one in flight per target.
//!
//! Per target the state machine is Idle -> InFlight -> Idle. The in-flight
//! marker is taken under a single mutex together with the registry's switch
//! to `Checking`, so two concurrent requests can never both dispatch a probe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::MonitorError;
use crate::notify::{DowntimeEvent, NotificationPreferences, Notifier};
use crate::probe::{ProbeOutcome, Prober};
use crate::registry::Registry;
use crate::store::{CheckRecord, CheckStatus, Status, Target, TargetId};

/// What a completed check did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub target_id: TargetId,
    pub name: String,
    pub previous_status: Status,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_millis: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The probe ran and its result was applied.
    Completed(CheckReport),
    /// A check for this target was already in flight.
    Skipped,
    /// The target was deleted while its probe was running.
    Discarded,
    /// The check task itself died; the target was marked offline.
    Failed { error: String },
}

type InFlightSet = Arc<Mutex<HashSet<TargetId>>>;

/// Clears a target's in-flight marker when dropped.
struct InFlightGuard {
    set: InFlightSet,
    id: TargetId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[derive(Clone)]
pub struct CheckCoordinator {
    registry: Arc<Registry>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    preferences: Arc<dyn NotificationPreferences>,
    in_flight: InFlightSet,
}

impl CheckCoordinator {
    pub fn new(
        registry: Arc<Registry>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        preferences: Arc<dyn NotificationPreferences>,
    ) -> Self {
        Self {
            registry,
            prober,
            notifier,
            preferences,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Check one target.
    ///
    /// The check runs on its own task: if the caller stops waiting, the
    /// probe still resolves and the target never stays `Checking`.
    pub async fn request_check(&self, id: &TargetId) -> Result<CheckOutcome, MonitorError> {
        let (target, previous, guard) = match self.begin(id)? {
            Some(started) => started,
            None => {
                tracing::debug!(target_id = %id, "Check already in flight, skipping");
                return Ok(CheckOutcome::Skipped);
            }
        };

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_check(target, previous, guard).await });

        match handle.await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(target_id = %id, "Check task failed: {}", e);
                let error = "check task failed".to_string();
                self.registry.apply_check_result(
                    id,
                    CheckRecord::offline(Utc::now()),
                    Some(error.clone()),
                );
                Ok(CheckOutcome::Failed { error })
            }
        }
    }

    /// Whether a check for `id` is currently running.
    pub fn is_in_flight(&self, id: &TargetId) -> bool {
        self.lock_in_flight().contains(id)
    }

    /// Drop bookkeeping for a deleted target.
    pub fn forget(&self, id: &TargetId) {
        if self.lock_in_flight().remove(id) {
            tracing::debug!(target_id = %id, "Dropped in-flight marker for deleted target");
        }
    }

    /// Atomically move a target from Idle to InFlight. Returns `None` when it
    /// is already in flight.
    fn begin(&self, id: &TargetId) -> Result<Option<(Target, Status, InFlightGuard)>, MonitorError> {
        let mut in_flight = self.lock_in_flight();

        let target = self
            .registry
            .get(id)
            .ok_or_else(|| MonitorError::NotFound(id.clone()))?;

        if in_flight.contains(id) {
            return Ok(None);
        }

        let previous = self
            .registry
            .begin_check(id)
            .ok_or_else(|| MonitorError::NotFound(id.clone()))?;

        in_flight.insert(id.clone());

        let guard = InFlightGuard {
            set: self.in_flight.clone(),
            id: id.clone(),
        };
        Ok(Some((target, previous, guard)))
    }

    async fn run_check(self, target: Target, previous: Status, _guard: InFlightGuard) -> CheckOutcome {
        let prober = self.prober.clone();
        let url = target.url.clone();

        tracing::debug!(target_id = %target.id, url = %target.url, "Checking {}", target.name);

        // Probe on a separate task so a panicking prober resolves to offline.
        let outcome = match tokio::spawn(async move { prober.probe(&url).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(target_id = %target.id, "Probe task failed: {}", e);
                ProbeOutcome::offline("probe task failed")
            }
        };

        let checked_at = Utc::now();
        let record = CheckRecord {
            timestamp: checked_at,
            status: outcome.status,
            response_time_millis: outcome.response_time_millis,
        };

        let Some(updated) = self
            .registry
            .apply_check_result(&target.id, record, outcome.error.clone())
        else {
            tracing::info!(target_id = %target.id, "Target deleted during check, discarding result");
            return CheckOutcome::Discarded;
        };

        match &outcome.error {
            Some(error) => tracing::info!(
                target_id = %updated.id,
                "{}: {} -> {} ({})",
                updated.name,
                previous,
                outcome.status.as_str(),
                error
            ),
            None => tracing::info!(
                target_id = %updated.id,
                response_time_ms = outcome.response_time_millis,
                "{}: {} -> {}",
                updated.name,
                previous,
                outcome.status.as_str()
            ),
        }

        if previous == Status::Online && outcome.status == CheckStatus::Offline {
            self.emit_downtime(&updated, checked_at);
        }

        CheckOutcome::Completed(CheckReport {
            target_id: updated.id,
            name: updated.name,
            previous_status: previous,
            status: outcome.status,
            response_time_millis: outcome.response_time_millis,
            error: outcome.error,
            checked_at,
        })
    }

    /// Fire-and-forget downtime notification.
    fn emit_downtime(&self, target: &Target, timestamp: DateTime<Utc>) {
        if !self.preferences.is_enabled(&target.id) {
            tracing::debug!(target_id = %target.id, "Notifications disabled, not reporting downtime");
            return;
        }

        let event = DowntimeEvent {
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            url: target.url.clone(),
            timestamp,
        };
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            if let Err(e) = notifier.notify_downtime(&event).await {
                tracing::warn!(
                    target_id = %event.target_id,
                    "Failed to send downtime notification for {}: {}",
                    event.target_name,
                    e
                );
            }
        });
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<TargetId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
