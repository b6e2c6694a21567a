//! Client-facing command and query surface.
//!
//! [`Monitor`] ties the registry, scheduler and notification preferences
//! together. The HTTP layer is a thin translation on top of it.

use chrono::Utc;
use std::sync::Arc;

use crate::coordinator::{CheckCoordinator, CheckOutcome};
use crate::error::MonitorError;
use crate::notify::PreferenceSet;
use crate::registry::{NewTarget, Registry};
use crate::scheduler::{CheckSummary, Scheduler};
use crate::stats::TargetSummary;
use crate::store::{Target, TargetId};

pub struct Monitor {
    registry: Arc<Registry>,
    coordinator: CheckCoordinator,
    scheduler: Scheduler,
    preferences: Arc<PreferenceSet>,
}

impl Monitor {
    /// `preferences` must be the same set the scheduler's coordinator
    /// consults when emitting downtime events.
    pub fn new(scheduler: Scheduler, preferences: Arc<PreferenceSet>) -> Self {
        let coordinator = scheduler.coordinator().clone();
        Self {
            registry: coordinator.registry().clone(),
            coordinator,
            scheduler,
            preferences,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Add a target and schedule its first check.
    pub fn add_target(&self, name: &str, url: &str) -> Result<Target, MonitorError> {
        let target = self.registry.create(name, url)?;
        self.scheduler.schedule_initial_checks(vec![target.id.clone()]);
        Ok(target)
    }

    /// Add several targets at once. Their first checks are staggered.
    pub fn add_targets(&self, entries: &[NewTarget]) -> Result<Vec<Target>, MonitorError> {
        let targets = self.registry.create_many(entries)?;
        self.scheduler
            .schedule_initial_checks(targets.iter().map(|t| t.id.clone()).collect());
        Ok(targets)
    }

    pub fn remove_target(&self, id: &TargetId) -> Result<Target, MonitorError> {
        let removed = self.registry.remove(id)?;
        self.coordinator.forget(id);
        self.preferences.clear(id);
        Ok(removed)
    }

    /// All targets with their statistics, oldest first.
    pub fn list_targets(&self) -> Vec<TargetSummary> {
        let now = Utc::now();
        let interval = self.scheduler.config().check_interval;

        self.registry
            .list()
            .into_iter()
            .map(|target| TargetSummary::new(target, now, interval))
            .collect()
    }

    pub async fn check_target(&self, id: &TargetId) -> Result<CheckOutcome, MonitorError> {
        self.scheduler.check_one(id).await
    }

    pub async fn check_all_targets(&self) -> CheckSummary {
        self.scheduler.check_all().await
    }

    pub fn set_notification_preference(&self, id: &TargetId, enabled: bool) -> Result<(), MonitorError> {
        if !self.registry.contains(id) {
            return Err(MonitorError::NotFound(id.clone()));
        }
        self.preferences.set(id.clone(), enabled);
        tracing::info!(target_id = %id, "Notifications {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Ids of existing targets with notifications enabled, oldest first.
    pub fn notification_preferences(&self) -> Vec<TargetId> {
        self.preferences.enabled_among(&self.registry.ids())
    }
}
