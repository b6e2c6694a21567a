//! Scheduler module for periodic and on-demand checks.
//!
//! Batches are staggered: the n-th target of a batch is dispatched `n` steps
//! after the first so a cycle never hits the network all at once.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{CheckCoordinator, CheckOutcome, CheckReport};
use crate::error::MonitorError;
use crate::store::TargetId;

/// Default time between periodic check cycles.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default spacing between dispatches within a batch.
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(300);
/// Default delay before a new target's first check.
pub const DEFAULT_INITIAL_CHECK_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub check_interval: Duration,
    pub stagger: Duration,
    pub initial_check_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            stagger: DEFAULT_STAGGER,
            initial_check_delay: DEFAULT_INITIAL_CHECK_DELAY,
        }
    }
}

/// Counts and per-target reports from a "check all" run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckSummary {
    /// Checks that ran to completion, online or offline.
    pub checked: usize,
    /// Targets that disappeared before or during their check, or whose
    /// check task died.
    pub failed: usize,
    /// Targets that already had a check in flight.
    pub skipped: usize,
    /// One report per completed check, in completion order.
    pub results: Vec<CheckReport>,
}

impl CheckSummary {
    fn record(&mut self, result: Result<CheckOutcome, MonitorError>) {
        match result {
            Ok(CheckOutcome::Completed(report)) => {
                self.checked += 1;
                self.results.push(report);
            }
            Ok(CheckOutcome::Skipped) => self.skipped += 1,
            Ok(CheckOutcome::Discarded) | Ok(CheckOutcome::Failed { .. }) | Err(_) => {
                self.failed += 1
            }
        }
    }
}

/// Result of one staggered dispatch slot.
enum Dispatch {
    Ran(Result<CheckOutcome, MonitorError>),
    Cancelled,
}

/// Drives the check coordinator on a timer and on demand.
#[derive(Clone)]
pub struct Scheduler {
    coordinator: CheckCoordinator,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    periodic: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(coordinator: CheckCoordinator, config: SchedulerConfig) -> Self {
        Self {
            coordinator,
            config,
            shutdown: CancellationToken::new(),
            periodic: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &CheckCoordinator {
        &self.coordinator
    }

    /// Start the periodic cycle. The first cycle runs immediately.
    pub fn start(&self) {
        let mut periodic = self.periodic.lock().unwrap_or_else(PoisonError::into_inner);
        if periodic.is_some() {
            return; // Already running
        }

        tracing::info!(
            "Starting scheduler: interval {:?}, stagger {:?}",
            self.config.check_interval,
            self.config.stagger
        );

        let this = self.clone();
        *periodic = Some(tokio::spawn(async move { this.run_periodic().await }));
    }

    /// Stop dispatching. Checks already in flight run to completion.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handle = self
            .periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler loop ended abnormally: {}", e);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Check every target, staggered, and wait for all of them.
    pub async fn check_all(&self) -> CheckSummary {
        let ids = self.coordinator.registry().ids();
        tracing::info!("Checking all {} targets", ids.len());

        let mut summary = CheckSummary::default();
        let mut dispatches = self.fan_out(ids, self.config.stagger, 0);

        while let Some(joined) = dispatches.join_next().await {
            match joined {
                Ok(Dispatch::Ran(result)) => summary.record(result),
                Ok(Dispatch::Cancelled) => {}
                Err(e) => {
                    tracing::error!("Check task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Check all finished: {} checked, {} failed, {} skipped",
            summary.checked,
            summary.failed,
            summary.skipped
        );
        summary
    }

    /// Check one target right away.
    pub async fn check_one(&self, id: &TargetId) -> Result<CheckOutcome, MonitorError> {
        if self.is_shut_down() {
            return Ok(CheckOutcome::Skipped);
        }
        self.coordinator.request_check(id).await
    }

    /// Dispatch the first check of newly created targets. The i-th target
    /// goes out after `(i + 1) * initial_check_delay`.
    pub fn schedule_initial_checks(&self, ids: Vec<TargetId>) {
        if ids.is_empty() {
            return;
        }
        self.fan_out(ids, self.config.initial_check_delay, 1).detach_all();
    }

    async fn run_periodic(&self) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let ids = self.coordinator.registry().ids();
                    if ids.is_empty() {
                        tracing::debug!("No targets to check");
                        continue;
                    }

                    tracing::info!("Periodic check of {} targets", ids.len());
                    self.fan_out(ids, self.config.stagger, 0).detach_all();
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Spawn one task per id. Task `i` waits `(first_slot + i) * step`, then
    /// requests a check unless shutdown has begun.
    fn fan_out(&self, ids: Vec<TargetId>, step: Duration, first_slot: u32) -> JoinSet<Dispatch> {
        let mut set = JoinSet::new();

        for (i, id) in ids.into_iter().enumerate() {
            let delay = step * (first_slot + i as u32);
            let coordinator = self.coordinator.clone();
            let shutdown = self.shutdown.clone();

            set.spawn(async move {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Dispatch::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }

                tracing::debug!(target_id = %id, "Dispatching check after {:?}", delay);
                Dispatch::Ran(coordinator.request_check(&id).await)
            });
        }

        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{LogNotifier, PreferenceSet};
    use crate::registry::Registry;
    use crate::store::{CheckStatus, SqliteStore, Status};
    use crate::test_support::ScriptedProber;
    use std::time::Instant;

    fn scheduler(prober: Arc<ScriptedProber>, config: SchedulerConfig) -> (Scheduler, Arc<Registry>) {
        let registry = Arc::new(Registry::load(Arc::new(SqliteStore::in_memory().unwrap())));
        let coordinator = CheckCoordinator::new(
            registry.clone(),
            prober,
            Arc::new(LogNotifier),
            Arc::new(PreferenceSet::new(false)),
        );
        (Scheduler::new(coordinator, config), registry)
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            check_interval: Duration::from_millis(200),
            stagger: Duration::from_millis(50),
            initial_check_delay: Duration::from_millis(50),
        }
    }

    fn add_targets(registry: &Registry, n: usize) -> Vec<TargetId> {
        (0..n)
            .map(|i| {
                registry
                    .create(&format!("Site {}", i), &format!("site{}.example.com", i))
                    .unwrap()
                    .id
            })
            .collect()
    }

    fn counts(summary: &CheckSummary) -> (usize, usize, usize) {
        (summary.checked, summary.failed, summary.skipped)
    }

    fn assert_spaced(starts: &[Instant], min_gap: Duration) {
        let mut starts = starts.to_vec();
        starts.sort();
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= min_gap, "dispatches only {:?} apart", gap);
        }
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(300));
        assert_eq!(config.stagger, Duration::from_millis(300));
        assert_eq!(config.initial_check_delay, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_check_all_is_staggered() {
        let prober = Arc::new(ScriptedProber::new());
        let (scheduler, registry) = scheduler(prober.clone(), fast_config());
        add_targets(&registry, 5);

        let summary = scheduler.check_all().await;
        assert_eq!(counts(&summary), (5, 0, 0));

        assert_eq!(summary.results.len(), 5);
        let mut reported: Vec<TargetId> = summary.results.iter().map(|r| r.target_id.clone()).collect();
        reported.sort();
        let mut expected = registry.ids();
        expected.sort();
        assert_eq!(reported, expected);
        for report in &summary.results {
            assert_eq!(report.previous_status, Status::Checking);
            assert_eq!(report.status, CheckStatus::Online);
            assert_eq!(report.response_time_millis, Some(25));
        }

        // A second pass reports the transition from the first.
        let summary = scheduler.check_all().await;
        assert!(summary
            .results
            .iter()
            .all(|r| r.previous_status == Status::Online));

        assert_eq!(prober.calls(), 10);
        assert_spaced(&prober.start_times(), Duration::from_millis(40));
        for target in registry.list() {
            assert_eq!(target.status, Status::Online);
        }
    }

    #[tokio::test]
    async fn test_check_all_counts_offline_as_checked() {
        let prober = Arc::new(ScriptedProber::with_outcomes([
            crate::probe::ProbeOutcome::offline("HTTP 500"),
        ]));
        let (scheduler, registry) = scheduler(prober, fast_config());
        add_targets(&registry, 2);

        let summary = scheduler.check_all().await;
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.failed, 0);
        let offline = summary
            .results
            .iter()
            .filter(|r| r.status == CheckStatus::Offline)
            .count();
        assert_eq!(offline, 1);
    }

    #[tokio::test]
    async fn test_check_all_skips_in_flight() {
        let (prober, gate) = ScriptedProber::gated();
        let prober = Arc::new(prober);
        let (scheduler, registry) = scheduler(prober.clone(), fast_config());
        let ids = add_targets(&registry, 2);

        let manual = {
            let scheduler = scheduler.clone();
            let id = ids[0].clone();
            tokio::spawn(async move { scheduler.check_one(&id).await })
        };
        prober.wait_for_calls(1).await;

        let all = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.check_all().await })
        };
        prober.wait_for_calls(2).await;
        gate.add_permits(2);

        let summary = all.await.unwrap();
        assert_eq!(counts(&summary), (1, 0, 1));
        assert_eq!(summary.results.len(), 1);
        assert_eq!(summary.results[0].target_id, ids[1]);
        assert!(matches!(manual.await.unwrap().unwrap(), CheckOutcome::Completed(_)));
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test]
    async fn test_check_all_counts_deleted_as_failed() {
        let prober = Arc::new(ScriptedProber::new());
        let config = SchedulerConfig {
            stagger: Duration::from_millis(200),
            ..fast_config()
        };
        let (scheduler, registry) = scheduler(prober.clone(), config);
        let ids = add_targets(&registry, 2);

        let all = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.check_all().await })
        };
        prober.wait_for_calls(1).await;
        registry.remove(&ids[1]).unwrap();

        let summary = all.await.unwrap();
        assert_eq!(counts(&summary), (1, 1, 0));
        assert_eq!(summary.results.len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_cycles_and_shutdown() {
        let prober = Arc::new(ScriptedProber::new());
        let (scheduler, registry) = scheduler(prober.clone(), fast_config());
        add_targets(&registry, 2);

        scheduler.start();
        // First cycle fires immediately, the second one interval later.
        prober.wait_for_calls(4).await;

        scheduler.shutdown().await;
        assert!(scheduler.is_shut_down());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = prober.calls();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(prober.calls(), calls, "check dispatched after shutdown");
    }

    #[tokio::test]
    async fn test_initial_checks_are_delayed_and_staggered() {
        let prober = Arc::new(ScriptedProber::new());
        let (scheduler, registry) = scheduler(prober.clone(), fast_config());
        let ids = add_targets(&registry, 2);

        let start = Instant::now();
        scheduler.schedule_initial_checks(ids.clone());
        assert_eq!(prober.calls(), 0);

        prober.wait_for_calls(2).await;
        let starts = prober.start_times();
        assert!(starts[0] - start >= Duration::from_millis(40));
        assert_spaced(&starts, Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_dispatches() {
        let prober = Arc::new(ScriptedProber::new());
        let config = SchedulerConfig {
            initial_check_delay: Duration::from_millis(200),
            ..fast_config()
        };
        let (scheduler, registry) = scheduler(prober.clone(), config);
        let ids = add_targets(&registry, 2);

        scheduler.schedule_initial_checks(ids.clone());
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(prober.calls(), 0);

        assert_eq!(scheduler.check_all().await, CheckSummary::default());
        assert_eq!(scheduler.check_one(&ids[0]).await.unwrap(), CheckOutcome::Skipped);
        assert_eq!(prober.calls(), 0);
    }
}
