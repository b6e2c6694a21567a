//! Fakes shared by the coordinator, scheduler and monitor tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

use crate::notify::{DowntimeEvent, Notifier, NotifyError};
use crate::probe::{ProbeOutcome, Prober};

/// Prober that replays scripted outcomes (online by default) and can be held
/// open until the test releases it.
#[derive(Default)]
pub struct ScriptedProber {
    outcomes: Mutex<VecDeque<ProbeOutcome>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    started: Mutex<Vec<Instant>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: impl IntoIterator<Item = ProbeOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every probe waits for one permit on the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let prober = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (prober, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn start_times(&self) -> Vec<Instant> {
        self.started.lock().unwrap().clone()
    }

    /// Wait until at least `n` probes have started.
    pub async fn wait_for_calls(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.calls() < n {
            assert!(Instant::now() < deadline, "timed out waiting for {} probes", n);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(Instant::now());

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        if url.contains("panic.example") {
            panic!("prober blew up");
        }

        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ProbeOutcome::online(25))
    }
}

/// Notifier that forwards every event to a channel.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<DowntimeEvent>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DowntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail: false }, rx)
    }

    pub fn failing() -> (Self, mpsc::UnboundedReceiver<DowntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail: true }, rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_downtime(&self, event: &DowntimeEvent) -> Result<(), NotifyError> {
        let _ = self.tx.send(event.clone());
        if self.fail {
            return Err(NotifyError::Rejected(500));
        }
        Ok(())
    }
}
