//! Statistics derived from a target's check history.
//!
//! Everything here is computed from `history` alone. Only records in the
//! trailing 24 hour window count, and each record stands for one nominal
//! check interval when converting counts to hours.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::store::{CheckRecord, CheckStatus, Target};

/// Length of the window statistics are computed over.
pub const RECENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TargetStats {
    pub total_uptime_hours: f64,
    pub total_downtime_hours: f64,
    pub uptime_percentage: f64,
    pub average_response_time_millis: f64,
}

/// A target together with its derived statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    #[serde(flatten)]
    pub target: Target,
    pub stats: TargetStats,
}

impl TargetSummary {
    pub fn new(target: Target, now: DateTime<Utc>, check_interval: Duration) -> Self {
        let stats = compute_stats(&target.history, now, check_interval);
        Self { target, stats }
    }
}

/// Compute statistics over the records of `history` that fall within the
/// recent window ending at `now`.
pub fn compute_stats<'a, I>(history: I, now: DateTime<Utc>, check_interval: Duration) -> TargetStats
where
    I: IntoIterator<Item = &'a CheckRecord>,
{
    let cutoff = now - ChronoDuration::hours(RECENT_WINDOW_HOURS);

    let mut online = 0u64;
    let mut offline = 0u64;
    let mut response_sum = 0u64;
    let mut response_count = 0u64;

    for record in history.into_iter().filter(|r| r.timestamp >= cutoff) {
        match record.status {
            CheckStatus::Online => {
                online += 1;
                if let Some(ms) = record.response_time_millis {
                    response_sum += ms;
                    response_count += 1;
                }
            }
            CheckStatus::Offline => offline += 1,
        }
    }

    let total = online + offline;
    if total == 0 {
        return TargetStats::default();
    }

    let interval_hours = check_interval.as_secs_f64() / 3600.0;

    TargetStats {
        total_uptime_hours: online as f64 * interval_hours,
        total_downtime_hours: offline as f64 * interval_hours,
        uptime_percentage: online as f64 / total as f64 * 100.0,
        average_response_time_millis: if response_count > 0 {
            response_sum as f64 / response_count as f64
        } else {
            0.0
        },
    }
}
