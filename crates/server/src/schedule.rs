//! Host timer configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// The host's independent periodic jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Recompute player interest and tile residency.
    Lifecycle,
    /// Write dirty tiles and the eviction outbox.
    DirtyFlush,
    /// Write every resident tile under a new world version.
    Snapshot,
    /// Bounding-box diagnostics.
    BoundsCheck,
}

impl TimerKind {
    /// Every timer, in the order the host arms them.
    pub const ALL: [TimerKind; 4] = [
        TimerKind::Lifecycle,
        TimerKind::DirtyFlush,
        TimerKind::Snapshot,
        TimerKind::BoundsCheck,
    ];
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::Lifecycle => "lifecycle",
            TimerKind::DirtyFlush => "dirty_flush",
            TimerKind::Snapshot => "snapshot",
            TimerKind::BoundsCheck => "bounds_check",
        };
        f.write_str(name)
    }
}

/// Period of each timer in seconds. A missing or non-positive period disables
/// that timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Lifecycle pass period.
    pub lifecycle_secs: Option<f64>,
    /// Dirty flush period.
    pub dirty_flush_secs: Option<f64>,
    /// Full snapshot period.
    pub snapshot_secs: Option<f64>,
    /// Bounds check period.
    pub bounds_check_secs: Option<f64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lifecycle_secs: Some(1.0),
            dirty_flush_secs: Some(30.0),
            snapshot_secs: Some(15.0 * 60.0),
            bounds_check_secs: Some(30.0),
        }
    }
}

impl ScheduleConfig {
    /// Schedule with every timer disabled.
    pub fn disabled() -> Self {
        Self {
            lifecycle_secs: None,
            dirty_flush_secs: None,
            snapshot_secs: None,
            bounds_check_secs: None,
        }
    }

    /// Same schedule with `kind` set to `period`.
    pub fn with(mut self, kind: TimerKind, period: Option<Duration>) -> Self {
        let secs = period.map(|p| p.as_secs_f64());
        match kind {
            TimerKind::Lifecycle => self.lifecycle_secs = secs,
            TimerKind::DirtyFlush => self.dirty_flush_secs = secs,
            TimerKind::Snapshot => self.snapshot_secs = secs,
            TimerKind::BoundsCheck => self.bounds_check_secs = secs,
        }
        self
    }

    /// Configured period of `kind`, if enabled.
    pub fn period(&self, kind: TimerKind) -> Option<Duration> {
        let secs = match kind {
            TimerKind::Lifecycle => self.lifecycle_secs,
            TimerKind::DirtyFlush => self.dirty_flush_secs,
            TimerKind::Snapshot => self.snapshot_secs,
            TimerKind::BoundsCheck => self.bounds_check_secs,
        }?;
        (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
    }

    /// Build the interval for `kind`.
    ///
    /// The lifecycle timer fires immediately so players get terrain on start;
    /// the others first fire one period after `start`. Late ticks are skipped
    /// rather than bunched.
    pub fn interval(&self, kind: TimerKind, start: Instant) -> Option<Interval> {
        let period = self.period(kind)?;
        let first = match kind {
            TimerKind::Lifecycle => start,
            _ => start + period,
        };
        let mut interval = time::interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Some(interval)
    }
}
