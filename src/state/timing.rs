//! Answer-window arithmetic. Every deadline is an absolute epoch instant taken
//! from the shared document, so observers with independent clocks agree on
//! whether a window is over.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use crate::dao::models::EpochMillis;

/// Delay between the start write and the opening of the answer window.
pub const GRACE_PERIOD: Duration = Duration::from_millis(2_000);
/// Upper bound on the expiry polling interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Wall clock of the host process.
///
/// The epoch is sampled once; later readings advance with the tokio monotonic
/// clock, which keeps deadlines stable across wall-clock steps and lets tests
/// drive time with `tokio::time::pause`.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    wall_origin: EpochMillis,
    mono_origin: Instant,
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock {
    pub fn new() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as EpochMillis)
            .unwrap_or_default();
        Self::starting_at(wall)
    }

    /// Clock whose current reading is `epoch`.
    pub fn starting_at(epoch: EpochMillis) -> Self {
        Self {
            wall_origin: epoch,
            mono_origin: Instant::now(),
        }
    }

    pub fn now(&self) -> EpochMillis {
        self.wall_origin + self.mono_origin.elapsed().as_millis() as EpochMillis
    }

    /// Monotonic instant at which the clock will read `at` (clamped to the origin).
    pub fn instant_at(&self, at: EpochMillis) -> Instant {
        self.mono_origin + Duration::from_millis(at.saturating_sub(self.wall_origin))
    }
}

/// Whole seconds left before `end_time`, rounded up; zero once it has passed.
pub fn remaining_secs(end_time: EpochMillis, now: EpochMillis) -> u64 {
    end_time.saturating_sub(now).div_ceil(1_000)
}

/// `true` once `now` has reached `end_time`.
pub fn is_expired(end_time: EpochMillis, now: EpochMillis) -> bool {
    end_time <= now
}

/// Keep a configured poll interval within `(0, MAX_POLL_INTERVAL]`.
pub fn clamp_poll_interval(interval: Duration) -> Duration {
    interval.clamp(Duration::from_millis(1), MAX_POLL_INTERVAL)
}

/// Absolute bounds of one answer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerWindow {
    pub start_time: EpochMillis,
    pub end_time: EpochMillis,
}

impl AnswerWindow {
    /// Window opened by a start write issued at `now` for a question lasting
    /// `duration_secs`.
    pub fn open(now: EpochMillis, grace: Duration, duration_secs: u32) -> Self {
        let start_time = now + grace.as_millis() as EpochMillis;
        Self {
            start_time,
            end_time: start_time + u64::from(duration_secs) * 1_000,
        }
    }
}
