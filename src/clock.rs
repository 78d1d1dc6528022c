//! Time sources for the scheduler.
//!
//! Every sleep and every wall-clock read in the executor and the status prober
//! goes through a [`Clock`], so a run can be driven in deterministic test time
//! with [`ManualClock`].

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, SubsecRound, TimeDelta};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Injectable source of wall-clock time and sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current civil time, timezone-naive, truncated to whole seconds.
    fn now_wall(&self) -> NaiveDateTime;

    /// Time elapsed since the clock was created. Never goes backwards.
    fn monotonic(&self) -> Duration;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Suspend until the wall clock reaches `deadline`.
    ///
    /// Returns immediately when `deadline` is not in the future.
    async fn sleep_until(&self, deadline: NaiveDateTime) {
        loop {
            let remaining = deadline - self.now_wall();
            match remaining.to_std() {
                Ok(d) if !d.is_zero() => self.sleep(d).await,
                _ => return,
            }
        }
    }
}

/// The real clock: local civil time and tokio timers.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Clock whose monotonic origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_wall(&self) -> NaiveDateTime {
        Local::now().naive_local().trunc_subsecs(0)
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn sleep_until(&self, deadline: NaiveDateTime) {
        // now_wall is truncated, so compare against the untruncated time to
        // avoid waking up to a second early.
        let remaining = deadline - Local::now().naive_local();
        if let Ok(d) = remaining.to_std() {
            tokio::time::sleep(d).await;
        }
    }
}

#[derive(Debug)]
struct ManualState {
    wall: NaiveDateTime,
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Test clock whose sleeps complete instantly by advancing virtual time.
///
/// Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Start the virtual timeline at `start` (sub-second part dropped).
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                wall: start.trunc_subsecs(0),
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.wall += TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A poisoned lock only means a test panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_wall(&self) -> NaiveDateTime {
        self.lock().wall.trunc_subsecs(0)
    }

    fn monotonic(&self) -> Duration {
        self.lock().elapsed
    }

    async fn sleep(&self, duration: Duration) {
        self.lock().sleeps.push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_manual_sleep_until_future() {
        let clock = ManualClock::new(t0());
        clock.sleep_until(t0() + TimeDelta::seconds(90)).await;
        assert_eq!(clock.now_wall(), t0() + TimeDelta::seconds(90));
        assert_eq!(clock.monotonic(), Duration::from_secs(90));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(90)]);
    }

    #[tokio::test]
    async fn test_manual_sleep_until_past_is_noop() {
        let clock = ManualClock::new(t0());
        clock.sleep_until(t0() - TimeDelta::minutes(5)).await;
        clock.sleep_until(t0()).await;
        assert_eq!(clock.now_wall(), t0());
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_manual_wall_has_second_precision() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now_wall(), t0() + TimeDelta::seconds(1));
        assert_eq!(clock.monotonic(), Duration::from_millis(1500));
    }

    #[test]
    fn test_system_clock_truncates_subseconds() {
        let clock = SystemClock::new();
        assert_eq!(clock.now_wall().and_utc().timestamp_subsec_nanos(), 0);
    }
}
