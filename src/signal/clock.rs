//! Phase clock.
//!
//! [`tick`] advances one record by one second. [`PhaseClock`] is the owned
//! scheduler that calls a tick callback on a fixed period until it is
//! stopped.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::intersection::IntersectionRecord;
use super::phase::{next_phase, phase_duration};

/// Default clock period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What a single tick did to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not active; nothing changed.
    Skipped,
    /// Countdown decremented, phase unchanged.
    Counted,
    /// Countdown expired and the phase advanced.
    Advanced {
        /// Phase before the tick.
        from: String,
        /// Phase after the tick.
        to: String,
    },
}

impl TickOutcome {
    /// Returns `true` unless the record was skipped.
    #[must_use]
    pub const fn touched(&self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// Advances one record by one second.
///
/// Inactive records are skipped. The countdown saturates at zero; on
/// reaching zero the next phase of the cycle is entered and the countdown
/// reset to that phase's duration in the same call.
pub fn tick(record: &mut IntersectionRecord) -> TickOutcome {
    if !record.is_active() {
        return TickOutcome::Skipped;
    }

    record.time_remaining = record.time_remaining.saturating_sub(1);
    if record.time_remaining > 0 {
        return TickOutcome::Counted;
    }

    let Some(next) = next_phase(&record.phases, &record.current_phase) else {
        // Unreachable for validated records; leave the phase alone.
        return TickOutcome::Counted;
    };
    let next = next.to_string();
    record.time_remaining = phase_duration(&next);
    let from = std::mem::replace(&mut record.current_phase, next.clone());
    TickOutcome::Advanced { from, to: next }
}

/// Owned periodic scheduler with an explicit start/stop lifecycle.
///
/// The first tick fires one full period after [`start`](Self::start).
/// Ticks that fall behind are delayed, never fired in a burst.
#[derive(Debug)]
pub struct PhaseClock {
    period: Duration,
    cancel: CancellationToken,
}

impl PhaseClock {
    /// Creates a clock whose lifetime is bound to `cancel`.
    ///
    /// Cancelling the parent token stops the clock as well.
    #[must_use]
    pub fn new(period: Duration, cancel: &CancellationToken) -> Self {
        Self {
            period,
            cancel: cancel.child_token(),
        }
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Spawns the clock task. `on_tick` receives the 1-based tick number.
    pub fn start<F>(&self, mut on_tick: F) -> JoinHandle<()>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let period = self.period;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut count: u64 = 0;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(ticks = count, "phase clock stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        count += 1;
                        trace!(tick = count, "phase clock tick");
                        on_tick(count);
                    }
                }
            }
        })
    }

    /// Stops the clock task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::intersection::{Status, seed_intersections};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn record(status: Status, phase: &str, remaining: u32) -> IntersectionRecord {
        let mut rec = seed_intersections().remove(0).record;
        rec.status = status;
        rec.current_phase = phase.to_string();
        rec.time_remaining = remaining;
        rec
    }

    #[test]
    fn countdown_decrements() {
        let mut rec = record(Status::Active, "green-ns", 45);
        assert_eq!(tick(&mut rec), TickOutcome::Counted);
        assert_eq!(rec.time_remaining, 44);
        assert_eq!(rec.current_phase, "green-ns");
    }

    #[test]
    fn yellow_ns_expires_into_red_ns() {
        let mut rec = record(Status::Active, "yellow-ns", 1);
        let outcome = tick(&mut rec);
        assert_eq!(
            outcome,
            TickOutcome::Advanced {
                from: "yellow-ns".into(),
                to: "red-ns".into()
            }
        );
        assert_eq!(rec.current_phase, "red-ns");
        assert_eq!(rec.time_remaining, 30);
    }

    #[test]
    fn last_phase_wraps_to_first() {
        let mut rec = record(Status::Active, "red-ew", 1);
        tick(&mut rec);
        assert_eq!(rec.current_phase, "green-ns");
        assert_eq!(rec.time_remaining, 45);
    }

    #[test]
    fn zero_countdown_advances_without_underflow() {
        let mut rec = record(Status::Active, "green-ew", 0);
        tick(&mut rec);
        assert_eq!(rec.current_phase, "yellow-ew");
        assert_eq!(rec.time_remaining, 8);
    }

    #[test]
    fn paused_and_maintenance_are_frozen() {
        for status in [Status::Paused, Status::Maintenance] {
            let mut rec = record(status, "yellow-ns", 1);
            let before = rec.clone();
            assert_eq!(tick(&mut rec), TickOutcome::Skipped);
            assert_eq!(rec, before);
        }
    }

    #[test]
    fn full_cycle_duration() {
        let mut rec = record(Status::Active, "green-ns", 45);
        let cycle = 45 + 8 + 30 + 45 + 8 + 30;
        for _ in 0..cycle {
            tick(&mut rec);
        }
        assert_eq!(rec.current_phase, "green-ns");
        assert_eq!(rec.time_remaining, 45);
    }

    proptest! {
        #[test]
        fn one_second_tick_enters_next_phase(idx in 0usize..6) {
            let phases = crate::signal::phase::default_phases();
            let mut rec = record(Status::Active, &phases[idx], 1);
            tick(&mut rec);
            let next = &phases[(idx + 1) % 6];
            prop_assert_eq!(&rec.current_phase, next);
            prop_assert_eq!(rec.time_remaining, phase_duration(next));
        }

        #[test]
        fn countdown_never_zero_after_tick(idx in 0usize..6, remaining in 0u32..60) {
            let phases = crate::signal::phase::default_phases();
            let mut rec = record(Status::Active, &phases[idx], remaining);
            tick(&mut rec);
            prop_assert!(rec.time_remaining > 0);
            prop_assert!(rec.phases.contains(&rec.current_phase));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clock_fires_once_per_period() {
        let cancel = CancellationToken::new();
        let clock = PhaseClock::new(Duration::from_secs(1), &cancel);
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ticks);
        let handle = clock.start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        clock.stop();
        handle.await.unwrap();
        assert!(clock.is_stopped());
    }

    #[tokio::test]
    async fn parent_cancel_stops_clock() {
        let cancel = CancellationToken::new();
        let clock = PhaseClock::new(Duration::from_secs(3600), &cancel);
        let handle = clock.start(|_| {});
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("clock task should stop after cancel")
            .unwrap();
    }
}
