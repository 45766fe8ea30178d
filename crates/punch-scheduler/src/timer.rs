use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, TimeZone, Utc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::clock::Clock;

/// With no slot to aim at the alarm still has to resolve eventually; an
/// idle tick an hour out just re-runs a harmless check.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// A source of scheduler ticks. The engine treats every source alike —
/// the per-day dedup key makes overlapping sources safe.
#[async_trait]
pub trait TimerSource: Send {
    /// Completes when the next check should run.
    async fn tick(&mut self);
}

/// Fixed-cadence fallback ticker.
pub struct IntervalTimer {
    inner: Interval,
}

impl IntervalTimer {
    pub fn new(period: Duration) -> Self {
        // First tick one full period out; the engine runs its own
        // immediate check on start.
        let mut inner = interval_at(Instant::now() + period, period);
        inner.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { inner }
    }
}

#[async_trait]
impl TimerSource for IntervalTimer {
    async fn tick(&mut self) {
        self.inner.tick().await;
    }
}

/// Disabled source — never ticks. Stands in for the slot alarm when the
/// wake-aware path is turned off, keeping the engine loop source-agnostic.
pub struct IdleTimer;

#[async_trait]
impl TimerSource for IdleTimer {
    async fn tick(&mut self) {
        std::future::pending::<()>().await;
    }
}

/// Wall-clock alarm that wakes at the next configured slot time.
///
/// Registered as the primary driver when enabled: after a host suspend the
/// sleep expires on resume, so the check runs without waiting out the
/// interval cadence.
pub struct SlotAlarm<C: Clock> {
    times: Vec<(u32, u32)>,
    offset: FixedOffset,
    clock: C,
}

impl<C: Clock> SlotAlarm<C> {
    pub fn new(times: Vec<(u32, u32)>, offset: FixedOffset, clock: C) -> Self {
        Self {
            times,
            offset,
            clock,
        }
    }
}

#[async_trait]
impl<C: Clock> TimerSource for SlotAlarm<C> {
    async fn tick(&mut self) {
        let now = self.clock.now_utc();
        let wait = next_slot_instant(&self.times, self.offset, now)
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or(IDLE_WAIT);
        tokio::time::sleep(wait).await;
    }
}

/// The next instant, strictly after `now`, at which any of the given
/// `(hour, minute)` slot times occurs in the fixed local offset.
pub fn next_slot_instant(
    times: &[(u32, u32)],
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let local_now = now.with_timezone(&offset);
    let today = local_now.date_naive();
    let mut best: Option<DateTime<FixedOffset>> = None;

    for &(hour, minute) in times {
        // Today's occurrence, or tomorrow's when it already passed.
        for days_ahead in 0..2u64 {
            let Some(date) = today.checked_add_days(Days::new(days_ahead)) else {
                continue;
            };
            let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                continue;
            };
            let Some(candidate) = offset.from_local_datetime(&naive).single() else {
                continue;
            };
            if candidate > local_now {
                if best.map_or(true, |b| candidate < b) {
                    best = Some(candidate);
                }
                break;
            }
        }
    }

    best.map(|b| b.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, h, m, 0).unwrap()
    }

    #[test]
    fn picks_the_nearest_future_slot() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let times = [(9, 0), (19, 30)];
        let next = next_slot_instant(&times, offset, utc(8, 30)).unwrap();
        assert_eq!(next, utc(9, 0));
        let next = next_slot_instant(&times, offset, utc(12, 0)).unwrap();
        assert_eq!(next, utc(19, 30));
    }

    #[test]
    fn rolls_over_to_tomorrow_after_the_last_slot() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let next = next_slot_instant(&[(9, 0)], offset, utc(20, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn exact_slot_time_targets_the_next_occurrence() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let next = next_slot_instant(&[(9, 0)], offset, utc(9, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn respects_the_local_offset() {
        // 00:30 UTC is 08:30 at UTC+8, so the 09:00 local slot is 01:00 UTC.
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let next = next_slot_instant(&[(9, 0)], offset, utc(0, 30)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 10, 1, 0, 0).unwrap());
    }

    #[test]
    fn empty_slot_list_has_no_instant() {
        let offset = FixedOffset::east_opt(0).unwrap();
        assert!(next_slot_instant(&[], offset, utc(8, 0)).is_none());
    }
}
