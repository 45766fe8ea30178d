use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use punch_core::config::{ScheduleConfig, DEFAULT_CHECK_INTERVAL_SECS};
use punch_core::types::PunchTimeSpec;

use crate::clock::Clock;
use crate::timer::{IdleTimer, IntervalTimer, SlotAlarm, TimerSource};

/// Event emitted when a slot fires. Delivered over the engine's mpsc
/// channel; the receiver runs the actual punch attempt.
#[derive(Debug, Clone)]
pub struct SlotFire {
    pub spec: PunchTimeSpec,
    pub fired_at: DateTime<Utc>,
    /// True when the slot was recovered by a compensation pass rather
    /// than hit inside its live window.
    pub compensated: bool,
}

/// Mutable scheduler state. One instance, owned by the engine task,
/// mutated only by its own check cycle.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Dedup key of the most recent fire: `<date>-<hour>:<minute>`.
    pub last_fired_slot_key: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub running: bool,
    pub using_alarm_timer: bool,
}

/// Snapshot published on the status watch channel after every check.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub running: bool,
    pub using_alarm_timer: bool,
    pub last_fired_slot_key: Option<String>,
}

/// Core scheduler: scans slot windows and dispatches at most one fire per
/// slot per local calendar day.
pub struct SchedulerEngine<C: Clock + Clone> {
    config: ScheduleConfig,
    clock: C,
    state: SchedulerState,
    fired_tx: mpsc::Sender<SlotFire>,
    status_tx: watch::Sender<SchedulerStatus>,
}

impl<C: Clock + Clone> SchedulerEngine<C> {
    pub fn new(config: ScheduleConfig, clock: C, fired_tx: mpsc::Sender<SlotFire>) -> Self {
        let (status_tx, _) = watch::channel(SchedulerStatus::default());
        Self {
            config,
            clock,
            state: SchedulerState::default(),
            fired_tx,
            status_tx,
        }
    }

    /// Subscribe to status snapshots; call before spawning `run`.
    pub fn subscribe_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// The core tick.
    ///
    /// A gap of more than twice the check cadence since the previous tick
    /// means the host slept through ticks; any window that closed while
    /// suspended is recovered first. Then the regular scan fires the first
    /// configured slot whose tolerance window contains the current local
    /// time and whose dedup key has not been recorded — at most one slot
    /// per tick, in configuration order.
    pub fn check_once(&mut self) {
        let now = self.clock.now_utc();

        if let Some(last) = self.state.last_check {
            let threshold = chrono::Duration::from_std(self.config.check_interval())
                .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_CHECK_INTERVAL_SECS as i64))
                * 2;
            let gap = now - last;
            if gap > threshold {
                warn!(
                    gap_secs = gap.num_seconds(),
                    "wake gap detected — running compensation check"
                );
                self.recover_missed(now);
            }
        }
        self.state.last_check = Some(now);

        let local = now.with_timezone(&self.config.utc_offset());
        let current = i64::from(local.hour()) * 60 + i64::from(local.minute());
        let today = local.date_naive();
        let tolerance = i64::from(self.config.tolerance_minutes);

        let due = self
            .config
            .punch_times
            .iter()
            .find(|spec| {
                let slot = spec.minute_of_day();
                current >= slot - tolerance
                    && current <= slot + tolerance
                    && self.state.last_fired_slot_key.as_deref()
                        != Some(spec.slot_key(today).as_str())
            })
            .cloned();

        if let Some(spec) = due {
            // Record the key before dispatching so an overlapping tick
            // source cannot decide the same slot is due.
            self.state.last_fired_slot_key = Some(spec.slot_key(today));
            self.fire(spec, now, false);
        }

        self.publish_status();
    }

    /// Fire configured slots whose time already passed today without a
    /// recorded fire — the recovery path for windows skipped entirely
    /// while the host process was suspended.
    pub fn compensation_check(&mut self) {
        let now = self.clock.now_utc();
        self.recover_missed(now);
        self.publish_status();
    }

    fn recover_missed(&mut self, now: DateTime<Utc>) {
        let local = now.with_timezone(&self.config.utc_offset());
        let current = i64::from(local.hour()) * 60 + i64::from(local.minute());
        let today = local.date_naive();
        let high_water = self.fired_high_water(today);

        let mut missed: Vec<PunchTimeSpec> = self
            .config
            .punch_times
            .iter()
            .filter(|spec| {
                let slot = spec.minute_of_day();
                current > slot && high_water.map_or(true, |fired| slot > fired)
            })
            .cloned()
            .collect();
        // Recover in time order so the key ends up at the day's latest
        // fired slot.
        missed.sort_by_key(PunchTimeSpec::minute_of_day);

        for spec in missed {
            info!(slot = %spec.name, "recovering missed slot");
            self.state.last_fired_slot_key = Some(spec.slot_key(today));
            self.fire(spec, now, true);
        }
    }

    /// Minute-of-day of the last fire if it happened today. The recovery
    /// scan never reaches behind this high-water mark, so slots already
    /// handled earlier in the day cannot fire a second time.
    fn fired_high_water(&self, today: NaiveDate) -> Option<i64> {
        let key = self.state.last_fired_slot_key.as_deref()?;
        let time = key.strip_prefix(&format!("{today}-"))?;
        let (hour, minute) = time.split_once(':')?;
        Some(hour.parse::<i64>().ok()? * 60 + minute.parse::<i64>().ok()?)
    }

    fn fire(&mut self, spec: PunchTimeSpec, fired_at: DateTime<Utc>, compensated: bool) {
        info!(slot = %spec.name, kind = %spec.kind, compensated, "slot due — dispatching punch");
        let event = SlotFire {
            spec,
            fired_at,
            compensated,
        };
        // try_send keeps the tick path non-blocking; a full channel means
        // the runner is wedged and the event is dropped.
        if self.fired_tx.try_send(event).is_err() {
            warn!("fire channel full or closed — punch dispatch dropped");
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(SchedulerStatus {
            running: self.state.running,
            using_alarm_timer: self.state.using_alarm_timer,
            last_fired_slot_key: self.state.last_fired_slot_key.clone(),
        });
    }

    /// Main loop. Performs one immediate check, then ticks until the
    /// shutdown channel flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.state.running = true;
        let alarm_enabled = self.config.use_alarm_timer && !self.config.punch_times.is_empty();
        self.state.using_alarm_timer = alarm_enabled;
        info!(
            slots = self.config.punch_times.len(),
            interval_secs = self.config.check_interval_secs,
            alarm = alarm_enabled,
            "scheduler engine started"
        );

        self.check_once();

        let mut interval: Box<dyn TimerSource> =
            Box::new(IntervalTimer::new(self.config.check_interval()));
        let mut alarm: Box<dyn TimerSource> = if alarm_enabled {
            let times = self
                .config
                .punch_times
                .iter()
                .map(|spec| (u32::from(spec.hour), u32::from(spec.minute)))
                .collect();
            Box::new(SlotAlarm::new(
                times,
                self.config.utc_offset(),
                self.clock.clone(),
            ))
        } else {
            Box::new(IdleTimer)
        };

        loop {
            tokio::select! {
                _ = interval.tick() => self.check_once(),
                _ = alarm.tick() => self.check_once(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine stopping");
                        break;
                    }
                }
            }
        }

        self.state.running = false;
        self.publish_status();
    }
}

/// Start/stop controller around the engine task.
///
/// `Stopped → Running → Stopped`; starting while running performs a full
/// stop first. Engine state (dedup key, last-check stamp) lives and dies
/// with the engine task.
#[derive(Default)]
pub struct PunchScheduler {
    running: Option<RunningEngine>,
}

struct RunningEngine {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    status_rx: watch::Receiver<SchedulerStatus>,
}

impl PunchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the engine task. Restarts cleanly if already running.
    pub async fn start<C: Clock + Clone>(
        &mut self,
        config: ScheduleConfig,
        clock: C,
        fired_tx: mpsc::Sender<SlotFire>,
    ) {
        if self.running.is_some() {
            info!("scheduler already running — restarting");
            self.stop().await;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = SchedulerEngine::new(config, clock, fired_tx);
        let status_rx = engine.subscribe_status();
        let handle = tokio::spawn(engine.run(shutdown_rx));
        self.running = Some(RunningEngine {
            shutdown_tx,
            handle,
            status_rx,
        });
    }

    /// Stop the engine task. Returns whether anything was actually
    /// stopped; always safe to call.
    pub async fn stop(&mut self) -> bool {
        match self.running.take() {
            Some(engine) => {
                let _ = engine.shutdown_tx.send(true);
                let _ = engine.handle.await;
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Latest status snapshot, if the engine is running.
    pub fn status(&self) -> Option<SchedulerStatus> {
        self.running
            .as_ref()
            .map(|engine| engine.status_rx.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;

    use punch_core::types::PunchKind;

    use super::*;
    use crate::clock::SystemClock;

    #[derive(Clone)]
    struct MockClock(Arc<Mutex<DateTime<Utc>>>);

    impl MockClock {
        fn at(h: u32, m: u32) -> Self {
            Self(Arc::new(Mutex::new(instant(10, h, m))))
        }

        fn set(&self, day: u32, h: u32, m: u32) {
            *self.0.lock().unwrap() = instant(day, h, m);
        }
    }

    impl Clock for MockClock {
        fn now_utc(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn instant(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, h, m, 0).unwrap()
    }

    fn slot(hour: u8, minute: u8, name: &str, kind: PunchKind) -> PunchTimeSpec {
        PunchTimeSpec {
            hour,
            minute,
            name: name.to_string(),
            kind,
        }
    }

    fn config(times: Vec<PunchTimeSpec>, tolerance: u32) -> ScheduleConfig {
        ScheduleConfig {
            punch_times: times,
            check_interval_secs: 60,
            tolerance_minutes: tolerance,
            utc_offset_hours: 0,
            use_alarm_timer: false,
        }
    }

    fn engine(
        times: Vec<PunchTimeSpec>,
        tolerance: u32,
        clock: MockClock,
    ) -> (SchedulerEngine<MockClock>, mpsc::Receiver<SlotFire>) {
        let (tx, rx) = mpsc::channel(8);
        (SchedulerEngine::new(config(times, tolerance), clock, tx), rx)
    }

    fn morning() -> PunchTimeSpec {
        slot(9, 0, "in", PunchKind::On)
    }

    #[test]
    fn fires_inside_the_tolerance_window() {
        let clock = MockClock::at(9, 1);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock);
        engine.check_once();
        let fire = rx.try_recv().expect("slot should fire at 09:01 with tolerance 1");
        assert_eq!(fire.spec.kind, PunchKind::On);
        assert!(!fire.compensated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fires_early_inside_the_symmetric_window() {
        let clock = MockClock::at(8, 59);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock);
        engine.check_once();
        assert!(rx.try_recv().is_ok(), "08:59 is inside the ±1 window of 09:00");
    }

    #[test]
    fn does_not_fire_outside_the_window() {
        let clock = MockClock::at(9, 2);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock.clone());
        engine.check_once();
        assert!(rx.try_recv().is_err());

        clock.set(10, 8, 58);
        engine.check_once();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn does_not_refire_an_already_fired_slot() {
        let clock = MockClock::at(9, 0);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock.clone());
        engine.check_once();
        assert!(rx.try_recv().is_ok());

        // Same minute and the next minute of the same day: nothing.
        engine.check_once();
        clock.set(10, 9, 1);
        engine.check_once();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dedup_key_yields_to_the_next_calendar_day() {
        let clock = MockClock::at(9, 0);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock.clone());
        engine.check_once();
        assert!(rx.try_recv().is_ok());

        clock.set(11, 9, 0);
        engine.check_once();
        assert!(rx.try_recv().is_ok(), "a new day resets the dedup key");
    }

    #[test]
    fn at_most_one_slot_fires_per_tick_in_config_order() {
        let clock = MockClock::at(9, 2);
        let slots = vec![morning(), slot(9, 3, "second", PunchKind::Off)];
        let (mut engine, mut rx) = engine(slots, 5, clock);
        engine.check_once();
        let fire = rx.try_recv().unwrap();
        assert_eq!(fire.spec.name, "in", "configuration order wins");
        assert!(rx.try_recv().is_err(), "only one slot per tick");

        // The second slot gets its turn on the next tick.
        engine.check_once();
        assert_eq!(rx.try_recv().unwrap().spec.name, "second");
    }

    #[test]
    fn wake_gap_triggers_compensation() {
        let clock = MockClock::at(8, 0);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock.clone());
        engine.check_once(); // records last_check at 08:00
        assert!(rx.try_recv().is_err());

        // The host slept through the whole 09:00 window.
        clock.set(10, 9, 40);
        engine.check_once();
        let fire = rx.try_recv().expect("missed slot must be recovered");
        assert!(fire.compensated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn small_gap_does_not_compensate() {
        let clock = MockClock::at(9, 3);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock.clone());
        engine.check_once(); // 09:03 — outside the window, records last_check
        clock.set(10, 9, 4);
        engine.check_once(); // 60 s later: no gap, no recovery
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn compensation_recovers_a_slot_past_its_window() {
        // last_check three intervals in the past, now five minutes past
        // the slot, tolerance 1: the live window is long gone but the
        // compensation pass still fires it exactly once.
        let clock = MockClock::at(9, 2);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock.clone());
        engine.state.last_check = Some(instant(10, 9, 2));
        clock.set(10, 9, 5);
        engine.compensation_check();
        let fire = rx.try_recv().expect("compensation must recover the slot");
        assert!(fire.compensated);

        engine.compensation_check();
        assert!(rx.try_recv().is_err(), "recovery fires at most once");
    }

    #[test]
    fn compensation_ignores_future_and_fired_slots() {
        let clock = MockClock::at(8, 0);
        let (mut engine, mut rx) = engine(vec![morning()], 1, clock.clone());
        engine.compensation_check();
        assert!(rx.try_recv().is_err(), "09:00 has not passed yet");

        clock.set(10, 9, 0);
        engine.check_once();
        assert!(rx.try_recv().is_ok());
        clock.set(10, 9, 30);
        engine.compensation_check();
        assert!(rx.try_recv().is_err(), "already fired today");
    }

    #[test]
    fn compensation_does_not_reach_behind_the_days_last_fire() {
        let clock = MockClock::at(19, 30);
        let slots = vec![morning(), slot(19, 30, "out", PunchKind::Off)];
        let (mut engine, mut rx) = engine(slots, 1, clock.clone());
        // Evening slot fires live; the morning window was missed.
        engine.check_once();
        assert_eq!(rx.try_recv().unwrap().spec.name, "out");

        clock.set(10, 19, 45);
        engine.compensation_check();
        assert!(
            rx.try_recv().is_err(),
            "slots before the day's last fire stay settled"
        );
    }

    #[test]
    fn compensation_recovers_multiple_missed_slots_in_time_order() {
        let clock = MockClock::at(20, 0);
        let slots = vec![slot(19, 30, "out", PunchKind::Off), morning()];
        let (mut engine, mut rx) = engine(slots, 1, clock);
        engine.compensation_check();
        assert_eq!(rx.try_recv().unwrap().spec.name, "in");
        assert_eq!(rx.try_recv().unwrap().spec.name, "out");
        assert_eq!(
            engine.state().last_fired_slot_key.as_deref(),
            Some("2024-06-10-19:30")
        );
    }

    #[test]
    fn status_snapshots_track_the_last_fire() {
        let clock = MockClock::at(9, 0);
        let (mut engine, _rx) = engine(vec![morning()], 1, clock);
        let status_rx = engine.subscribe_status();
        engine.check_once();
        assert_eq!(
            status_rx.borrow().last_fired_slot_key.as_deref(),
            Some("2024-06-10-9:0")
        );
    }

    #[tokio::test]
    async fn controller_start_stop_roundtrip() {
        let (tx, _rx) = mpsc::channel(8);
        let mut scheduler = PunchScheduler::new();
        assert!(!scheduler.is_running());
        assert!(!scheduler.stop().await, "stopping a stopped scheduler is a no-op");

        scheduler.start(config(vec![], 1), SystemClock, tx.clone()).await;
        assert!(scheduler.is_running());
        // Re-entrant start: stops the first engine, spawns a fresh one.
        scheduler.start(config(vec![], 1), SystemClock, tx).await;
        assert!(scheduler.is_running());

        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running());
        assert!(!scheduler.stop().await);
    }
}
