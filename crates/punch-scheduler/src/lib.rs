//! `punch-scheduler` — slot scheduling with at-most-once-per-day firing.
//!
//! # Overview
//!
//! The [`engine::SchedulerEngine`] owns all mutable scheduler state and is
//! driven by one or two [`timer::TimerSource`]s funnelled through a single
//! select loop. Every tick scans the configured slots for one whose
//! tolerance window contains the current local time; the per-day dedup key
//! is written *before* the fire event is dispatched, so overlapping timer
//! sources can never double-fire a slot. Fired slots are delivered over a
//! bounded mpsc channel; executing the punch is the receiver's problem.
//!
//! # Timer sources
//!
//! | Source          | Behaviour                                           |
//! |-----------------|-----------------------------------------------------|
//! | `IntervalTimer` | Fixed-cadence fallback check                        |
//! | `SlotAlarm`     | Wall-clock wake at the next configured slot time    |
//!
//! A host suspend can swallow interval ticks entirely; the engine detects
//! the resulting wake gap (elapsed time above twice the cadence) and runs a
//! compensation pass that recovers slots whose window closed while the
//! process was asleep.

pub mod clock;
pub mod engine;
pub mod timer;

pub use clock::{Clock, SystemClock};
pub use engine::{PunchScheduler, SchedulerEngine, SchedulerState, SchedulerStatus, SlotFire};
pub use timer::{IdleTimer, IntervalTimer, SlotAlarm, TimerSource};
