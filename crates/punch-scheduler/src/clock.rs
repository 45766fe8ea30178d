use chrono::{DateTime, Utc};

/// Time source seam. The engine never reads the system clock directly, so
/// tests can drive every window and wake-gap path deterministically.
pub trait Clock: Send + Sync + 'static {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
