//! Time source for ticket bookkeeping and expiration checks.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock; the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Clock that only moves when told to. Used to drive expiration deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self { Self { now: Mutex::new(start) } }

    pub fn set(&self, at: DateTime<Utc>) { *self.now.lock() = at; }

    pub fn advance(&self, by: Duration) {
        let mut g = self.now.lock();
        *g += by;
    }

    pub fn advance_ms(&self, ms: i64) { self.advance(Duration::milliseconds(ms)); }
}

impl Default for ManualClock {
    fn default() -> Self { Self::new(Utc::now()) }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> { *self.now.lock() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_on_advance() {
        let start = Utc::now();
        let c = ManualClock::new(start);
        assert_eq!(c.now(), start);
        c.advance_ms(1500);
        assert_eq!(c.now() - start, Duration::milliseconds(1500));
        c.set(start);
        assert_eq!(c.now(), start);
    }
}
