//! Time source for lifecycle timestamps.

use chrono::{DateTime, Utc};

/// Provides the current time. Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Render a timestamp the way the store expects it: epoch seconds with a
/// microsecond fraction (e.g. `1700000000.250000`).
pub fn epoch_seconds(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn epoch_seconds_keeps_microseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        assert_eq!(epoch_seconds(at), "1700000000.250000");
        assert_eq!(epoch_seconds(FixedClock(at).now()), "1700000000.250000");
    }
}
