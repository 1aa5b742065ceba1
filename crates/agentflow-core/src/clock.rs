//! Clock capability: the single source of wall-clock time.
//!
//! Every timestamp the engine writes goes through an injected `Clock` so
//! tests can pin time. The wire format is ISO-8601 UTC with a trailing `Z`
//! and fixed millisecond precision, which keeps lexicographic order equal to
//! chronological order in the stores.

use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Source of the current UTC time. Object-safe so components can hold
/// `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The current time in wire format.
    fn now_string(&self) -> String {
        format_utc(self.now())
    }
}

/// Format a timestamp in the engine wire format: `2025-06-01T12:00:00.000Z`.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a wire-format timestamp back into `DateTime<Utc>`.
pub fn parse_utc(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_has_trailing_z_and_millis() {
        let dt = parse_utc("2025-06-01T12:00:00Z").unwrap();
        assert_eq!(format_utc(dt), "2025-06-01T12:00:00.000Z");
    }

    #[test]
    fn wire_format_roundtrip() {
        let dt = Utc::now();
        let parsed = parse_utc(&format_utc(dt)).unwrap();
        // Millisecond precision on the wire
        assert_eq!(parsed.timestamp_millis(), dt.timestamp_millis());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(parse_utc("2025-06-01T12:00:00Z").unwrap());
        let before = clock.now();
        clock.advance(Duration::seconds(90));
        assert_eq!((clock.now() - before).num_seconds(), 90);
        assert_eq!(clock.now_string(), "2025-06-01T12:01:30.000Z");
    }

    #[test]
    fn lexicographic_order_matches_chronological() {
        let a = format_utc(parse_utc("2025-06-01T09:59:59.900Z").unwrap());
        let b = format_utc(parse_utc("2025-06-01T10:00:00.000Z").unwrap());
        assert!(a < b);
    }
}
