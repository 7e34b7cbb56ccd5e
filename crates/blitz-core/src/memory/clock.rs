use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

/// Wall clock that never repeats or goes backwards.
///
/// Timestamps are truncated to microseconds (the precision both storage
/// backends keep) and bumped by one microsecond when the wall clock has not
/// advanced past the last value handed out.
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now();
        let wall = DateTime::from_timestamp_micros(wall.timestamp_micros()).unwrap_or(wall);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match *last {
            Some(prev) if wall <= prev => prev + TimeDelta::microseconds(1),
            _ => wall,
        };
        *last = Some(next);
        next
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing() {
        let clock = MonotonicClock::new();
        let stamps: Vec<_> = (0..1000).map(|_| clock.now()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_microsecond_precision() {
        let ts = MonotonicClock::new().now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1000, 0);
    }
}
