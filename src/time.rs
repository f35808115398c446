//! Timestamps carried by records and blocks

use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

static CLOCK_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the first call in this process.
pub fn now() -> i64 {
    let origin = CLOCK_ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_nanos() as i64
}

/// A monotonic tick count paired with the wall clock at the same instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualTime {
    pub ticks: i64,
    pub time: DateTime<Utc>,
}

impl DualTime {
    pub fn now() -> Self {
        Self {
            ticks: now(),
            time: Utc::now(),
        }
    }

    pub fn to_rfc3339(&self) -> String {
        self.time.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_are_monotonic() {
        let first = DualTime::now();
        let second = DualTime::now();
        assert!(second.ticks >= first.ticks);
        assert!(second.to_rfc3339().ends_with('Z'));
    }
}
