//! Seconds/nanoseconds timestamps.

use std::cmp::Ordering;
use std::fmt;

/// A point in time as `(seconds, nanoseconds)` since the Unix epoch.
///
/// Nanoseconds lie in `(-1_000_000_000, 1_000_000_000)` and share sign with
/// seconds, so the pair reads as a single signed quantity. Construction
/// asserts the invariant; values decoded from storage were encoded by us
/// and are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: i32,
}

pub const NANOS_PER_SECOND: i32 = 1_000_000_000;

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp {
        seconds: 0,
        nanoseconds: 0,
    };

    /// # Panics
    ///
    /// If `nanoseconds` is out of range or disagrees in sign with `seconds`.
    pub fn new(seconds: i64, nanoseconds: i32) -> Timestamp {
        assert!(nanoseconds.abs() < NANOS_PER_SECOND, "nanoseconds out of range");
        assert!(
            seconds == 0 || nanoseconds == 0 || (seconds < 0) == (nanoseconds < 0),
            "seconds and nanoseconds must share sign"
        );
        Timestamp {
            seconds,
            nanoseconds,
        }
    }

    pub const fn seconds(self) -> i64 {
        self.seconds
    }

    pub const fn nanoseconds(self) -> i32 {
        self.nanoseconds
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then(self.nanoseconds.cmp(&other.nanoseconds))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds.unsigned_abs())
    }
}
