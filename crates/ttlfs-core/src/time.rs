//! Timestamps and time-to-live durations.
//!
//! Deadlines are kept at millisecond resolution so a file created at any
//! instant within a second still lives for its full TTL.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a new timestamp from milliseconds since Unix epoch.
    pub const fn new(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time as a timestamp.
    ///
    /// A clock set before the epoch reads as the epoch itself.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now()).unwrap_or_default()
    }

    /// Returns the milliseconds since Unix epoch.
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns the seconds since Unix epoch (truncated).
    pub const fn as_secs(&self) -> i64 {
        self.0 / 1000
    }

    /// Creates from a SystemTime.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        time.duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| Self(d.as_millis() as i64))
    }

    /// Converts to a SystemTime.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        if self.0 >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_millis(self.0 as u64))
        } else {
            UNIX_EPOCH.checked_sub(Duration::from_millis((-self.0) as u64))
        }
    }

    /// Returns true if this timestamp is at or before `now`.
    pub fn is_due(&self, now: &Timestamp) -> bool {
        self.0 <= now.0
    }

    /// Adds a duration to this timestamp.
    pub fn add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as i64))
    }

    /// Subtracts a duration from this timestamp.
    pub fn sub(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_millis() as i64))
    }

    /// Returns the duration between two timestamps.
    pub fn duration_since(&self, earlier: &Timestamp) -> Option<Duration> {
        if self.0 >= earlier.0 {
            Some(Duration::from_millis((self.0 - earlier.0) as u64))
        } else {
            None
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1000);
        let millis = self.0.rem_euclid(1000);
        write!(f, "{}.{:03}", secs, millis)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// Time-to-live applied to every created file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttl(Duration);

impl Ttl {
    /// Creates a TTL from a whole number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Returns the inner duration.
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Returns the TTL in whole seconds.
    pub const fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    /// Calculates the deadline for a file created at `created_at`.
    pub fn expires_at(&self, created_at: Timestamp) -> Timestamp {
        created_at.add(self.0)
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Self::from_secs(crate::DEFAULT_TTL_SECS)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}
