//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
///
/// Serializes as integer milliseconds since the Unix epoch, which is the
/// shape request handlers and stored session payloads expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "chrono::serde::ts_milliseconds")] DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    ///
    /// Out-of-range values saturate to the Unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .unwrap_or_default(),
        )
    }

    /// Returns milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Creates a timestamp from Unix seconds.
    pub fn from_unix_secs(secs: u64) -> Self {
        Self::from_millis((secs as i64).saturating_mul(1000))
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> u64 {
        self.0.timestamp().max(0) as u64
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Adds a std duration, or `None` if the result is not representable.
    pub fn checked_plus(&self, duration: std::time::Duration) -> Option<Self> {
        Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
    }

    /// Creates a new timestamp by adding a std duration.
    ///
    /// Saturates at the latest representable instant.
    pub fn plus(&self, duration: std::time::Duration) -> Self {
        self.checked_plus(duration)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Creates a new timestamp by adding the specified number of milliseconds.
    ///
    /// Saturates at the earliest or latest representable instant.
    pub fn plus_millis(&self, millis: i64) -> Self {
        Duration::try_milliseconds(millis)
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(if millis < 0 {
                Self(DateTime::<Utc>::MIN_UTC)
            } else {
                Self(DateTime::<Utc>::MAX_UTC)
            })
    }

    /// Creates a new timestamp by adding the specified number of seconds.
    pub fn plus_secs(&self, secs: u64) -> Self {
        self.plus(std::time::Duration::from_secs(secs))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_millis() {
        let earlier = Timestamp::from_millis(1_000);
        let later = earlier.plus_millis(1);

        assert!(earlier.is_before(&later));
        assert!(later.is_after(&earlier));
        assert!(!earlier.is_after(&earlier));
    }

    #[test]
    fn negative_millis_move_backwards() {
        let ts = Timestamp::from_millis(10_000).plus_millis(-2_500);
        assert_eq!(ts.as_millis(), 7_500);
    }

    #[test]
    fn millis_round_trip_preserves_value() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
        assert_eq!(ts.as_unix_secs(), 1_700_000_000);
    }

    #[test]
    fn serializes_as_epoch_millis() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000123");

        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn huge_durations_do_not_panic() {
        let ts = Timestamp::from_millis(1_700_000_000_000);
        let forever = std::time::Duration::from_secs(20_000_000_000_000);

        assert_eq!(ts.checked_plus(forever), None);
        assert_eq!(ts.plus(forever), Timestamp::from_datetime(DateTime::<Utc>::MAX_UTC));
        assert_eq!(
            ts.plus_millis(i64::MAX),
            Timestamp::from_datetime(DateTime::<Utc>::MAX_UTC)
        );
        assert_eq!(
            ts.plus_millis(i64::MIN),
            Timestamp::from_datetime(DateTime::<Utc>::MIN_UTC)
        );
        assert!(ts.plus_secs(u64::MAX).is_after(&ts));
    }

    #[test]
    fn plus_adds_std_duration() {
        let ts = Timestamp::from_millis(1_000);
        let later = ts.plus(std::time::Duration::from_secs(5));
        assert_eq!(later.as_millis(), 6_000);
        assert_eq!(later.duration_since(&ts), Duration::seconds(5));
    }
}
