use std::ops::Add;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// CQL `timestamp` columns hold milliseconds since the epoch, so a value
// read back from the store only equals the value written when it carries no
// sub-millisecond part. `Timestamp` truncates on construction.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

// Custom serde to always use millisecond precision with Z timezone
impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| Timestamp::from(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

impl Timestamp {
    pub fn now() -> Self {
        Timestamp::from_millis(epoch_micros() / 1_000)
    }

    /// Build from milliseconds since the Unix epoch. Out-of-range values clamp to the epoch.
    pub fn from_millis(millis: i64) -> Self {
        match DateTime::from_timestamp_millis(millis) {
            Some(time) => Timestamp(time),
            None => Timestamp(DateTime::<Utc>::from_timestamp_nanos(0)),
        }
    }

    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn inner(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::from_millis(0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        let new_time = self.0 + chrono::Duration::from_std(rhs).unwrap_or(chrono::Duration::zero());
        Timestamp::from(new_time)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::from_millis(dt.timestamp_millis())
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// Current time as store-native write timestamp (microseconds since the epoch).
pub fn epoch_micros() -> i64 {
    let now = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(time) => time,
        Err(_) => std::time::Duration::from_secs(0),
    };

    (now.as_secs() as i64 * 1_000_000) + (now.subsec_micros() as i64)
}
