//! Ingress expiry timestamps.

use crate::request_id::{HashableValue, ToHashable};
use serde::{
    de::{self, MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{fmt, time::Duration};
use time::OffsetDateTime;

const NANOS_PER_SECOND: u64 = 1_000_000_000;
const NANOS_PER_MINUTE: u64 = 60 * NANOS_PER_SECOND;
const JSON_KEY: &str = "__expiry__";

/// Below this delta, expiries are rounded down to the second; from it on, to the minute.
pub const MINUTE_ROUNDING_THRESHOLD: Duration = Duration::from_secs(90);

/// An absolute deadline, in nanoseconds since the Unix epoch, after which a replica must
/// reject a request.
///
/// In human-readable formats this serializes as `{"__expiry__": "<nanoseconds>"}`, and as a
/// plain integer otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Expiry(u64);

impl Expiry {
    /// An expiry at exactly `nanos` since the epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// An expiry `delta` from now.
    pub fn from_delta(delta: Duration) -> Self {
        Self::from_delta_with_drift(delta, 0)
    }

    /// An expiry `delta` from now, corrected by `clock_drift_ms`, the difference between
    /// the replica's clock and the local one.
    pub fn from_delta_with_drift(delta: Duration, clock_drift_ms: i64) -> Self {
        let now_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self::at(now_ms, delta, clock_drift_ms)
    }

    /// The expiry `delta` after `now_ms` milliseconds since the epoch, corrected by
    /// `clock_drift_ms`.
    ///
    /// Deltas below 90 seconds are rounded down to the whole second, longer ones to the
    /// whole minute, so that requests built close together hash identically.
    pub fn at(now_ms: i128, delta: Duration, clock_drift_ms: i64) -> Self {
        let raw_ms = now_ms + delta.as_millis() as i128 + clock_drift_ms as i128;
        let raw = u64::try_from(raw_ms.max(0) * 1_000_000).unwrap_or(u64::MAX);
        let unit = if delta < MINUTE_ROUNDING_THRESHOLD {
            NANOS_PER_SECOND
        } else {
            NANOS_PER_MINUTE
        };
        Self(raw - raw % unit)
    }

    /// Nanoseconds since the Unix epoch.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Whether this deadline is already in the past.
    pub fn has_passed(&self) -> bool {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos();
        (self.0 as i128) < now
    }
}

impl From<Expiry> for u64 {
    fn from(expiry: Expiry) -> u64 {
        expiry.0
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ToHashable for Expiry {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Nat(self.0)
    }
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry(JSON_KEY, &self.0.to_string())?;
            map.end()
        } else {
            serializer.serialize_u64(self.0)
        }
    }
}

// Accepts both shapes: buffered deserializers (internally tagged enums) do not report
// the underlying format's human-readability.
impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ExpiryVisitor)
    }
}

struct ExpiryVisitor;

impl<'de> Visitor<'de> for ExpiryVisitor {
    type Value = Expiry;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("nanoseconds, or a map of the form {\"__expiry__\": \"<nanoseconds>\"}")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Expiry(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut nanos = None;
        while let Some(key) = map.next_key::<String>()? {
            if key != JSON_KEY {
                return Err(de::Error::unknown_field(&key, &[JSON_KEY]));
            }
            let text: String = map.next_value()?;
            nanos = Some(text.parse::<u64>().map_err(|e| {
                de::Error::custom(format_args!("invalid expiry {text:?}: {e}"))
            })?);
        }
        nanos
            .map(Expiry)
            .ok_or_else(|| de::Error::missing_field(JSON_KEY))
    }
}
