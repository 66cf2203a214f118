//! Microsecond-precision UTC timestamp handling for the wire format.
//!
//! Every timestamp that crosses a process boundary is rendered as ISO-8601
//! with exactly six fractional digits (`2025-09-10T14:00:00.000000Z`) so that
//! consumers in other languages see a fixed-width field.

use chrono::{DateTime, Utc};

/// Wire format: ISO-8601 UTC with six fractional digits.
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Format a timestamp for the wire.
pub fn format_wire(ts: &DateTime<Utc>) -> String {
    ts.format(WIRE_FORMAT).to_string()
}

/// Parse a wire timestamp. Accepts any RFC-3339 offset and normalizes to UTC.
pub fn parse_wire(s: &str) -> crate::ModelResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| crate::ModelError::InvalidTimestamp(s.to_string()))
}

/// Serde adapter used on `ts` fields of wire messages.
pub mod micros {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_wire(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_wire(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_six_fractional_digits() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 10, 14, 0, 0).unwrap();
        assert_eq!(format_wire(&ts), "2025-09-10T14:00:00.000000Z");
    }

    #[test]
    fn round_trips_microseconds() {
        let ts = Utc
            .with_ymd_and_hms(2025, 9, 10, 14, 0, 1)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(250_500))
            .unwrap();
        let rendered = format_wire(&ts);
        assert_eq!(rendered, "2025-09-10T14:00:01.250500Z");
        assert_eq!(parse_wire(&rendered).unwrap(), ts);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_wire("not-a-timestamp").is_err());
    }
}
