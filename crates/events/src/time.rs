//! RFC3339 timestamp handling for event payloads.
//!
//! Payload timestamps are always UTC with nanosecond precision so that the
//! stored bytes are canonical: re-serializing a parsed payload yields the
//! same text, which the webhook signature depends on.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp the way payloads store it.
pub fn format_rfc3339_nanos(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Serde adapter for payload timestamp fields.
pub mod rfc3339_nanos {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_rfc3339_nanos(*ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_always_carries_nine_fractional_digits_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(format_rfc3339_nanos(ts), "2024-01-01T12:00:00.000000000Z");
    }

    #[test]
    fn format_round_trips() {
        let ts = Utc.timestamp_opt(1_704_110_400, 123_456_789).unwrap();
        let text = format_rfc3339_nanos(ts);
        let back = DateTime::parse_from_rfc3339(&text)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(back, ts);
    }
}
