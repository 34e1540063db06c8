use chrono::Duration;

/// Minutes used when the bucket is empty or not understood.
pub const DEFAULT_BUCKET_MINUTES: i64 = 15;

/// Parses a bucket: `"hour"`, `"day"` or a positive count of minutes.
/// Anything else falls back to the 15 minute default.
pub fn parse_bucket(bucket: &str) -> (bool, Duration) {
    let bucket = bucket.trim();
    let duration = match bucket {
        "hour" => Duration::hours(1),
        "day" => Duration::hours(24),
        minutes => minutes
            .parse::<i64>()
            .ok()
            .filter(|m| *m > 0)
            .and_then(Duration::try_minutes)
            .unwrap_or_else(default_bucket),
    };

    (true, duration)
}

pub fn default_bucket() -> Duration {
    Duration::minutes(DEFAULT_BUCKET_MINUTES)
}

/// Part of an identity before the first '@', or the whole identity.
pub fn local_part(identity: &str) -> &str {
    identity.split('@').next().unwrap_or(identity)
}

/// (De)serializes a `chrono::Duration` as whole seconds.
pub mod duration_secs {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs).ok_or_else(|| D::Error::custom(format!("duration of {} seconds is out of range", secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_vocabulary() {
        assert_eq!(parse_bucket("hour"), (true, Duration::hours(1)));
        assert_eq!(parse_bucket("day"), (true, Duration::hours(24)));
        assert_eq!(parse_bucket("45"), (true, Duration::minutes(45)));
    }

    #[test]
    fn unknown_buckets_fall_back_to_default() {
        for bucket in &["", "week", "-5", "0", "1.5", "200000000000000", "9223372036854775807"] {
            assert_eq!(parse_bucket(bucket), (true, Duration::minutes(15)), "bucket {:?}", bucket);
        }
    }

    #[test]
    fn local_part_of_identity() {
        assert_eq!(local_part("test@example.com"), "test");
        assert_eq!(local_part("no-at-sign"), "no-at-sign");
        assert_eq!(local_part("@example.com"), "");
    }
}
