use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::util;

/// Kind tag echoed in creation responses.
pub const TICK_RULE: &str = "TickRule";
pub const TICK_ENTRY_VALUE: &str = "TickEntryValue";

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserSettings {
    pub has_pebble: bool,
    pub twitter: String,
}

impl UserSettings {
    /// Defaults for a freshly created identity: no pebble, twitter handle
    /// taken from the identity's local-part.
    pub fn for_identity(identity: &str) -> Self {
        UserSettings {
            has_pebble: false,
            twitter: util::local_part(identity).to_owned(),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TickRule {
    pub rule_name: String,
    pub is_bucketed: bool,
    #[serde(with = "util::duration_secs")]
    pub bucket_duration: Duration,
}

impl TickRule {
    pub fn new<N: Into<String>>(name: N, bucket: &str) -> Self {
        let (is_bucketed, bucket_duration) = util::parse_bucket(bucket);
        TickRule {
            rule_name: name.into(),
            is_bucketed,
            bucket_duration,
        }
    }

    /// Rules created by CSV import are always bucketed by day.
    pub fn daily<N: Into<String>>(name: N) -> Self {
        TickRule {
            rule_name: name.into(),
            is_bucketed: true,
            bucket_duration: Duration::hours(24),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TickEntryValue {
    pub when: DateTime<Utc>,
    pub value: i64,
}

impl TickEntryValue {
    /// Entry stamped with the current server time. Storage keeps microseconds,
    /// so the stamp is truncated up front to match what is read back.
    pub fn now(value: i64) -> Self {
        TickEntryValue {
            when: Utc::now().trunc_subsecs(6),
            value,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleListing {
    pub rule_name: String,
    pub rule_key: String,
    pub entries: Vec<TickEntryValue>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dashboard {
    pub has_pebble: bool,
    pub twitter: String,
    pub rules: Vec<RuleListing>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewRuleResponse {
    #[serde(rename = "Type")]
    pub kind: String,
    pub key: String,
    pub rule: TickRule,
}

impl NewRuleResponse {
    pub fn new(key: String, rule: TickRule) -> Self {
        NewRuleResponse {
            kind: TICK_RULE.into(),
            key,
            rule,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewEntryResponse {
    #[serde(rename = "Type")]
    pub kind: String,
    pub key: String,
    pub entry: TickEntryValue,
}

impl NewEntryResponse {
    pub fn new(key: String, entry: TickEntryValue) -> Self {
        NewEntryResponse {
            kind: TICK_ENTRY_VALUE.into(),
            key,
            entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_serializes_pascal_case_with_seconds() {
        let rule = TickRule::new("weight", "day");
        let value = serde_json::to_value(NewRuleResponse::new("k".into(), rule)).unwrap();

        assert_eq!(
            value,
            json!({
                "Type": "TickRule",
                "Key": "k",
                "Rule": {
                    "RuleName": "weight",
                    "IsBucketed": true,
                    "BucketDuration": 86400,
                }
            })
        );
    }

    #[test]
    fn settings_default_twitter_from_local_part() {
        let settings = UserSettings::for_identity("test@example.com");
        assert_eq!(settings.twitter, "test");
        assert!(!settings.has_pebble);
    }

    #[test]
    fn daily_rule_is_bucketed_by_day() {
        let rule = TickRule::daily("Steps");
        assert!(rule.is_bucketed);
        assert_eq!(rule.bucket_duration, Duration::hours(24));
    }

    #[test]
    fn entry_when_is_rfc3339() {
        let entry: TickEntryValue =
            serde_json::from_value(json!({"When": "2020-01-02T00:00:00Z", "Value": 79})).unwrap();
        assert_eq!(entry.value, 79);
        assert_eq!(entry.when.to_rfc3339(), "2020-01-02T00:00:00+00:00");
    }
}
