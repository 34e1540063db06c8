use crate::db::schema::*;
use crate::proto::{TickEntryValue, TickRule, UserSettings};
use crate::util;
use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = user_settings, check_for_backend(diesel::sqlite::Sqlite))]
pub struct Settings {
    pub identity: String,
    pub has_pebble: bool,
    pub twitter: String,
}

impl Settings {
    pub fn new(identity: String, settings: UserSettings) -> Self {
        Settings {
            identity,
            has_pebble: settings.has_pebble,
            twitter: settings.twitter,
        }
    }
}

impl From<Settings> for UserSettings {
    fn from(s: Settings) -> Self {
        UserSettings {
            has_pebble: s.has_pebble,
            twitter: s.twitter,
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = tick_rules, check_for_backend(diesel::sqlite::Sqlite))]
pub struct Rule {
    pub id: i32,
    pub rule_key: String,
    pub owner: String,
    pub rule_name: String,
    pub is_bucketed: bool,
    pub bucket_minutes: i64,
}

impl From<Rule> for TickRule {
    fn from(r: Rule) -> Self {
        TickRule {
            rule_name: r.rule_name,
            is_bucketed: r.is_bucketed,
            bucket_duration: Duration::try_minutes(r.bucket_minutes).unwrap_or_else(util::default_bucket),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = tick_rules)]
pub struct NewRule<'a> {
    pub rule_key: &'a str,
    pub owner: &'a str,
    pub rule_name: &'a str,
    pub is_bucketed: bool,
    pub bucket_minutes: i64,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = tick_entries, check_for_backend(diesel::sqlite::Sqlite))]
pub struct Entry {
    pub id: i32,
    pub entry_key: String,
    pub rule_id: i32,
    pub recorded_at: NaiveDateTime,
    pub value: i64,
}

impl From<Entry> for TickEntryValue {
    fn from(e: Entry) -> Self {
        TickEntryValue {
            when: e.recorded_at.and_utc(),
            value: e.value,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = tick_entries)]
pub struct NewEntry {
    pub entry_key: String,
    pub rule_id: i32,
    pub recorded_at: NaiveDateTime,
    pub value: i64,
}

impl NewEntry {
    pub fn new(entry_key: String, rule_id: i32, entry: &TickEntryValue) -> Self {
        NewEntry {
            entry_key,
            rule_id,
            recorded_at: entry.when.naive_utc(),
            value: entry.value,
        }
    }
}
