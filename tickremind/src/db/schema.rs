table! {
    user_settings (identity) {
        identity -> Text,
        has_pebble -> Bool,
        twitter -> Text,
    }
}

table! {
    tick_rules (id) {
        id -> Integer,
        rule_key -> Text,
        owner -> Text,
        rule_name -> Text,
        is_bucketed -> Bool,
        bucket_minutes -> BigInt,
    }
}

table! {
    tick_entries (id) {
        id -> Integer,
        entry_key -> Text,
        rule_id -> Integer,
        recorded_at -> Timestamp,
        value -> BigInt,
    }
}

joinable!(tick_entries -> tick_rules (rule_id));

allow_tables_to_appear_in_same_query!(
    user_settings,
    tick_rules,
    tick_entries,
);
