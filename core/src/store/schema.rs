diesel::table! {
    Views (video_id) {
        video_id -> Text,
        view_count -> BigInt,
    }
}

diesel::table! {
    LegacyViews (legacy_key) {
        legacy_key -> Text,
        view_count -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(Views, LegacyViews);
