use std::collections::HashMap;

use diesel::prelude::*;
use eyre::Result;
use tracing::instrument;

use super::db::DbConn;
use super::schema::{LegacyViews, Views};

// stays well below SQLITE_MAX_VARIABLE_NUMBER of older sqlite builds
const IN_CHUNK_SIZE: usize = 500;

#[instrument(skip(conn), level = "trace")]
pub fn inc_views(conn: &mut DbConn, video_id: &str) -> Result<()> {
    diesel::insert_into(Views::table)
        .values((Views::video_id.eq(video_id), Views::view_count.eq(1i64)))
        .on_conflict(Views::video_id)
        .do_update()
        .set(Views::view_count.eq(Views::view_count + 1i64))
        .execute(conn)?;
    Ok(())
}

#[instrument(skip(conn), level = "trace")]
pub fn get_views(conn: &mut DbConn, video_id: &str) -> Result<i64> {
    let count: Option<i64> = Views::table
        .filter(Views::video_id.eq(video_id))
        .select(Views::view_count)
        .first(conn)
        .optional()?;
    Ok(count.unwrap_or(0))
}

#[instrument(skip(conn, video_ids), level = "trace")]
pub fn get_views_many(conn: &mut DbConn, video_ids: &[String]) -> Result<HashMap<String, i64>> {
    let mut counts = HashMap::with_capacity(video_ids.len());
    for chunk in video_ids.chunks(IN_CHUNK_SIZE) {
        let rows: Vec<(String, i64)> = Views::table
            .filter(Views::video_id.eq_any(chunk))
            .select((Views::video_id, Views::view_count))
            .load(conn)?;
        counts.extend(rows);
    }
    Ok(counts)
}

/// Moves the counter stored under `legacy_key` onto `video_id`, adding to
/// whatever `video_id` already has. Returns whether anything was moved.
#[instrument(skip(conn), level = "trace")]
pub fn migrate_legacy(conn: &mut DbConn, legacy_key: &str, video_id: &str) -> Result<bool> {
    conn.immediate_transaction(|conn| {
        let legacy: Option<i64> = LegacyViews::table
            .filter(LegacyViews::legacy_key.eq(legacy_key))
            .select(LegacyViews::view_count)
            .first(conn)
            .optional()?;
        let Some(count) = legacy else {
            return Ok(false);
        };
        diesel::insert_into(Views::table)
            .values((Views::video_id.eq(video_id), Views::view_count.eq(count)))
            .on_conflict(Views::video_id)
            .do_update()
            .set(Views::view_count.eq(Views::view_count + count))
            .execute(conn)?;
        diesel::delete(LegacyViews::table.filter(LegacyViews::legacy_key.eq(legacy_key)))
            .execute(conn)?;
        Ok(true)
    })
}

#[instrument(skip(conn), level = "trace")]
pub fn insert_legacy_views(conn: &mut DbConn, legacy_key: &str, count: i64) -> Result<()> {
    diesel::insert_into(LegacyViews::table)
        .values((
            LegacyViews::legacy_key.eq(legacy_key),
            LegacyViews::view_count.eq(count),
        ))
        .on_conflict(LegacyViews::legacy_key)
        .do_update()
        .set(LegacyViews::view_count.eq(count))
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use claims::{assert_ok, assert_ok_eq};
    use pretty_assertions::assert_eq;

    use super::super::db::open_in_memory_and_migrate;
    use super::*;

    #[test]
    fn inc_creates_then_increments() {
        let mut conn = open_in_memory_and_migrate();
        assert_ok_eq!(get_views(&mut conn, "main/a"), 0);
        assert_ok!(inc_views(&mut conn, "main/a"));
        assert_ok_eq!(get_views(&mut conn, "main/a"), 1);
        assert_ok!(inc_views(&mut conn, "main/a"));
        assert_ok!(inc_views(&mut conn, "main/b"));
        assert_ok_eq!(get_views(&mut conn, "main/a"), 2);
        assert_ok_eq!(get_views(&mut conn, "main/b"), 1);
    }

    #[test]
    fn get_many_only_returns_known_ids() {
        let mut conn = open_in_memory_and_migrate();
        assert_ok!(inc_views(&mut conn, "a"));
        assert_ok!(inc_views(&mut conn, "a"));
        assert_ok!(inc_views(&mut conn, "c"));
        let ids = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let counts = assert_ok!(get_views_many(&mut conn, &ids));
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), None);
        assert_eq!(counts.get("c"), Some(&1));
    }

    #[test]
    fn migrate_moves_legacy_count_once() {
        let mut conn = open_in_memory_and_migrate();
        assert_ok!(insert_legacy_views(&mut conn, "holiday", 5));
        assert_ok!(inc_views(&mut conn, "main/holiday"));
        assert_ok_eq!(migrate_legacy(&mut conn, "holiday", "main/holiday"), true);
        assert_ok_eq!(get_views(&mut conn, "main/holiday"), 6);
        assert_ok_eq!(migrate_legacy(&mut conn, "holiday", "main/holiday"), false);
        assert_ok_eq!(get_views(&mut conn, "main/holiday"), 6);
    }

    #[test]
    fn migrate_without_legacy_record_is_noop() {
        let mut conn = open_in_memory_and_migrate();
        assert_ok_eq!(migrate_legacy(&mut conn, "nothing", "main/nothing"), false);
        assert_ok_eq!(get_views(&mut conn, "main/nothing"), 0);
    }
}
