use camino::Utf8Path as Path;
use eyre::{Context, Result};
use tracing::{instrument, warn};

use crate::model::{Video, VideoId};

use self::db::DbPool;

pub mod db;
#[allow(non_snake_case)]
mod schema;
pub mod views;

/// Durable per video view counters.
///
/// Only `inc_views` and `migrate` report failures, reads log them and
/// fall back to zero.
#[derive(Clone)]
pub struct ViewStore {
    pool: DbPool,
}

impl ViewStore {
    pub async fn open(db_path: &Path) -> Result<ViewStore> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err(format!("could not create directory {}", parent))?;
        }
        let pool = DbPool::open(db_path)?;
        pool.run(db::migrate)
            .await
            .wrap_err("error migrating view store")?;
        Ok(ViewStore { pool })
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn inc_views(&self, id: &VideoId) -> Result<()> {
        let id = id.as_str().to_owned();
        self.pool.run(move |conn| views::inc_views(conn, &id)).await
    }

    pub async fn get_views(&self, id: &VideoId) -> i64 {
        match self.try_get_views(id).await {
            Ok(count) => count,
            Err(err) => {
                warn!(video_id = %id, "error reading view count: {:#}", err);
                0
            }
        }
    }

    async fn try_get_views(&self, id: &VideoId) -> Result<i64> {
        let id = id.as_str().to_owned();
        self.pool.run(move |conn| views::get_views(conn, &id)).await
    }

    /// Folds a counter recorded under the pre-prefix key of `id` into `id`.
    /// Calling it again once the legacy record is gone does nothing.
    #[instrument(skip(self), level = "debug")]
    pub async fn migrate(&self, prefix: &str, id: &VideoId) -> Result<()> {
        let legacy_key = legacy_key(prefix, id).to_owned();
        let id = id.as_str().to_owned();
        let migrated = self
            .pool
            .run(move |conn| views::migrate_legacy(conn, &legacy_key, &id))
            .await?;
        if migrated {
            tracing::info!("migrated legacy view count");
        }
        Ok(())
    }

    /// Bookkeeping for one playback request.
    pub async fn record_view(&self, prefix: &str, id: &VideoId) {
        if let Err(err) = self.migrate(prefix, id).await {
            warn!(video_id = %id, "error migrating view count: {:#}", err);
        }
        if let Err(err) = self.inc_views(id).await {
            warn!(video_id = %id, "error updating view count: {:#}", err);
        }
    }

    /// Fills in `Video::views` for every video with a single query.
    pub async fn merge_views(&self, videos: &mut [Video]) {
        let ids: Vec<String> = videos.iter().map(|v| v.id.as_str().to_owned()).collect();
        match self.pool.run(move |conn| views::get_views_many(conn, &ids)).await {
            Ok(counts) => {
                for video in videos.iter_mut() {
                    video.views = counts.get(video.id.as_str()).copied().unwrap_or(0);
                }
            }
            Err(err) => {
                warn!("error reading view counts: {:#}", err);
                for video in videos.iter_mut() {
                    video.views = 0;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn seed_legacy(&self, legacy_key: &str, count: i64) -> Result<()> {
        let legacy_key = legacy_key.to_owned();
        self.pool
            .run(move |conn| views::insert_legacy_views(conn, &legacy_key, count))
            .await
    }
}

fn legacy_key<'a>(prefix: &str, id: &'a VideoId) -> &'a str {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return id.as_str();
    }
    id.as_str()
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(id.as_str())
}

#[cfg(test)]
mod test {
    use claims::assert_ok;
    use pretty_assertions::assert_eq;

    use super::*;

    fn video(id: &str) -> Video {
        Video {
            id: VideoId::from(id),
            title: id.to_owned(),
            description: String::new(),
            path: format!("/videos/{id}.mp4").into(),
            timestamp: chrono::Utc::now(),
            thumbnail: crate::model::Thumbnail::builtin_default(),
            views: 0,
            qualities: Default::default(),
        }
    }

    async fn open_temp_store() -> (tempfile::TempDir, ViewStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("views.db")).unwrap();
        let store = assert_ok!(ViewStore::open(&path).await);
        (dir, store)
    }

    #[test]
    fn legacy_key_strips_collection_prefix() {
        let id = VideoId::from("main/trips/alps");
        assert_eq!(legacy_key("main", &id), "trips/alps");
        assert_eq!(legacy_key("/main/", &id), "trips/alps");
        assert_eq!(legacy_key("", &id), "main/trips/alps");
        assert_eq!(legacy_key("other", &id), "main/trips/alps");
    }

    #[tokio::test]
    async fn increment_then_read() {
        let (_dir, store) = open_temp_store().await;
        let id = VideoId::from("main/a");
        assert_eq!(store.get_views(&id).await, 0);
        assert_ok!(store.inc_views(&id).await);
        assert_eq!(store.get_views(&id).await, 1);
    }

    #[tokio::test]
    async fn unknown_id_reads_zero() {
        let (_dir, store) = open_temp_store().await;
        assert_eq!(store.get_views(&VideoId::from("nope")).await, 0);
    }

    #[tokio::test]
    async fn migrate_twice_does_not_double_count() {
        let (_dir, store) = open_temp_store().await;
        let id = VideoId::from("main/alps");
        assert_ok!(store.seed_legacy("alps", 3).await);
        assert_ok!(store.migrate("main", &id).await);
        assert_eq!(store.get_views(&id).await, 3);
        assert_ok!(store.migrate("main", &id).await);
        assert_eq!(store.get_views(&id).await, 3);
    }

    #[tokio::test]
    async fn record_view_migrates_and_counts() {
        let (_dir, store) = open_temp_store().await;
        let id = VideoId::from("main/alps");
        assert_ok!(store.seed_legacy("alps", 2).await);
        store.record_view("main", &id).await;
        store.record_view("main", &id).await;
        assert_eq!(store.get_views(&id).await, 4);
    }

    #[tokio::test]
    async fn merge_views_fills_every_video() {
        let (_dir, store) = open_temp_store().await;
        let a = VideoId::from("a");
        assert_ok!(store.inc_views(&a).await);
        assert_ok!(store.inc_views(&a).await);
        let mut videos = vec![video("a"), video("b")];
        videos[1].views = 7;
        store.merge_views(&mut videos).await;
        assert_eq!(videos[0].views, 2);
        assert_eq!(videos[1].views, 0);
    }
}
