use std::collections::HashSet;

use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use eyre::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, instrument, warn, Instrument};
use walkdir::WalkDir;

use super::{
    id::{classify, derive_video_id, FileKind, VIDEO_EXTENSIONS},
    metadata::stem_path,
    Catalog, MetadataReader,
};
use crate::model::Collection;

/// Keeps the [`Catalog`] in line with what is on disk.
///
/// Every change goes through [`Synchronizer::reconcile`], whether it comes
/// from the initial scan, a filesystem event or a manual rescan.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    catalog: Catalog,
    metadata: MetadataReader,
}

/// Keeps the filesystem watcher alive. Dropping it stops synchronization.
pub struct SyncHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Synchronizer {
    pub fn new(catalog: Catalog, metadata: MetadataReader) -> Self {
        Synchronizer { catalog, metadata }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Full scan of a registered collection. Returns the number of videos found.
    #[instrument(skip(self, collection), fields(path = %collection.path))]
    pub async fn import(&self, collection: &Collection) -> Result<usize> {
        let count = self.scan_dir(collection, &collection.path).await?;
        info!(count, "imported collection");
        Ok(count)
    }

    /// Brings the catalog entry affected by `path` up to date.
    ///
    /// `path` may be a video, a sidecar or derivative of one, or a directory.
    /// Paths outside every collection are ignored. On error the catalog keeps
    /// whatever it had before.
    #[instrument(skip(self), level = "debug")]
    pub async fn reconcile(&self, path: &Path) -> Result<()> {
        let Some(collection) = self.catalog.collection_for_path(path) else {
            debug!("path is not in any collection");
            return Ok(());
        };
        match classify(path) {
            FileKind::Video => self.reconcile_video(&collection, path).await,
            FileKind::Derivative { stem_path, .. }
            | FileKind::Metadata { stem_path }
            | FileKind::Thumbnail { stem_path } => match find_master(&stem_path).await {
                Some(master) => self.reconcile_video(&collection, &master).await,
                // the video may still be on its way
                None => Ok(()),
            },
            FileKind::Other => match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_dir() => self.scan_dir(&collection, path).await.map(|_| ()),
                Ok(_) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    let removed = self.catalog.remove_under(path);
                    if !removed.is_empty() {
                        info!(count = removed.len(), "removed videos of deleted directory");
                    }
                    Ok(())
                }
                Err(err) => Err(err).wrap_err(format!("could not stat {}", path)),
            },
        }
    }

    async fn reconcile_video(&self, collection: &Collection, path: &Path) -> Result<()> {
        let id = derive_video_id(collection, path)?;
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let video = self.metadata.read_video(id, path).await?;
                debug!(video_id = %video.id, "catalogued video");
                self.catalog.upsert(video);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // the entry may belong to a sibling with another extension
                if self.catalog.get(&id).is_some_and(|v| v.path.as_path() != path) {
                    return Ok(());
                }
                match find_master(&stem_path(path)).await {
                    Some(sibling) => {
                        let video = self.metadata.read_video(id, &sibling).await?;
                        debug!(video_id = %video.id, path = %sibling, "catalogued sibling video");
                        self.catalog.upsert(video);
                    }
                    None => {
                        if self.catalog.remove(&id).is_some() {
                            info!(video_id = %id, "removed video");
                        }
                    }
                }
                Ok(())
            }
            Err(err) => Err(err).wrap_err(format!("could not stat {}", path)),
        }
    }

    /// Reconciles every video below `dir` and drops entries below it whose
    /// file is gone.
    async fn scan_dir(&self, collection: &Collection, dir: &Path) -> Result<usize> {
        let walk_root = dir.to_owned();
        let paths = tokio::task::spawn_blocking(move || find_videos(&walk_root))
            .await
            .wrap_err("directory scan panicked")?;
        let mut found: HashSet<PathBuf> = HashSet::with_capacity(paths.len());
        for path in paths {
            match self.reconcile_video(collection, &path).await {
                Ok(()) => {
                    found.insert(path);
                }
                Err(err) => warn!(%path, "could not import video: {:#}", err),
            }
        }
        let stale: Vec<_> = self
            .catalog
            .playlist()
            .into_iter()
            .filter(|v| v.path.starts_with(dir) && !found.contains(&v.path))
            .collect();
        for video in stale {
            if !video.path.is_file() {
                self.catalog.remove(&video.id);
            }
        }
        Ok(found.len())
    }

    /// Starts reconciling on filesystem events below `roots`.
    pub fn watch(&self, roots: &[PathBuf]) -> Result<SyncHandle> {
        let (send, mut recv) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // receiver is gone when the sync task stopped
            let _ = send.send(res);
        })
        .wrap_err("could not create filesystem watcher")?;
        for root in roots {
            watcher
                .watch(root.as_std_path(), RecursiveMode::Recursive)
                .wrap_err(format!("could not watch {}", root))?;
            info!(%root, "watching collection");
        }
        let sync = self.clone();
        let task = tokio::spawn(
            async move {
                while let Some(res) = recv.recv().await {
                    match res {
                        Ok(event) => sync.handle_event(event).await,
                        Err(err) => warn!("filesystem watcher error: {}", err),
                    }
                }
            }
            .instrument(tracing::info_span!("catalog_sync")),
        );
        Ok(SyncHandle {
            _watcher: watcher,
            task,
        })
    }

    async fn handle_event(&self, event: notify::Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        for path in event.paths {
            let Ok(path) = PathBuf::from_path_buf(path) else {
                continue;
            };
            if let Err(err) = self.reconcile(&path).await {
                warn!(%path, "could not reconcile: {:#}", err);
            }
        }
    }
}

/// The video file `stem_path` names, preferring extensions in the order of
/// [`VIDEO_EXTENSIONS`]. Extensions match regardless of case.
async fn find_master(stem_path: &Path) -> Option<PathBuf> {
    let (dir, stem) = (stem_path.parent()?, stem_path.file_name()?);
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut best: Option<(usize, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(candidate) = PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if candidate.file_stem() != Some(stem) || classify(&candidate) != FileKind::Video {
            continue;
        }
        let Some(rank) = candidate.extension().and_then(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .position(|known| known.eq_ignore_ascii_case(ext))
        }) else {
            continue;
        };
        if best.as_ref().is_some_and(|(best_rank, _)| *best_rank <= rank) {
            continue;
        }
        if tokio::fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
            best = Some((rank, candidate));
        }
    }
    best.map(|(_, path)| path)
}

fn find_videos(root: &Path) -> Vec<PathBuf> {
    let mut videos = Vec::new();
    for entry in WalkDir::new(root.as_std_path()).follow_links(true) {
        match entry {
            Ok(e) if e.file_type().is_file() => {
                let Some(path) = Path::from_path(e.path()) else {
                    warn!(path = ?e.path(), "skipping non UTF-8 path");
                    continue;
                };
                if classify(path) == FileKind::Video {
                    videos.push(path.to_owned());
                }
            }
            Ok(_) => {}
            Err(err) => warn!("error scanning {}: {}", root, err),
        }
    }
    videos
}
