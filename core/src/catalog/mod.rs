use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use parking_lot::RwLock;

use crate::model::{Collection, Video, VideoId};

pub mod id;
pub mod metadata;
pub mod sync;

pub use id::derive_video_id;
pub use metadata::MetadataReader;
pub use sync::{SyncHandle, Synchronizer};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("a collection with path {0} already exists")]
    DuplicatePath(PathBuf),
    #[error("a collection with prefix '{0}' already exists")]
    DuplicatePrefix(String),
    #[error("no collection with path {0}")]
    UnknownCollection(PathBuf),
    #[error("{path} is not inside collection {root}")]
    NotInCollection { path: PathBuf, root: PathBuf },
}

#[derive(Debug, Default)]
struct CatalogInner {
    collections: BTreeMap<PathBuf, Collection>,
    videos: HashMap<VideoId, Video>,
}

/// In-memory index of every video of every collection.
///
/// Cheap to clone, all clones share the same state. Entries are only ever
/// replaced whole under the write lock.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    inner: Arc<RwLock<CatalogInner>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection(&self, collection: Collection) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        if inner.collections.contains_key(&collection.path) {
            return Err(CatalogError::DuplicatePath(collection.path));
        }
        if inner
            .collections
            .values()
            .any(|c| c.prefix == collection.prefix)
        {
            return Err(CatalogError::DuplicatePrefix(collection.prefix));
        }
        tracing::info!(path = %collection.path, prefix = %collection.prefix, "added collection");
        inner
            .collections
            .insert(collection.path.clone(), collection);
        Ok(())
    }

    /// Unregisters a collection and drops all of its videos.
    pub fn remove_collection(&self, path: &Path) -> Result<Collection, CatalogError> {
        let mut inner = self.inner.write();
        let collection = inner
            .collections
            .remove(path)
            .ok_or_else(|| CatalogError::UnknownCollection(path.to_owned()))?;
        inner
            .videos
            .retain(|_, video| !video.path.starts_with(&collection.path));
        Ok(collection)
    }

    pub fn collection(&self, path: &Path) -> Option<Collection> {
        self.inner.read().collections.get(path).cloned()
    }

    /// All collections ordered by path.
    pub fn collections(&self) -> Vec<Collection> {
        self.inner.read().collections.values().cloned().collect()
    }

    /// The collection whose root contains `path`, the innermost one if roots are nested.
    pub fn collection_for_path(&self, path: &Path) -> Option<Collection> {
        self.inner
            .read()
            .collections
            .values()
            .filter(|c| path.starts_with(&c.path))
            .max_by_key(|c| c.path.as_str().len())
            .cloned()
    }

    pub fn get(&self, id: &VideoId) -> Option<Video> {
        self.inner.read().videos.get(id).cloned()
    }

    pub fn get_by_path(&self, path: &Path) -> Option<Video> {
        self.inner
            .read()
            .videos
            .values()
            .find(|v| v.path == path)
            .cloned()
    }

    /// Every catalogued video in no particular order, see
    /// [`crate::model::sort_playlist`].
    pub fn playlist(&self) -> Vec<Video> {
        self.inner.read().videos.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upsert(&self, video: Video) {
        self.inner.write().videos.insert(video.id.clone(), video);
    }

    pub fn remove(&self, id: &VideoId) -> Option<Video> {
        self.inner.write().videos.remove(id)
    }

    /// Removes every video whose file lives at or below `path`.
    pub fn remove_under(&self, path: &Path) -> Vec<VideoId> {
        let mut inner = self.inner.write();
        let ids: Vec<VideoId> = inner
            .videos
            .values()
            .filter(|v| v.path.starts_with(path))
            .map(|v| v.id.clone())
            .collect();
        for id in &ids {
            inner.videos.remove(id);
        }
        ids
    }
}
