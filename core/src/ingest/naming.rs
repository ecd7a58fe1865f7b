use std::{collections::HashSet, sync::Arc};

use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};

use crate::catalog::id::DERIVATIVE_SEPARATOR;

const TOKEN_LEN: usize = 11;

pub fn short_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Stem of a client supplied filename that is safe to use as a file name in
/// a collection, `None` if nothing usable is left.
pub fn sanitize_stem(filename: &str) -> Option<String> {
    // clients may send a full path, with either separator
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = Path::new(name).file_stem().unwrap_or(name);
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_control() || c == DERIVATIVE_SEPARATOR || c == ':' {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_owned())
    }
}

/// The basename the published files start from, before collision handling.
pub fn desired_basename(original_filename: Option<&str>, preserve_filename: bool) -> String {
    if preserve_filename {
        if let Some(stem) = original_filename.and_then(sanitize_stem) {
            return stem;
        }
    }
    short_token()
}

/// Basenames of ingestions between name resolution and publishing, per
/// collection. Scratch directories are private, so concurrent ingestions
/// only see each other's names through this.
#[derive(Debug, Clone, Default)]
pub struct NameReservations {
    taken: Arc<Mutex<HashSet<PathBuf>>>,
}

/// A claimed `<collection>/<basename>.mp4`, released on drop.
#[derive(Debug)]
pub struct Reservation {
    master: PathBuf,
    basename: String,
    taken: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Reservation {
    pub fn basename(&self) -> &str {
        &self.basename
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.taken.lock().remove(&self.master);
    }
}

impl NameReservations {
    fn try_reserve(&self, collection: &Path, basename: &str) -> Option<Reservation> {
        let master = collection.join(format!("{basename}.mp4"));
        if !self.taken.lock().insert(master.clone()) {
            return None;
        }
        Some(Reservation {
            master,
            basename: basename.to_owned(),
            taken: self.taken.clone(),
        })
    }

    pub fn is_reserved(&self, collection: &Path, basename: &str) -> bool {
        self.taken
            .lock()
            .contains(&collection.join(format!("{basename}.mp4")))
    }
}

/// Claims a basename such that `<basename>.mp4` is neither in `collection`
/// nor reserved by another ingestion. Collisions get a fresh random suffix
/// until one is free.
pub async fn resolve_basename(
    desired: &str,
    collection: &Path,
    reservations: &NameReservations,
) -> std::io::Result<Reservation> {
    let mut candidate = desired.to_owned();
    loop {
        if let Some(reservation) = reservations.try_reserve(collection, &candidate) {
            let on_disk = tokio::fs::try_exists(collection.join(format!("{candidate}.mp4"))).await?;
            if !on_disk {
                return Ok(reservation);
            }
        }
        let next = format!("{desired}_{}", short_token());
        tracing::warn!(%candidate, %next, "name already taken, using another one");
        candidate = next;
    }
}
