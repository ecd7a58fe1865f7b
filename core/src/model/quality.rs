use std::str::FromStr;

use strum::{AsRefStr, Display, EnumString};

/// Playback quality variants a client may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum Quality {
    #[strum(serialize = "720p")]
    P720,
    #[strum(serialize = "480p")]
    P480,
    #[strum(serialize = "360p")]
    P360,
    #[strum(serialize = "240p")]
    P240,
}

impl Quality {
    /// ffmpeg frame size used when no configured profile produces this suffix.
    pub fn default_size(self) -> &'static str {
        match self {
            Quality::P720 => "hd720",
            Quality::P480 => "hd480",
            Quality::P360 => "nhd",
            Quality::P240 => "film",
        }
    }

    /// Parses a `quality` query value. Empty means the master, unknown values
    /// are logged and also fall back to the master.
    pub fn from_query(value: &str) -> Option<Quality> {
        let value = value.trim().to_ascii_lowercase();
        if value.is_empty() {
            return None;
        }
        match Quality::from_str(&value) {
            Ok(q) => Some(q),
            Err(_) => {
                tracing::warn!(quality = %value, "invalid quality");
                None
            }
        }
    }
}
