use std::{collections::BTreeMap, time::Duration};

use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use eyre::{eyre, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TomlServer {
    address: Option<String>,
    port: Option<u16>,
    store_path: Option<String>,
    upload_path: Option<String>,
    max_upload_size: Option<String>,
    #[serde(default)]
    preserve_upload_filename: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TomlLibrary {
    path: String,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    preserve_upload_filename: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TomlTranscoder {
    timeout: Option<u64>,
    workers: Option<usize>,
    queue_size: Option<usize>,
    max_on_the_fly: Option<usize>,
    #[serde(rename = "Sizes", default)]
    sizes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TomlThumbnailer {
    timeout: Option<u64>,
    position_from_start: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TomlBinPaths {
    ffmpeg: Option<String>,
    ffprobe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TomlConfig {
    #[serde(rename = "Server")]
    server: Option<TomlServer>,
    #[serde(rename = "Library")]
    library: Vec<TomlLibrary>,
    #[serde(rename = "Transcoder")]
    transcoder: Option<TomlTranscoder>,
    #[serde(rename = "Thumbnailer")]
    thumbnailer: Option<TomlThumbnailer>,
    #[serde(rename = "BinPaths")]
    bin_paths: Option<TomlBinPaths>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// SQLite file backing the view counters
    pub store_path: PathBuf,
    /// Scratch root for in-flight ingestions. Must be on the same filesystem
    /// as the collections, publishing is a rename.
    pub upload_path: PathBuf,
    pub max_upload_size: u64,
    pub preserve_upload_filename: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    pub path: PathBuf,
    pub prefix: String,
    pub preserve_upload_filename: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderConfig {
    pub timeout: Duration,
    /// Pipelines running at the same time
    pub workers: usize,
    /// Pipelines allowed to wait for a worker before new ones are rejected
    pub queue_size: usize,
    /// Concurrent on the fly encodes
    pub max_on_the_fly: usize,
    /// ffmpeg frame size -> derivative filename suffix
    pub sizes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailerConfig {
    pub timeout: Duration,
    pub position_from_start: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BinPaths {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    pub library: Vec<LibraryConfig>,
    pub transcoder: TranscoderConfig,
    pub thumbnailer: ThumbnailerConfig,
    pub bin_paths: BinPaths,
}

const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

impl Default for TranscoderConfig {
    fn default() -> Self {
        TranscoderConfig {
            timeout: Duration::from_secs(300),
            workers: 1,
            queue_size: 8,
            max_on_the_fly: 2,
            sizes: BTreeMap::new(),
        }
    }
}

impl Default for ThumbnailerConfig {
    fn default() -> Self {
        ThumbnailerConfig {
            timeout: Duration::from_secs(60),
            position_from_start: Duration::from_secs(3),
        }
    }
}

pub async fn read_config(path: &Path) -> Result<Config> {
    let toml_str = tokio::fs::read_to_string(path)
        .await
        .wrap_err(format!("Error reading config file {}", path))?;
    // relative paths in the config file are relative to the file itself
    let base_dir = path.parent().unwrap_or(Path::new("."));
    parse_config(&toml_str, base_dir)
}

pub fn parse_config(toml_str: &str, base_dir: &Path) -> Result<Config> {
    let toml_config: TomlConfig = toml::from_str(toml_str).wrap_err("Error parsing config file")?;
    let resolve = |p: &str| -> PathBuf {
        let p = PathBuf::from(p);
        if p.is_absolute() {
            p
        } else {
            base_dir.join(p)
        }
    };
    let server = match toml_config.server {
        Some(s) => ServerConfig {
            address: s.address.unwrap_or_else(|| "127.0.0.1".to_owned()),
            port: s.port.unwrap_or(8000),
            store_path: resolve(s.store_path.as_deref().unwrap_or("tube.db")),
            upload_path: resolve(s.upload_path.as_deref().unwrap_or("uploads")),
            max_upload_size: s
                .max_upload_size
                .as_deref()
                .map(|size| {
                    parse_size::parse_size(size)
                        .wrap_err(format!("invalid max_upload_size '{}'", size))
                })
                .transpose()?
                .unwrap_or(DEFAULT_MAX_UPLOAD_SIZE),
            preserve_upload_filename: s.preserve_upload_filename,
        },
        None => ServerConfig {
            address: "127.0.0.1".to_owned(),
            port: 8000,
            store_path: resolve("tube.db"),
            upload_path: resolve("uploads"),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            preserve_upload_filename: false,
        },
    };
    if toml_config.library.is_empty() {
        return Err(eyre!("config must contain at least one [[Library]] entry"));
    }
    let library = toml_config
        .library
        .into_iter()
        .map(|l| LibraryConfig {
            path: resolve(&l.path),
            prefix: l.prefix,
            preserve_upload_filename: l.preserve_upload_filename,
        })
        .collect();
    let defaults = TranscoderConfig::default();
    let transcoder = match toml_config.transcoder {
        Some(t) => TranscoderConfig {
            timeout: t.timeout.map(Duration::from_secs).unwrap_or(defaults.timeout),
            workers: t.workers.unwrap_or(defaults.workers).max(1),
            queue_size: t.queue_size.unwrap_or(defaults.queue_size),
            max_on_the_fly: t.max_on_the_fly.unwrap_or(defaults.max_on_the_fly),
            sizes: t.sizes,
        },
        None => defaults,
    };
    let defaults = ThumbnailerConfig::default();
    let thumbnailer = match toml_config.thumbnailer {
        Some(t) => ThumbnailerConfig {
            timeout: t.timeout.map(Duration::from_secs).unwrap_or(defaults.timeout),
            position_from_start: t
                .position_from_start
                .map(Duration::from_secs)
                .unwrap_or(defaults.position_from_start),
        },
        None => defaults,
    };
    let bin_paths = toml_config
        .bin_paths
        .map(|bin_paths| BinPaths {
            ffmpeg: bin_paths.ffmpeg.map(PathBuf::from),
            ffprobe: bin_paths.ffprobe.map(PathBuf::from),
        })
        .unwrap_or_default();
    Ok(Config {
        server,
        library,
        transcoder,
        thumbnailer,
        bin_paths,
    })
}
