use async_trait::async_trait;
use camino::Utf8Path as Path;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use super::{upload::check_size_hint, IngestError};

/// What a resolver found out about a video page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoInfo {
    /// Direct link to the media file
    pub video_url: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
}

/// Turns a user supplied URL into something downloadable.
#[async_trait]
pub trait VideoInfoResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> eyre::Result<VideoInfo>;
}

/// Treats the URL as pointing at the media file itself.
#[derive(Debug, Clone, Default)]
pub struct DirectUrlResolver;

#[async_trait]
impl VideoInfoResolver for DirectUrlResolver {
    async fn resolve(&self, url: &str) -> eyre::Result<VideoInfo> {
        let parsed = reqwest::Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(eyre::eyre!("unsupported scheme {}", parsed.scheme()));
        }
        let title = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| Path::new(name).file_stem())
            .filter(|stem| !stem.is_empty())
            .unwrap_or("Imported video")
            .to_owned();
        Ok(VideoInfo {
            video_url: url.to_owned(),
            title,
            description: String::new(),
            thumbnail_url: None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(client: reqwest::Client) -> Self {
        Downloader { client }
    }

    /// Asks the server for the size of `url` without downloading it.
    #[instrument(skip(self), level = "debug")]
    pub async fn content_length(&self, url: &str) -> Result<Option<u64>, IngestError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| download_error(url, err))?;
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()))
    }

    /// Downloads `url` to `dest`, failing once more than `max` bytes came in.
    #[instrument(skip(self), level = "debug")]
    pub async fn download(&self, url: &str, dest: &Path, max: u64) -> Result<u64, IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| download_error(url, err))?;
        check_size_hint(response.content_length(), max)?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(IngestError::Stage)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| download_error(url, err))?;
            written += chunk.len() as u64;
            if written > max {
                return Err(IngestError::SizeExceeded { size: written, max });
            }
            file.write_all(&chunk).await.map_err(IngestError::Stage)?;
        }
        file.flush().await.map_err(IngestError::Stage)?;
        info!(bytes = written, "download finished");
        Ok(written)
    }
}

fn download_error(url: &str, err: reqwest::Error) -> IngestError {
    IngestError::Download {
        url: url.to_owned(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod test {
    use claims::{assert_err, assert_ok};
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn direct_resolver_uses_file_name_as_title() {
        let info = assert_ok!(
            DirectUrlResolver
                .resolve("https://media.example.org/files/summer-trip.mp4?dl=1")
                .await
        );
        assert_eq!(info.title, "summer-trip");
        assert_eq!(
            info.video_url,
            "https://media.example.org/files/summer-trip.mp4?dl=1"
        );
        assert_eq!(info.thumbnail_url, None);
    }

    #[tokio::test]
    async fn direct_resolver_without_file_name() {
        let info = assert_ok!(DirectUrlResolver.resolve("https://media.example.org/").await);
        assert_eq!(info.title, "Imported video");
    }

    #[tokio::test]
    async fn direct_resolver_rejects_other_schemes() {
        assert_err!(DirectUrlResolver.resolve("file:///etc/passwd").await);
        assert_err!(DirectUrlResolver.resolve("not a url").await);
    }
}
