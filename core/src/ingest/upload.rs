use bytes::Bytes;
use camino::Utf8Path as Path;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use super::{error::BoxError, IngestError};

/// Name of the staged source inside the scratch directory. Keeps the
/// original extension so the encoder can guess the container.
pub fn staged_source_name(original_filename: Option<&str>) -> String {
    let ext = original_filename
        .and_then(|f| Path::new(f).extension())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("source.{}", ext.to_ascii_lowercase()),
        None => "source".to_owned(),
    }
}

/// Rejects a payload that announces more than `max` bytes.
pub fn check_size_hint(size_hint: Option<u64>, max: u64) -> Result<(), IngestError> {
    match size_hint {
        Some(size) if size > max => Err(IngestError::SizeExceeded { size, max }),
        _ => Ok(()),
    }
}

/// Writes `stream` to `dest`, giving up as soon as more than `max` bytes
/// arrived. Returns the number of bytes written.
#[instrument(skip(stream), level = "debug")]
pub async fn copy_capped<S, E>(stream: S, dest: &Path, max: u64) -> Result<u64, IngestError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(IngestError::Stage)?;
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| IngestError::Stage(std::io::Error::other(err.into())))?;
        written += chunk.len() as u64;
        if written > max {
            return Err(IngestError::SizeExceeded { size: written, max });
        }
        file.write_all(&chunk).await.map_err(IngestError::Stage)?;
    }
    file.flush().await.map_err(IngestError::Stage)?;
    Ok(written)
}

#[cfg(test)]
mod test {
    use camino::Utf8PathBuf as PathBuf;
    use claims::{assert_matches, assert_ok, assert_ok_eq};
    use pretty_assertions::assert_eq;

    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn source_name_keeps_simple_extensions() {
        assert_eq!(staged_source_name(Some("clip.MOV")), "source.mov");
        assert_eq!(staged_source_name(Some("clip")), "source");
        assert_eq!(staged_source_name(Some("clip.m$v")), "source");
        assert_eq!(staged_source_name(None), "source");
    }

    #[test]
    fn size_hint() {
        assert_ok!(check_size_hint(None, 10));
        assert_ok!(check_size_hint(Some(10), 10));
        assert_matches!(
            check_size_hint(Some(11), 10),
            Err(IngestError::SizeExceeded { size: 11, max: 10 })
        );
    }

    #[tokio::test]
    async fn copies_whole_stream() {
        let dir = tempfile::tempdir().unwrap();
        let dest = PathBuf::from_path_buf(dir.path().join("source.mp4")).unwrap();
        assert_ok_eq!(copy_capped(chunks(&[b"abc", b"defg"]), &dest, 7).await, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdefg");
    }

    #[tokio::test]
    async fn stops_when_cap_is_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let dest = PathBuf::from_path_buf(dir.path().join("source.mp4")).unwrap();
        assert_matches!(
            copy_capped(chunks(&[b"abc", b"defg"]), &dest, 5).await,
            Err(IngestError::SizeExceeded { size: 7, max: 5 })
        );
    }

    #[tokio::test]
    async fn stream_error_is_a_staging_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = PathBuf::from_path_buf(dir.path().join("source.mp4")).unwrap();
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::other("connection reset")),
        ]);
        assert_matches!(
            copy_capped(stream, &dest, 100).await,
            Err(IngestError::Stage(_))
        );
    }
}
