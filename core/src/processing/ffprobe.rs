use std::time::Duration;

use camino::Utf8Path as Path;
use eyre::{Context, Result};
use serde::Deserialize;

use super::process::ProcessSpec;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Container level tags of a media file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatTags {
    pub title: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFProbeOutput {
    format: Option<FFProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFProbeFormat {
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

pub async fn probe_tags(path: &Path, ffprobe_bin: &Path) -> Result<FormatTags> {
    let stdout = ProcessSpec::new(ffprobe_bin, PROBE_TIMEOUT)
        .args(["-v", "error", "-show_entries", "format_tags", "-of", "json"])
        .arg(path)
        .run_capture()
        .await?;
    parse_format_tags(&stdout)
}

pub fn parse_format_tags(json: &[u8]) -> Result<FormatTags> {
    let output: FFProbeOutput =
        serde_json::from_slice(json).wrap_err("error parsing ffprobe output")?;
    let tags = output.format.map(|f| f.tags).unwrap_or_default();
    // tag key case depends on the muxer
    let get = |key: &str| {
        tags.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };
    Ok(FormatTags {
        title: get("title"),
        comment: get("comment").or_else(|| get("description")),
    })
}

#[cfg(test)]
mod test {
    use claims::assert_ok;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_title_and_comment() {
        let json = br#"{"format": {"tags": {"major_brand": "isom", "TITLE": "Test", "comment": "Demo "}}}"#;
        let tags = assert_ok!(parse_format_tags(json));
        assert_eq!(
            tags,
            FormatTags {
                title: Some("Test".into()),
                comment: Some("Demo".into()),
            }
        );
    }

    #[test]
    fn missing_tags_are_empty() {
        let tags = assert_ok!(parse_format_tags(br#"{"format": {}}"#));
        assert_eq!(tags, FormatTags::default());
        let tags = assert_ok!(parse_format_tags(br#"{}"#));
        assert_eq!(tags, FormatTags::default());
    }
}
