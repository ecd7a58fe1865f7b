use std::{ffi::OsString, time::Duration};

use async_trait::async_trait;
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use tracing::instrument;

use crate::config::BinPaths;

use super::{
    encoder::{EncodeMetadata, MediaEncoder},
    process::{ProcessError, ProcessSpec, StdoutTarget, StreamingProcess},
};

/// Flags before and after `-i <input>`, the output path goes last.
struct FFmpegArgs {
    pre_input_flags: Vec<OsString>,
    flags: Vec<OsString>,
}

impl FFmpegArgs {
    fn new(pre_input_flags: Vec<OsString>, flags: Vec<OsString>) -> Self {
        FFmpegArgs {
            pre_input_flags,
            flags,
        }
    }

    fn spec(self, bin: &Path, input: &Path, output: &str, timeout: Duration) -> ProcessSpec {
        ProcessSpec::new(bin, timeout)
            .args(["-nostdin", "-y", "-loglevel", "error"])
            .args(self.pre_input_flags)
            .arg("-i")
            .arg(input)
            .args(self.flags)
            .arg(output)
    }
}

fn metadata_flags(metadata: &EncodeMetadata) -> Vec<OsString> {
    vec![
        "-metadata".into(),
        format!("title={}", metadata.title).into(),
        "-metadata".into(),
        format!("comment={}", metadata.description).into(),
    ]
}

fn h264_aac_flags() -> Vec<OsString> {
    ["-c:v", "libx264", "-c:a", "aac", "-pix_fmt", "yuv420p"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// Fragmented MP4 can be written to a pipe and played before it is complete.
const STREAM_FLAGS: &[&str] = &["-f", "mp4", "-movflags", "frag_keyframe+empty_moov"];

pub struct FFmpeg {
    bin: PathBuf,
}

impl FFmpeg {
    pub fn new(bin_paths: &BinPaths) -> Self {
        FFmpeg {
            bin: bin_paths
                .ffmpeg
                .clone()
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
        }
    }

    fn transcode_spec(
        &self,
        input: &Path,
        output: &Path,
        metadata: &EncodeMetadata,
        timeout: Duration,
    ) -> ProcessSpec {
        let mut flags = h264_aac_flags();
        flags.extend(["-movflags", "+faststart"].map(OsString::from));
        flags.extend(metadata_flags(metadata));
        FFmpegArgs::new(vec![], flags).spec(&self.bin, input, output.as_str(), timeout)
    }

    fn thumbnail_spec(
        &self,
        input: &Path,
        output: &Path,
        offset: Duration,
        timeout: Duration,
    ) -> ProcessSpec {
        let pre_input = vec!["-ss".into(), format!("{:.3}", offset.as_secs_f64()).into()];
        let flags = ["-vf", "thumbnail", "-frames:v", "1"]
            .map(OsString::from)
            .to_vec();
        FFmpegArgs::new(pre_input, flags).spec(&self.bin, input, output.as_str(), timeout)
    }

    fn scale_spec(
        &self,
        input: &Path,
        output: &str,
        size: &str,
        metadata: Option<&EncodeMetadata>,
        container_flags: &[&str],
        timeout: Duration,
    ) -> ProcessSpec {
        let mut flags: Vec<OsString> = vec!["-s".into(), size.into()];
        flags.extend(h264_aac_flags());
        flags.extend(["-crf", "18"].map(OsString::from));
        if let Some(metadata) = metadata {
            flags.extend(metadata_flags(metadata));
        }
        flags.extend(container_flags.iter().map(OsString::from));
        FFmpegArgs::new(vec![], flags).spec(&self.bin, input, output, timeout)
    }
}

#[async_trait]
impl MediaEncoder for FFmpeg {
    #[instrument(skip(self, metadata))]
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        metadata: &EncodeMetadata,
        timeout: Duration,
    ) -> Result<(), ProcessError> {
        self.transcode_spec(input, output, metadata, timeout)
            .run(StdoutTarget::Null)
            .await
    }

    #[instrument(skip(self))]
    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        offset: Duration,
        timeout: Duration,
    ) -> Result<(), ProcessError> {
        self.thumbnail_spec(input, output, offset, timeout)
            .run(StdoutTarget::Null)
            .await
    }

    #[instrument(skip(self, metadata))]
    async fn scale(
        &self,
        input: &Path,
        output: &Path,
        size: &str,
        metadata: &EncodeMetadata,
        timeout: Duration,
    ) -> Result<(), ProcessError> {
        self.scale_spec(input, output.as_str(), size, Some(metadata), &[], timeout)
            .run(StdoutTarget::Null)
            .await
    }

    fn stream_scaled(&self, input: &Path, size: &str) -> Result<StreamingProcess, ProcessError> {
        // no wall clock budget here, the request owns the process
        self.scale_spec(input, "pipe:1", size, None, STREAM_FLAGS, Duration::MAX)
            .spawn_streaming()
    }
}
