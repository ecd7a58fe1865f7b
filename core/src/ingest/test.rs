use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use claims::{assert_matches, assert_ok};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::processing::{
    encoder::EncodeMetadata,
    process::{ProcessError, StreamingProcess},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Transcode {
        input: PathBuf,
        metadata: EncodeMetadata,
    },
    Thumbnail {
        input: PathBuf,
        offset: Duration,
    },
    Scale {
        input: PathBuf,
        size: String,
    },
}

#[derive(Default)]
struct RecordingEncoder {
    calls: Mutex<Vec<Call>>,
    transcode_delay: Duration,
    transcode_times_out: bool,
    transcode_exit_code: Option<i32>,
    thumbnail_writes_nothing: bool,
    /// Puts a directory where the master is about to be published
    block_master_in: Option<PathBuf>,
    failing_sizes: Vec<String>,
}

fn calls_input(call: &Call) -> PathBuf {
    match call {
        Call::Transcode { input, .. } | Call::Thumbnail { input, .. } | Call::Scale { input, .. } => {
            input.clone()
        }
    }
}

impl RecordingEncoder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

fn failed(program: &str, code: i32) -> ProcessError {
    ProcessError::NonZeroExit {
        program: program.to_owned(),
        code,
        stderr_tail: "boom".to_owned(),
    }
}

#[async_trait]
impl MediaEncoder for RecordingEncoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        metadata: &EncodeMetadata,
        timeout: Duration,
    ) -> Result<(), ProcessError> {
        self.calls.lock().push(Call::Transcode {
            input: input.to_owned(),
            metadata: metadata.clone(),
        });
        if !self.transcode_delay.is_zero() {
            tokio::time::sleep(self.transcode_delay).await;
        }
        if self.transcode_times_out {
            return Err(ProcessError::Timeout {
                program: "ffmpeg".to_owned(),
                timeout,
            });
        }
        if let Some(code) = self.transcode_exit_code {
            return Err(failed("ffmpeg", code));
        }
        std::fs::write(output, b"master").unwrap();
        Ok(())
    }

    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        offset: Duration,
        _timeout: Duration,
    ) -> Result<(), ProcessError> {
        self.calls.lock().push(Call::Thumbnail {
            input: input.to_owned(),
            offset,
        });
        if !self.thumbnail_writes_nothing {
            std::fs::write(output, b"jpeg").unwrap();
        }
        if let Some(collection) = &self.block_master_in {
            let stem = output.file_stem().unwrap();
            let blocker = collection.join(format!("{stem}.mp4"));
            std::fs::create_dir(&blocker).unwrap();
            std::fs::write(blocker.join("keep"), b"").unwrap();
        }
        Ok(())
    }

    async fn scale(
        &self,
        input: &Path,
        output: &Path,
        size: &str,
        _metadata: &EncodeMetadata,
        _timeout: Duration,
    ) -> Result<(), ProcessError> {
        self.calls.lock().push(Call::Scale {
            input: input.to_owned(),
            size: size.to_owned(),
        });
        if self.failing_sizes.iter().any(|s| s == size) {
            return Err(failed("ffmpeg", 1));
        }
        std::fs::write(output, b"scaled").unwrap();
        Ok(())
    }

    fn stream_scaled(&self, _input: &Path, _size: &str) -> Result<StreamingProcess, ProcessError> {
        Err(ProcessError::Spawn {
            program: "ffmpeg".to_owned(),
            source: std::io::Error::other("not used here"),
        })
    }
}

struct FailingResolver;

#[async_trait]
impl VideoInfoResolver for FailingResolver {
    async fn resolve(&self, _url: &str) -> eyre::Result<VideoInfo> {
        Err(eyre::eyre!("site not supported"))
    }
}

struct Fixture {
    _collection_dir: tempfile::TempDir,
    _scratch_dir: tempfile::TempDir,
    collection: PathBuf,
    scratch: PathBuf,
    encoder: Arc<RecordingEncoder>,
    ingester: Ingester,
}

fn utf8_tempdir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
    (dir, path)
}

fn fixture_with(
    encoder: RecordingEncoder,
    preserve: bool,
    sizes: &[(&str, &str)],
    max_upload_size: u64,
) -> Fixture {
    let (collection_dir, collection) = utf8_tempdir();
    build_fixture(collection_dir, collection, encoder, preserve, |settings| {
        settings.max_upload_size = max_upload_size;
        settings.pipeline.sizes = sizes
            .iter()
            .map(|(size, suffix)| (size.to_string(), suffix.to_string()))
            .collect::<BTreeMap<_, _>>();
    })
}

fn build_fixture(
    collection_dir: tempfile::TempDir,
    collection: PathBuf,
    encoder: RecordingEncoder,
    preserve: bool,
    adjust: impl FnOnce(&mut IngestSettings),
) -> Fixture {
    let (scratch_dir, scratch) = utf8_tempdir();
    let catalog = Catalog::new();
    catalog
        .add_collection(Collection::new(collection.clone(), "", preserve))
        .unwrap();
    let encoder = Arc::new(encoder);
    let mut settings = IngestSettings {
        scratch_root: scratch.clone(),
        max_upload_size: 1024,
        ..Default::default()
    };
    adjust(&mut settings);
    let ingester = Ingester::new(
        catalog,
        encoder.clone(),
        Arc::new(FailingResolver),
        Downloader::default(),
        settings,
    );
    Fixture {
        _collection_dir: collection_dir,
        _scratch_dir: scratch_dir,
        collection,
        scratch,
        encoder,
        ingester,
    }
}

fn fixture() -> Fixture {
    fixture_with(RecordingEncoder::default(), false, &[], 1024)
}

fn payload(data: &'static [u8]) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    futures::stream::iter(vec![Ok(Bytes::from_static(data))])
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

impl Fixture {
    async fn upload(&self, filename: &str) -> Result<IngestReport, IngestError> {
        self.ingester
            .ingest_upload(
                payload(b"raw upload"),
                Some(filename),
                "Test",
                "Demo",
                &self.collection,
                None,
            )
            .await
    }
}

#[tokio::test]
async fn upload_publishes_thumbnail_then_master() {
    let f = fixture();
    let report = assert_ok!(f.upload("holiday.mov").await);

    let thumb = report.published[0].clone();
    let master = report.published[1].clone();
    assert_eq!(report.published.len(), 2);
    assert_eq!(thumb.extension(), Some("jpg"));
    assert_eq!(master.extension(), Some("mp4"));
    assert_eq!(thumb.file_stem(), master.file_stem());
    assert_eq!(master.parent(), Some(f.collection.as_path()));
    assert_eq!(report.master(), Some(master.as_path()));
    assert_eq!(std::fs::read(&master).unwrap(), b"master");
    assert_eq!(std::fs::read(&thumb).unwrap(), b"jpeg");
    // random basename, not the client's filename
    assert_ne!(report.basename, "holiday");
    assert!(report.derivatives.is_empty());

    let calls = f.encoder.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        Call::Transcode {
            input: calls_input(&calls[0]),
            metadata: EncodeMetadata {
                title: "Test".to_owned(),
                description: "Demo".to_owned(),
            },
        }
    );
    assert_eq!(calls_input(&calls[0]).file_name(), Some("source.mov"));
    assert_eq!(
        calls[1],
        Call::Thumbnail {
            input: calls_input(&calls[0]),
            offset: Duration::from_secs(3),
        }
    );
    assert_eq!(dir_entries(&f.collection).len(), 2);
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn same_filename_uploads_get_distinct_names() {
    let f = fixture();
    let first = assert_ok!(f.upload("clip.mp4").await);
    let second = assert_ok!(f.upload("clip.mp4").await);
    assert_ne!(first.basename, second.basename);
    assert_eq!(dir_entries(&f.collection).len(), 4);
}

#[tokio::test]
async fn preserved_filename_collision_gets_suffix() {
    let f = fixture_with(RecordingEncoder::default(), true, &[], 1024);
    let first = assert_ok!(f.upload("clip.mp4").await);
    let second = assert_ok!(f.upload("clip.mp4").await);
    assert_eq!(first.basename, "clip");
    assert!(second.basename.starts_with("clip_"));
    assert!(f.collection.join("clip.mp4").is_file());
    assert!(f.collection.join(format!("{}.mp4", second.basename)).is_file());
}

#[tokio::test]
async fn concurrent_preserved_uploads_get_distinct_names() {
    let encoder = RecordingEncoder {
        transcode_delay: Duration::from_millis(300),
        ..Default::default()
    };
    let (collection_dir, collection) = utf8_tempdir();
    let f = build_fixture(collection_dir, collection, encoder, true, |settings| {
        settings.workers = 2;
    });
    let (first, second) = tokio::join!(f.upload("clip.mp4"), f.upload("clip.mp4"));
    let first = assert_ok!(first);
    let second = assert_ok!(second);
    assert_ne!(first.basename, second.basename);
    let mut basenames = vec![first.basename.as_str(), second.basename.as_str()];
    basenames.sort();
    assert_eq!(basenames[0], "clip");
    assert!(basenames[1].starts_with("clip_"));
    assert_eq!(dir_entries(&f.collection).len(), 4);
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn unknown_collection_has_no_side_effects() {
    let f = fixture();
    let res = f
        .ingester
        .ingest_upload(
            payload(b"raw upload"),
            Some("a.mp4"),
            "Test",
            "Demo",
            Path::new("/does/not/exist"),
            None,
        )
        .await;
    assert_matches!(res, Err(IngestError::InvalidCollection(_)));
    assert!(f.encoder.calls().is_empty());
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn announced_size_over_limit_is_rejected_up_front() {
    let f = fixture();
    let res = f
        .ingester
        .ingest_upload(
            payload(b"raw upload"),
            Some("a.mp4"),
            "Test",
            "Demo",
            &f.collection,
            Some(4096),
        )
        .await;
    assert_matches!(res, Err(IngestError::SizeExceeded { size: 4096, max: 1024 }));
    assert!(f.encoder.calls().is_empty());
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn oversized_stream_is_cut_off() {
    let f = fixture_with(RecordingEncoder::default(), false, &[], 4);
    let res = f.upload("a.mp4").await;
    assert_matches!(res, Err(IngestError::SizeExceeded { .. }));
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn empty_upload_is_missing_payload() {
    let f = fixture();
    let res = f
        .ingester
        .ingest_upload(
            futures::stream::iter(Vec::<Result<Bytes, std::io::Error>>::new()),
            Some("a.mp4"),
            "Test",
            "Demo",
            &f.collection,
            None,
        )
        .await;
    assert_matches!(res, Err(IngestError::MissingPayload));
}

#[tokio::test]
async fn transcode_timeout_publishes_nothing() {
    let encoder = RecordingEncoder {
        transcode_times_out: true,
        ..Default::default()
    };
    let f = fixture_with(encoder, false, &[], 1024);
    let res = f.upload("a.mp4").await;
    let err = res.unwrap_err();
    assert!(matches!(err, IngestError::TranscodeTimeout(_)));
    assert_eq!(err.kind(), IngestErrorKind::Process);
    assert_eq!(f.encoder.calls().len(), 1);
    assert!(dir_entries(&f.collection).is_empty());
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn failed_transcode_reports_exit_code_and_publishes_nothing() {
    let encoder = RecordingEncoder {
        transcode_exit_code: Some(69),
        ..Default::default()
    };
    let f = fixture_with(encoder, false, &[], 1024);
    let err = f.upload("a.mp4").await.unwrap_err();
    assert_eq!(err.kind(), IngestErrorKind::Process);
    match err {
        IngestError::Process {
            stage: IngestStage::Transcoding,
            source: ProcessError::NonZeroExit { code, .. },
        } => assert_eq!(code, 69),
        other => panic!("unexpected error {other:?}"),
    }
    // no thumbnail is attempted after a failed transcode
    assert_eq!(f.encoder.calls().len(), 1);
    assert!(dir_entries(&f.collection).is_empty());
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn failed_master_rename_leaves_thumbnail_behind() {
    let (collection_dir, collection) = utf8_tempdir();
    let encoder = RecordingEncoder {
        block_master_in: Some(collection.clone()),
        ..Default::default()
    };
    let f = build_fixture(collection_dir, collection, encoder, true, |_| {});
    let err = f.upload("clip.mp4").await.unwrap_err();
    assert_eq!(err.kind(), IngestErrorKind::Publish);
    assert_matches!(&err, IngestError::PublishFailed { to, .. } if to.file_name() == Some("clip.mp4"));
    // not rolled back
    assert!(f.collection.join("clip.jpg").is_file());
    assert!(f.collection.join("clip.mp4").is_dir());
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn missing_thumbnail_output_fails_before_publishing() {
    let encoder = RecordingEncoder {
        thumbnail_writes_nothing: true,
        ..Default::default()
    };
    let f = fixture_with(encoder, false, &[], 1024);
    let res = f.upload("a.mp4").await;
    assert_matches!(
        res,
        Err(IngestError::MissingOutput {
            stage: IngestStage::Thumbnailing,
            ..
        })
    );
    assert!(dir_entries(&f.collection).is_empty());
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn failed_derivative_keeps_master_published() {
    let encoder = RecordingEncoder {
        failing_sizes: vec!["nhd".to_owned()],
        ..Default::default()
    };
    let f = fixture_with(encoder, false, &[("hd720", "720p"), ("nhd", "360p")], 1024);
    let report = assert_ok!(f.upload("a.mp4").await);
    let basename = &report.basename;
    assert_eq!(
        report.derivatives,
        vec![f.collection.join(format!("{basename}#720p.mp4"))]
    );
    assert_eq!(report.failed_derivatives, vec!["360p".to_owned()]);
    assert!(f.collection.join(format!("{basename}.mp4")).is_file());
    // derivatives are made from the staged upload, not from the master
    let scale_inputs: Vec<String> = f
        .encoder
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Scale { input, .. } => input.file_name().map(str::to_owned),
            _ => None,
        })
        .collect();
    assert_eq!(scale_inputs, vec!["source.mp4".to_owned(), "source.mp4".to_owned()]);
    assert!(dir_entries(&f.scratch).is_empty());
}

#[tokio::test]
async fn import_resolver_failure_is_reported() {
    let f = fixture();
    let res = f
        .ingester
        .ingest_import("https://videos.example.org/watch?v=1", None)
        .await;
    assert_matches!(res, Err(IngestError::Resolve { .. }));
    assert!(f.encoder.calls().is_empty());
}

#[tokio::test]
async fn import_into_unknown_collection() {
    let f = fixture();
    let res = f
        .ingester
        .ingest_import("https://videos.example.org/a.mp4", Some(Path::new("/nope")))
        .await;
    let err = res.unwrap_err();
    assert!(matches!(err, IngestError::InvalidCollection(_)));
    assert_eq!(err.kind(), IngestErrorKind::Validation);
}
