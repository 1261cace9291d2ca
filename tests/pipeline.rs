use anyhow::Result;
use gridmosaic::media::FrameRate;
use gridmosaic::{
    process_video, run_sequence, transform_frame, AppConfig, AudioTool, FrameSink, FrameSource,
    MosaicError, Progress, ProgressPhase, StreamInfo, VideoBackend,
};
use image::{Rgb, RgbImage};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// In-memory decoder/encoder. Sources must exist on disk; their content is
/// ignored and replaced by `frames`.
struct MemoryBackend {
    info: StreamInfo,
    frames: Vec<RgbImage>,
    sink_fails: bool,
    /// Sinks accept this many frames, then reject every further one.
    accept_limit: Option<usize>,
    written: Rc<RefCell<Vec<RgbImage>>>,
}

impl MemoryBackend {
    fn new(width: u32, height: u32, frames: Vec<RgbImage>) -> Self {
        Self {
            info: StreamInfo {
                width,
                height,
                frame_rate: FrameRate { num: 25, den: 1 },
                frame_count: frames.len() as u64,
            },
            frames,
            sink_fails: false,
            accept_limit: None,
            written: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn written(&self) -> Vec<RgbImage> {
        self.written.borrow().clone()
    }
}

struct MemorySource {
    info: StreamInfo,
    frames: VecDeque<RgbImage>,
}

impl FrameSource for MemorySource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Option<RgbImage> {
        self.frames.pop_front()
    }
}

struct MemorySink {
    path: PathBuf,
    accept_limit: Option<usize>,
    written: Rc<RefCell<Vec<RgbImage>>>,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if self.accept_limit == Some(self.written.borrow().len()) {
            anyhow::bail!("broken pipe");
        }
        let mut bytes = fs::read(&self.path)?;
        bytes.extend_from_slice(frame.as_raw());
        fs::write(&self.path, bytes)?;
        self.written.borrow_mut().push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl VideoBackend for MemoryBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        if !path.exists() {
            return Err(MosaicError::SourceOpen {
                path: path.to_path_buf(),
                reason: "missing".into(),
            }
            .into());
        }
        Ok(Box::new(MemorySource {
            info: self.info.clone(),
            frames: self.frames.iter().cloned().collect(),
        }))
    }

    fn open_sink(&self, path: &Path, _info: &StreamInfo) -> Result<Box<dyn FrameSink>> {
        if self.sink_fails {
            return Err(MosaicError::EncoderInit {
                path: path.to_path_buf(),
                reason: "unsupported codec".into(),
            }
            .into());
        }
        fs::write(path, b"")?;
        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            accept_limit: self.accept_limit,
            written: Rc::clone(&self.written),
        }))
    }
}

/// Audio tool that fakes ffmpeg's file effects and records its calls.
struct FakeAudio {
    has_audio: bool,
    merge_ok: bool,
    calls: RefCell<Vec<String>>,
}

impl FakeAudio {
    fn new(has_audio: bool, merge_ok: bool) -> Self {
        Self {
            has_audio,
            merge_ok,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl AudioTool for FakeAudio {
    fn extract_audio(&self, _source: &Path, audio_out: &Path) -> bool {
        self.calls.borrow_mut().push("extract".into());
        if self.has_audio {
            fs::write(audio_out, b"aac").unwrap();
        } else {
            // ffmpeg can leave an empty file behind when there is no audio.
            fs::write(audio_out, b"").unwrap();
        }
        self.has_audio
    }

    fn merge_audio_video(&self, video: &Path, audio: &Path, output: &Path) -> bool {
        self.calls.borrow_mut().push(format!(
            "merge {} {}",
            video.file_name().unwrap().to_string_lossy(),
            audio.file_name().unwrap().to_string_lossy()
        ));
        assert!(video.exists(), "staging video must exist before merge");
        assert!(audio.exists(), "audio artifact must exist before merge");
        if self.merge_ok {
            fs::copy(video, output).unwrap();
        }
        self.merge_ok
    }
}

fn solid_frames(width: u32, height: u32, colors: &[[u8; 3]]) -> Vec<RgbImage> {
    colors
        .iter()
        .map(|c| RgbImage::from_pixel(width, height, Rgb(*c)))
        .collect()
}

struct Workspace {
    dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("video.mp4");
        fs::write(&input, b"source").unwrap();
        let output = dir.path().join("output.mp4");
        Self { dir, input, output }
    }

    fn staging_audio(&self) -> PathBuf {
        self.dir.path().join("temp_audio.aac")
    }

    fn staging_video(&self) -> PathBuf {
        self.dir.path().join("temp_video.mp4")
    }
}

#[test]
fn no_audio_writes_output_directly() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(48, 48, solid_frames(48, 48, &[[10, 10, 10], [240, 0, 0]]));
    let audio = FakeAudio::new(false, true);

    let report = process_video(&backend, &audio, &AppConfig::default(), &ws.input, &ws.output, |_| {}).unwrap();

    assert!(!report.has_audio);
    assert!(!report.audio_merged);
    assert_eq!(report.frames_written, 2);
    assert_eq!(fs::metadata(&ws.output).unwrap().len(), 2 * 48 * 48 * 3);
    assert_eq!(audio.calls(), vec!["extract"]);
    assert!(!ws.staging_audio().exists());
    assert!(!ws.staging_video().exists());
}

#[test]
fn audio_is_merged_and_staging_removed() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(96, 72, solid_frames(96, 72, &[[1, 2, 3]; 3]));
    let audio = FakeAudio::new(true, true);
    let config = AppConfig::default().with_grid_size(24);

    let report = process_video(&backend, &audio, &config, &ws.input, &ws.output, |_| {}).unwrap();

    assert!(report.has_audio);
    assert!(report.audio_merged);
    assert_eq!(report.frames_written, 3);
    assert_eq!(
        audio.calls(),
        vec!["extract", "merge temp_video.mp4 temp_audio.aac"]
    );
    assert_eq!(fs::metadata(&ws.output).unwrap().len(), 3 * 96 * 72 * 3);
    assert!(!ws.staging_audio().exists());
    assert!(!ws.staging_video().exists());
}

#[test]
fn failed_merge_keeps_staging_artifacts() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[50, 60, 70]]));
    let audio = FakeAudio::new(true, false);

    let report = process_video(&backend, &audio, &AppConfig::default(), &ws.input, &ws.output, |_| {}).unwrap();

    assert!(report.has_audio);
    assert!(!report.audio_merged);
    assert!(!ws.output.exists());
    assert!(ws.staging_audio().exists());
    assert!(ws.staging_video().exists());
}

#[test]
fn grid_larger_than_frame_height_produces_black_frames() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(64, 16, solid_frames(64, 16, &[[200, 100, 50]; 2]));
    let audio = FakeAudio::new(false, true);
    let config = AppConfig::default().with_grid_size(24);

    let report = process_video(&backend, &audio, &config, &ws.input, &ws.output, |_| {}).unwrap();

    assert_eq!(report.frames_written, 2);
    for frame in backend.written() {
        assert_eq!(frame.dimensions(), (64, 16));
        assert!(frame.pixels().all(|px| px == &Rgb([0, 0, 0])));
    }
}

#[test]
fn missing_source_produces_nothing() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(24, 24, Vec::new());
    let audio = FakeAudio::new(true, true);
    let missing = ws.dir.path().join("nope.mp4");

    let err = process_video(&backend, &audio, &AppConfig::default(), &missing, &ws.output, |_| {}).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MosaicError>(),
        Some(MosaicError::SourceOpen { .. })
    ));
    assert!(!ws.output.exists());
    assert!(!ws.staging_video().exists());
    assert!(!ws.staging_audio().exists());
    assert_eq!(audio.calls(), vec!["extract"]);
}

#[test]
fn encoder_init_failure_produces_nothing() {
    let ws = Workspace::new();
    let mut backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[9, 9, 9]]));
    backend.sink_fails = true;
    let audio = FakeAudio::new(false, true);

    let err = process_video(&backend, &audio, &AppConfig::default(), &ws.input, &ws.output, |_| {}).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MosaicError>(),
        Some(MosaicError::EncoderInit { .. })
    ));
    assert!(!ws.output.exists());
    assert!(backend.written().is_empty());
}

#[test]
fn frames_are_encoded_in_decode_order() {
    let ws = Workspace::new();
    let frames: Vec<RgbImage> = (0..5u32)
        .map(|i| RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, (i * 50) as u8])))
        .collect();
    let backend = MemoryBackend::new(40, 30, frames.clone());

    let stats = run_sequence(&backend, &ws.input, &ws.output, 5, |_, _| {}).unwrap();

    assert_eq!(stats.frames_written, 5);
    let expected: Vec<RgbImage> = frames.iter().map(|f| transform_frame(f, 5)).collect();
    assert_eq!(backend.written(), expected);
}

#[test]
fn short_stream_keeps_frames_already_encoded() {
    let ws = Workspace::new();
    let mut backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[1, 1, 1]; 2]));
    // The container claims more frames than the decoder delivers.
    backend.info.frame_count = 10;

    let seen = RefCell::new(Vec::new());
    let stats = run_sequence(&backend, &ws.input, &ws.output, 4, |done, total| {
        seen.borrow_mut().push((done, total))
    })
    .unwrap();

    assert_eq!(stats.frames_written, 2);
    assert_eq!(*seen.borrow(), vec![(1, 10), (2, 10)]);
    assert!(ws.output.exists());
}

#[test]
fn rejected_first_frame_is_an_init_failure() {
    let ws = Workspace::new();
    let mut backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[7, 7, 7]; 3]));
    backend.accept_limit = Some(0);

    let err = run_sequence(&backend, &ws.input, &ws.output, 4, |_, _| {}).unwrap_err();

    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::EncoderInit { reason, .. }) => assert!(reason.contains("broken pipe")),
        other => panic!("expected EncoderInit, got {:?}", other),
    }
    // The sink had already created the file; it must not survive.
    assert!(!ws.output.exists());
    assert!(backend.written().is_empty());
}

#[test]
fn encoder_breaking_mid_stream_keeps_accepted_frames() {
    let ws = Workspace::new();
    let mut backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[7, 7, 7]; 4]));
    backend.accept_limit = Some(2);
    let seen = RefCell::new(Vec::new());

    let stats = run_sequence(&backend, &ws.input, &ws.output, 4, |done, _| {
        seen.borrow_mut().push(done)
    })
    .unwrap();

    assert_eq!(stats.frames_written, 2);
    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert_eq!(fs::metadata(&ws.output).unwrap().len(), 2 * 24 * 24 * 3);
}

#[test]
fn long_stream_is_not_capped_at_reported_count() {
    let ws = Workspace::new();
    let mut backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[3, 3, 3]; 5]));
    // The container under-reports its frame count.
    backend.info.frame_count = 3;
    let seen = RefCell::new(Vec::new());

    let stats = run_sequence(&backend, &ws.input, &ws.output, 4, |done, total| {
        seen.borrow_mut().push((done, total))
    })
    .unwrap();

    assert_eq!(stats.frames_written, 5);
    assert_eq!(backend.written().len(), 5);
    assert_eq!(seen.borrow().last(), Some(&(5, 3)));
}

#[test]
fn input_named_like_staging_video_is_refused() {
    let ws = Workspace::new();
    let input = ws.staging_video();
    fs::write(&input, b"precious").unwrap();
    let backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[1, 1, 1]]));
    let audio = FakeAudio::new(true, true);

    let err = process_video(&backend, &audio, &AppConfig::default(), &input, &ws.output, |_| {}).unwrap_err();

    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::PathConflict { path, role }) => {
            assert_eq!(path, &input);
            assert_eq!(*role, "staging video file");
        }
        other => panic!("expected PathConflict, got {:?}", other),
    }
    assert_eq!(fs::read(&input).unwrap(), b"precious");
    assert!(audio.calls().is_empty());
    assert!(!ws.output.exists());
}

#[test]
fn output_on_staging_audio_or_input_is_refused() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[1, 1, 1]]));
    let audio = FakeAudio::new(true, true);

    for output in [ws.staging_audio(), ws.input.clone()] {
        let err = process_video(&backend, &audio, &AppConfig::default(), &ws.input, &output, |_| {}).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::PathConflict { .. })
        ));
    }
    assert!(audio.calls().is_empty());
    assert_eq!(fs::read(&ws.input).unwrap(), b"source");
}

#[test]
fn zero_grid_size_is_rejected_before_opening_anything() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[1, 1, 1]]));

    let err = run_sequence(&backend, &ws.input, &ws.output, 0, |_, _| {}).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MosaicError>(),
        Some(MosaicError::InvalidGridSize(0))
    ));
    assert!(!ws.output.exists());
}

#[test]
fn progress_phases_arrive_in_pipeline_order() {
    let ws = Workspace::new();
    let backend = MemoryBackend::new(24, 24, solid_frames(24, 24, &[[1, 1, 1]; 2]));
    let audio = FakeAudio::new(true, true);
    let phases = RefCell::new(Vec::new());

    process_video(&backend, &audio, &AppConfig::default(), &ws.input, &ws.output, |p: Progress| {
        phases.borrow_mut().push(p.phase)
    })
    .unwrap();

    assert_eq!(
        *phases.borrow(),
        vec![
            ProgressPhase::ExtractingAudio,
            ProgressPhase::ProcessingFrames,
            ProgressPhase::ProcessingFrames,
            ProgressPhase::MergingAudio,
            ProgressPhase::Complete,
        ]
    );
}
