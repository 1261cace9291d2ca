//! Video decode and encode through ffmpeg subprocesses.
//!
//! Frames travel as raw `rgb24` over pipes: one ffmpeg decodes the source to
//! stdout, another reads frames on stdin and encodes them to the destination.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command as ProcCommand, Stdio};

use crate::config::AppConfig;
use crate::error::MosaicError;

/// Frame rate as the container reports it, e.g. `30000/1001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let (num, den) = match s.split_once('/') {
            Some((n, d)) => (n.trim().parse().ok()?, d.trim().parse().ok()?),
            None => (s.trim().parse().ok()?, 1),
        };
        if num == 0 || den == 0 {
            return None;
        }
        Some(Self { num, den })
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Properties of the source video stream, known before the first frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Frame count reported by the container, 0 when unknown.
    pub frame_count: u64,
}

impl StreamInfo {
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// A source of decoded frames in presentation order.
pub trait FrameSource {
    fn info(&self) -> &StreamInfo;

    /// The next frame, or `None` once decoding stops for any reason.
    fn read_frame(&mut self) -> Option<RgbImage>;
}

/// An encoder accepting frames of one fixed size.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the encoder, finalising the output file.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens decoders and encoders for file paths.
pub trait VideoBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn open_sink(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSink>>;
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Parse `ffprobe -of json` output for the first video stream.
pub fn parse_probe_json(text: &str) -> Result<StreamInfo> {
    let probe: ProbeOutput = serde_json::from_str(text).context("parsing ffprobe json")?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no video stream found"))?;

    let width = stream.width.filter(|w| *w > 0).ok_or_else(|| anyhow!("missing width"))?;
    let height = stream.height.filter(|h| *h > 0).ok_or_else(|| anyhow!("missing height"))?;
    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(FrameRate::parse)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(FrameRate::parse))
        .ok_or_else(|| anyhow!("missing frame rate"))?;
    // Some containers report "N/A".
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    Ok(StreamInfo {
        width,
        height,
        frame_rate,
        frame_count,
    })
}

/// Read width, height, frame rate and frame count with ffprobe.
pub fn probe_video(ffprobe: &str, path: &Path) -> Result<StreamInfo> {
    let output = ProcCommand::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .with_context(|| format!("running {}", ffprobe))?;

    if !output.status.success() {
        return Err(anyhow!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    parse_probe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Arguments for decoding the first video stream of `input` to raw rgb24.
///
/// Autorotation stays off so decoded frames keep the probed width and height.
pub fn decoder_args(input: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-noautorotate".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-map".into(),
        "0:v:0".into(),
        "-an".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "pipe:1".into(),
    ]
}

pub fn encoder_args(output: &Path, info: &StreamInfo, video_codec: &str) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{}x{}", info.width, info.height),
        "-r".into(),
        info.frame_rate.to_string(),
        "-i".into(),
        "pipe:0".into(),
        "-an".into(),
        "-c:v".into(),
        video_codec.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Decoder reading raw frames from an ffmpeg child process.
pub struct FfmpegDecoder {
    info: StreamInfo,
    child: Child,
    reader: BufReader<ChildStdout>,
    buf: Vec<u8>,
}

impl FrameSource for FfmpegDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Option<RgbImage> {
        match self.reader.read_exact(&mut self.buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return None,
            Err(e) => {
                tracing::debug!(error = %e, "decoder read failed, ending stream");
                return None;
            }
        }
        RgbImage::from_raw(self.info.width, self.info.height, self.buf.clone())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        // The decoder may still be running if the loop ended early.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Encoder writing raw frames into an ffmpeg child process.
pub struct FfmpegEncoder {
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    frames_sent: u64,
}

impl FfmpegEncoder {
    /// Close the pipe, reap the child and describe why it refused to start.
    fn init_failure(&mut self, cause: io::Error) -> anyhow::Error {
        self.stdin.take();
        let stderr = self
            .child
            .take()
            .and_then(|child| child.wait_with_output().ok())
            .map(|out| String::from_utf8_lossy(&out.stderr).trim().to_string())
            .unwrap_or_default();
        let reason = if stderr.is_empty() {
            cause.to_string()
        } else {
            stderr
        };
        MosaicError::EncoderInit {
            path: self.path.clone(),
            reason,
        }
        .into()
    }

    fn produced_output(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }
}

impl FrameSink for FfmpegEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder already closed"))?;
        let mut sent = stdin.write_all(frame.as_raw());
        if self.frames_sent == 0 {
            // Small frames fit in the buffer; push the first one through now.
            sent = sent.and_then(|()| stdin.flush());
        }

        match sent {
            Ok(()) => {
                self.frames_sent += 1;
                Ok(())
            }
            Err(e) if self.frames_sent == 0 => Err(self.init_failure(e)),
            Err(e) => Err(e)
                .with_context(|| format!("writing frame to encoder for {}", self.path.display())),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            // A broken pipe here surfaces through the exit status below.
            let _ = stdin.flush();
        }
        let child = self
            .child
            .take()
            .ok_or_else(|| anyhow!("encoder already finished"))?;
        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for encoder of {}", self.path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(stderr = %stderr.trim(), status = %output.status, "encoder stderr");
            let reason = stderr.trim().to_string();
            let path = self.path.clone();
            // Frames sitting in the pipe are not frames the encoder accepted.
            let err = if self.frames_sent == 0 || !self.produced_output() {
                MosaicError::EncoderInit { path, reason }
            } else {
                MosaicError::EncoderFailed { path, reason }
            };
            return Err(err.into());
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

/// [`VideoBackend`] driving the ffmpeg and ffprobe executables.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub video_codec: String,
}

impl FfmpegBackend {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            video_codec: config.video_codec.clone(),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl VideoBackend for FfmpegBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let source_err = |reason: String| MosaicError::SourceOpen {
            path: path.to_path_buf(),
            reason,
        };
        if !path.is_file() {
            return Err(source_err("file does not exist".into()).into());
        }

        let info = probe_video(&self.ffprobe, path).map_err(|e| source_err(format!("{:#}", e)))?;
        tracing::info!(
            width = info.width,
            height = info.height,
            fps = %info.frame_rate,
            frames = info.frame_count,
            "probed source"
        );

        let args = decoder_args(path);
        tracing::debug!(cmd = %self.ffmpeg, ?args, "spawning decoder");
        let mut child = ProcCommand::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| source_err(format!("spawning {}: {}", self.ffmpeg, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| source_err("decoder stdout unavailable".into()))?;

        let buf = vec![0u8; info.frame_bytes()];
        Ok(Box::new(FfmpegDecoder {
            info,
            child,
            reader: BufReader::new(stdout),
            buf,
        }))
    }

    fn open_sink(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSink>> {
        let init_err = |reason: String| MosaicError::EncoderInit {
            path: path.to_path_buf(),
            reason,
        };

        let args = encoder_args(path, info, &self.video_codec);
        tracing::debug!(cmd = %self.ffmpeg, ?args, "spawning encoder");
        let mut child = ProcCommand::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| init_err(format!("spawning {}: {}", self.ffmpeg, e)))?;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(init_err(format!("encoder exited immediately with {}", status)).into());
        }
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| init_err("encoder stdin unavailable".into()))?;

        Ok(Box::new(FfmpegEncoder {
            path: path.to_path_buf(),
            child: Some(child),
            stdin: Some(BufWriter::new(stdin)),
            frames_sent: 0,
        }))
    }
}
