//! Audio track extraction and re-attachment around the frame pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as ProcCommand;

use crate::config::AppConfig;

/// External audio operations. Both report only success or failure.
pub trait AudioTool {
    /// Copy the audio stream of `source` into `audio_out` without re-encoding.
    fn extract_audio(&self, source: &Path, audio_out: &Path) -> bool;

    /// Combine the video stream of `video` with the audio of `audio` into
    /// `output`, copying video and re-encoding audio.
    fn merge_audio_video(&self, video: &Path, audio: &Path, output: &Path) -> bool;
}

pub fn extract_args(input: &Path, audio_out: &Path) -> Vec<String> {
    vec![
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vn".into(),
        "-acodec".into(),
        "copy".into(),
        "-y".into(),
        audio_out.to_string_lossy().into_owned(),
    ]
}

pub fn merge_args(video: &Path, audio: &Path, output: &Path, audio_codec: &str) -> Vec<String> {
    vec![
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-i".into(),
        audio.to_string_lossy().into_owned(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        audio_codec.to_string(),
        "-strict".into(),
        "experimental".into(),
        "-y".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// [`AudioTool`] shelling out to ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegAudioTool {
    pub ffmpeg: String,
    pub audio_codec: String,
}

impl FfmpegAudioTool {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            audio_codec: config.audio_codec.clone(),
        }
    }

    fn run(&self, args: &[String]) -> bool {
        tracing::debug!(cmd = %self.ffmpeg, ?args, "running audio tool");
        match ProcCommand::new(&self.ffmpeg).args(args).output() {
            Ok(output) => {
                if !output.status.success() {
                    tracing::debug!(
                        status = %output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "audio tool failed"
                    );
                }
                output.status.success()
            }
            Err(e) => {
                tracing::debug!(error = %e, "could not launch audio tool");
                false
            }
        }
    }
}

impl AudioTool for FfmpegAudioTool {
    fn extract_audio(&self, source: &Path, audio_out: &Path) -> bool {
        self.run(&extract_args(source, audio_out))
    }

    fn merge_audio_video(&self, video: &Path, audio: &Path, output: &Path) -> bool {
        self.run(&merge_args(video, audio, output, &self.audio_codec))
    }
}

/// Owns the two staging artifacts of one pipeline run: the extracted audio
/// track and the video-only encode.
pub struct AudioSidecar<'a> {
    tool: &'a dyn AudioTool,
    audio_path: PathBuf,
    video_path: PathBuf,
}

impl<'a> AudioSidecar<'a> {
    pub fn new(tool: &'a dyn AudioTool, audio_path: PathBuf, video_path: PathBuf) -> Self {
        Self {
            tool,
            audio_path,
            video_path,
        }
    }

    /// Staging artifacts placed in `staging_dir` under the configured names.
    pub fn in_dir(tool: &'a dyn AudioTool, staging_dir: &Path, config: &AppConfig) -> Self {
        Self::new(
            tool,
            staging_dir.join(&config.temp_audio_name),
            staging_dir.join(&config.temp_video_name),
        )
    }

    pub fn audio_path(&self) -> &Path {
        &self.audio_path
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    /// Extract the audio of `source`. `false` means "no audio"; anything the
    /// tool left behind is removed.
    pub fn extract(&self, source: &Path) -> bool {
        let has_audio = self.tool.extract_audio(source, &self.audio_path);
        if has_audio {
            tracing::info!(audio = %self.audio_path.display(), "audio track extracted");
        } else {
            tracing::info!(source = %source.display(), "no audio track, continuing without");
            remove_quietly(&self.audio_path);
        }
        has_audio
    }

    /// Merge the staged video and audio into `destination`. Staging files are
    /// deleted only when the merge succeeds.
    pub fn merge(&self, destination: &Path) -> bool {
        let merged = self
            .tool
            .merge_audio_video(&self.video_path, &self.audio_path, destination);
        if merged {
            tracing::info!(destination = %destination.display(), "audio merged");
            self.cleanup();
        } else {
            tracing::warn!(
                audio = %self.audio_path.display(),
                video = %self.video_path.display(),
                "audio merge failed, keeping staging files"
            );
        }
        merged
    }

    /// Remove the extracted audio when no merge will follow.
    pub fn discard_audio(&self) {
        remove_quietly(&self.audio_path);
    }

    /// Best-effort removal of both staging artifacts.
    pub fn cleanup(&self) {
        remove_quietly(&self.video_path);
        remove_quietly(&self.audio_path);
    }
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %e, "ignoring cleanup failure");
        }
    }
}
