use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::MosaicError;

/// What the binary does when the pipeline fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log at debug level and exit successfully without an output file.
    #[default]
    Silent,
    /// Print the error chain and exit with a failure status.
    Report,
}

fn default_grid_size() -> u32 {
    24
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_video_codec() -> String {
    "mpeg4".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_temp_audio_name() -> String {
    "temp_audio.aac".to_string()
}

fn default_temp_video_name() -> String {
    "temp_video.mp4".to_string()
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cells per axis
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    /// ffmpeg executable used for decode, encode and the audio sidecar
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// ffprobe executable used to read stream properties
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    /// ffmpeg encoder name for the transformed video stream
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// ffmpeg encoder name for the re-attached audio stream
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// File name of the extracted audio staging artifact
    #[serde(default = "default_temp_audio_name")]
    pub temp_audio_name: String,
    /// File name of the video-only staging artifact
    #[serde(default = "default_temp_video_name")]
    pub temp_video_name: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            temp_audio_name: default_temp_audio_name(),
            temp_video_name: default_temp_video_name(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl AppConfig {
    /// Parse a config document, picking JSON or TOML by the file extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)
                .with_context(|| format!("parsing config toml {}", path.display()))?,
            _ => serde_json::from_str(&text)
                .with_context(|| format!("parsing config json {}", path.display()))?,
        };
        cfg.validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 {
            return Err(MosaicError::InvalidGridSize(self.grid_size).into());
        }
        if self.ffmpeg.trim().is_empty() || self.ffprobe.trim().is_empty() {
            return Err(anyhow!("ffmpeg and ffprobe commands cannot be empty"));
        }
        if self.video_codec.trim().is_empty() || self.audio_codec.trim().is_empty() {
            return Err(anyhow!("video_codec and audio_codec cannot be empty"));
        }
        if self.temp_audio_name.trim().is_empty() || self.temp_video_name.trim().is_empty() {
            return Err(anyhow!("temporary artifact names cannot be empty"));
        }
        if self.temp_audio_name == self.temp_video_name {
            return Err(anyhow!(
                "temp_audio_name and temp_video_name must differ (both are '{}')",
                self.temp_audio_name
            ));
        }
        Ok(())
    }

    pub fn with_grid_size(mut self, grid_size: u32) -> Self {
        self.grid_size = grid_size;
        self
    }

    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Candidate config locations in lookup order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::data_dir() {
        d.push("gridmosaic");
        d.push("gridmosaic.json");
        tried.push(d);
    }
    tried.push(PathBuf::from("gridmosaic.json"));
    tried.push(PathBuf::from("gridmosaic.toml"));
    tried
}

/// Load the first config found on the search path, or the built-in default.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::from_file(path);
    }

    for p in config_search_paths() {
        if p.exists() {
            tracing::debug!(path = %p.display(), "loading config");
            return AppConfig::from_file(&p);
        }
    }

    Ok(AppConfig::default())
}
