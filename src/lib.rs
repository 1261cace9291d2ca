//! # gridmosaic - Grid Mosaic Video Filter
//!
//! `gridmosaic` rebuilds every frame of a video as a grid of tiny copies of
//! itself. Each cell shows the whole frame shrunk to cell size, either as-is
//! or color-inverted, whichever reproduces the cell's original pixels better.
//!
//! ## Features
//!
//! - Transform single frames or still images in memory
//! - Transform whole videos, keeping the original audio track
//! - Configurable grid size and ffmpeg tooling
//! - Progress reporting for integration with UI applications
//!
//! ## Example
//!
//! ```no_run
//! use gridmosaic::MosaicConverter;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = MosaicConverter::new();
//! let report = converter.convert_video(Path::new("video.mp4"), Path::new("output.mp4"))?;
//! println!("{} frames, audio: {}", report.frames_written, report.has_audio);
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress Reporting
//!
//! ```no_run
//! use gridmosaic::{MosaicConverter, ProgressPhase};
//! use std::path::Path;
//!
//! let converter = MosaicConverter::new();
//! converter.convert_video_with_progress(
//!     Path::new("video.mp4"),
//!     Path::new("output.mp4"),
//!     |progress| {
//!         match progress.phase {
//!             ProgressPhase::ExtractingAudio => println!("Extracting audio..."),
//!             ProgressPhase::ProcessingFrames => {
//!                 println!("Processing: {}/{} ({:.1}%)",
//!                     progress.completed, progress.total, progress.percentage);
//!             }
//!             ProgressPhase::MergingAudio => println!("Merging audio..."),
//!             ProgressPhase::Complete => println!("Done!"),
//!         }
//!     },
//! ).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod sequencer;
pub mod sidecar;
pub mod transform;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use config::{load_config, AppConfig, FailurePolicy};
pub use error::MosaicError;
pub use media::{FfmpegBackend, FrameSink, FrameSource, StreamInfo, VideoBackend};
pub use pipeline::{process_video, PipelineReport};
pub use sequencer::{run_sequence, SequenceStats};
pub use sidecar::{AudioSidecar, AudioTool, FfmpegAudioTool};
pub use transform::{transform_frame, CellFill, CellGrid, FramePlan};

/// Represents the current phase of a conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Copying the audio track out of the source
    ExtractingAudio,
    /// Decoding, transforming and encoding frames
    ProcessingFrames,
    /// Re-attaching the audio track to the transformed video
    MergingAudio,
    /// Conversion finished
    Complete,
}

/// Progress information for conversion operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// Current phase of the conversion
    pub phase: ProgressPhase,
    /// Number of items completed in the current phase
    pub completed: u64,
    /// Total number of items in the current phase (0 if unknown)
    pub total: u64,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    /// Human-readable message describing current status
    pub message: String,
}

impl Progress {
    pub fn extracting_audio() -> Self {
        Self {
            phase: ProgressPhase::ExtractingAudio,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: "Extracting audio from video...".to_string(),
        }
    }

    pub fn processing_frames(completed: u64, total: u64) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            phase: ProgressPhase::ProcessingFrames,
            completed,
            total,
            percentage,
            message: format!("Processing frame {} of {}", completed, total),
        }
    }

    pub fn merging_audio() -> Self {
        Self {
            phase: ProgressPhase::MergingAudio,
            completed: 0,
            total: 0,
            percentage: 100.0,
            message: "Merging audio into output...".to_string(),
        }
    }

    pub fn complete(total_frames: u64) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: total_frames,
            total: total_frames,
            percentage: 100.0,
            message: format!("Conversion complete: {} frames", total_frames),
        }
    }
}

/// Main entry point for mosaic conversion
pub struct MosaicConverter {
    config: AppConfig,
}

impl MosaicConverter {
    /// Create a converter with the built-in defaults
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Create a converter with custom configuration
    pub fn with_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Load configuration from a JSON or TOML file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: AppConfig::from_file(path)?,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Transform one frame with the configured grid size
    pub fn transform(&self, frame: &image::RgbImage) -> image::RgbImage {
        transform_frame(frame, self.config.grid_size)
    }

    /// Transform a still image (PNG, JPG) and save the result
    ///
    /// # Example
    ///
    /// ```no_run
    /// use gridmosaic::MosaicConverter;
    /// use std::path::Path;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// MosaicConverter::new().convert_image(Path::new("in.png"), Path::new("out.png"))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn convert_image(&self, input: &Path, output: &Path) -> Result<()> {
        let frame = image::open(input)
            .with_context(|| format!("opening {}", input.display()))?
            .to_rgb8();
        let grid = CellGrid::new(frame.width(), frame.height(), self.config.grid_size);
        if grid.is_degenerate() {
            tracing::warn!(grid_size = self.config.grid_size, "grid size exceeds image dimensions");
        }
        self.transform(&frame)
            .save(output)
            .with_context(|| format!("writing {}", output.display()))?;
        Ok(())
    }

    /// Transform a video, keeping its audio track when it has one
    pub fn convert_video(&self, input: &Path, output: &Path) -> Result<PipelineReport> {
        self.convert_video_with_progress(input, output, |_| {})
    }

    /// Transform a video with detailed progress reporting
    pub fn convert_video_with_progress<F>(&self, input: &Path, output: &Path, progress_callback: F) -> Result<PipelineReport>
    where
        F: Fn(Progress),
    {
        let backend = FfmpegBackend::from_config(&self.config);
        let audio = FfmpegAudioTool::from_config(&self.config);
        process_video(&backend, &audio, &self.config, input, output, progress_callback)
    }
}

impl Default for MosaicConverter {
    fn default() -> Self {
        Self::new()
    }
}
