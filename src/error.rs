use std::path::PathBuf;

use thiserror::Error;

/// Failures the pipeline distinguishes from one another.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<MosaicError>()`
/// to recover the kind.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("cannot open source video {path}: {reason}")]
    SourceOpen { path: PathBuf, reason: String },

    #[error("cannot initialise encoder for {path}: {reason}")]
    EncoderInit { path: PathBuf, reason: String },

    #[error("encoder for {path} exited with failure: {reason}")]
    EncoderFailed { path: PathBuf, reason: String },

    #[error("grid size must be at least 1, got {0}")]
    InvalidGridSize(u32),

    #[error("{path} is also used as the {role}")]
    PathConflict { path: PathBuf, role: &'static str },
}
