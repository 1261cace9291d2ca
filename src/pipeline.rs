use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::error::MosaicError;
use crate::media::{StreamInfo, VideoBackend};
use crate::sequencer::run_sequence;
use crate::sidecar::{AudioSidecar, AudioTool};
use crate::Progress;

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub output: PathBuf,
    pub info: StreamInfo,
    pub frames_written: u64,
    /// An audio track was extracted from the source.
    pub has_audio: bool,
    /// The audio merge ran and succeeded. Always false without audio.
    pub audio_merged: bool,
}

/// Directory that receives staging artifacts for `output`.
pub fn staging_dir(output: &Path) -> PathBuf {
    match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Absolute form of `path` for comparison. The file itself may not exist yet.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (staging_dir(path).canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

/// Refuse runs where the input or output would be overwritten by another
/// file of the same run.
fn check_paths(input: &Path, output: &Path, sidecar: &AudioSidecar<'_>) -> Result<()> {
    let conflict = |path: &Path, role: &'static str| -> anyhow::Error {
        MosaicError::PathConflict {
            path: path.to_path_buf(),
            role,
        }
        .into()
    };

    let input_at = resolved(input);
    let output_at = resolved(output);
    if input_at == output_at {
        return Err(conflict(output, "input video"));
    }
    for (staging, role) in [
        (sidecar.audio_path(), "staging audio file"),
        (sidecar.video_path(), "staging video file"),
    ] {
        let staging_at = resolved(staging);
        if staging_at == input_at {
            return Err(conflict(input, role));
        }
        if staging_at == output_at {
            return Err(conflict(output, role));
        }
    }
    Ok(())
}

/// Run extract, transform and merge for one video.
///
/// With audio, frames are encoded to the staging video and merged with the
/// extracted track into `output`. Without audio they are encoded straight to
/// `output` and no merge runs. A failed merge is not an error: the report
/// says so and the staging files are left in place.
///
/// Errors come from the frame pipeline (source or encoder could not be
/// opened, or the encoder failed), or from a [`MosaicError::PathConflict`]
/// raised before anything is touched; in either case `output` is not produced.
pub fn process_video<F>(
    backend: &dyn VideoBackend,
    audio_tool: &dyn AudioTool,
    config: &AppConfig,
    input: &Path,
    output: &Path,
    progress: F,
) -> Result<PipelineReport>
where
    F: Fn(Progress),
{
    config.validate()?;

    let staging = staging_dir(output);
    let sidecar = AudioSidecar::in_dir(audio_tool, &staging, config);
    check_paths(input, output, &sidecar)?;

    progress(Progress::extracting_audio());
    let has_audio = sidecar.extract(input);
    let encode_target = if has_audio {
        sidecar.video_path()
    } else {
        output
    };

    let stats = match run_sequence(backend, input, encode_target, config.grid_size, |done, total| {
        progress(Progress::processing_frames(done, total))
    }) {
        Ok(stats) => stats,
        Err(e) => {
            if has_audio {
                sidecar.discard_audio();
            }
            return Err(e);
        }
    };

    let audio_merged = if has_audio {
        progress(Progress::merging_audio());
        sidecar.merge(output)
    } else {
        false
    };

    progress(Progress::complete(stats.frames_written));

    Ok(PipelineReport {
        output: output.to_path_buf(),
        info: stats.info,
        frames_written: stats.frames_written,
        has_audio,
        audio_merged,
    })
}
