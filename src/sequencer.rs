use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::error::MosaicError;
use crate::media::{StreamInfo, VideoBackend};
use crate::transform::{transform_frame, CellGrid};

/// Outcome of one decode, transform and encode pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStats {
    pub info: StreamInfo,
    pub frames_written: u64,
}

/// Decode `source`, transform every frame and encode the result to
/// `destination`, strictly one frame at a time in decode order.
///
/// Decoding stops quietly at end of stream or on a decode error; the frames
/// encoded so far are kept. `progress` receives `(completed, total)` after
/// each frame, where `total` is the probed frame count (0 if unknown).
///
/// Fails with [`MosaicError::SourceOpen`] if the source cannot be opened and
/// with [`MosaicError::EncoderInit`] if the encoder cannot be started, rejects
/// the first frame, or exits without producing anything. In those cases no
/// output is kept.
///
/// The probed frame count only feeds `progress`; the loop runs until the
/// decoder runs dry.
pub fn run_sequence<F>(
    backend: &dyn VideoBackend,
    source: &Path,
    destination: &Path,
    grid_size: u32,
    progress: F,
) -> Result<SequenceStats>
where
    F: Fn(u64, u64),
{
    if grid_size == 0 {
        return Err(MosaicError::InvalidGridSize(grid_size).into());
    }

    let mut decoder = backend.open_source(source)?;
    let info = decoder.info().clone();

    let grid = CellGrid::new(info.width, info.height, grid_size);
    if grid.is_degenerate() {
        tracing::warn!(
            grid_size,
            width = info.width,
            height = info.height,
            "grid size exceeds frame dimensions, output frames will be black"
        );
    }

    let mut encoder = backend.open_sink(destination, &info)?;
    let total = info.frame_count;
    let mut frames_written = 0u64;

    while let Some(frame) = decoder.read_frame() {
        let output = transform_frame(&frame, grid_size);
        if let Err(e) = encoder.write_frame(&output) {
            if frames_written == 0 {
                drop(encoder);
                discard_partial(destination);
                if let Some(MosaicError::EncoderInit { .. }) = e.downcast_ref::<MosaicError>() {
                    return Err(e);
                }
                return Err(MosaicError::EncoderInit {
                    path: destination.to_path_buf(),
                    reason: format!("{:#}", e),
                }
                .into());
            }
            // Keep what the encoder accepted; finish() reports its status.
            tracing::warn!(frames_written, error = %e, "encoder stopped accepting frames");
            break;
        }
        frames_written += 1;
        progress(frames_written, total);
    }
    drop(decoder);

    if let Err(e) = encoder.finish() {
        let never_started = matches!(
            e.downcast_ref::<MosaicError>(),
            Some(MosaicError::EncoderInit { .. })
        );
        if frames_written == 0 || never_started {
            discard_partial(destination);
        }
        return Err(e);
    }

    tracing::info!(frames_written, destination = %destination.display(), "encoded frames");
    Ok(SequenceStats {
        info,
        frames_written,
    })
}

fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove partial output");
        }
    }
}
