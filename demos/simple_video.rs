//! Example: Build a grid mosaic of a video using gridmosaic as a library
//!
//! Run with: cargo run --example simple_video

use gridmosaic::{AppConfig, MosaicConverter, ProgressPhase};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 16 cells per axis instead of the default 24
    let converter = MosaicConverter::with_config(AppConfig::default().with_grid_size(16))?;

    let input = Path::new("tests/video/input/test.mkv");
    let output = Path::new("example_mosaic_output.mp4");

    if input.exists() {
        println!("Building mosaic...");
        println!("Input: {}", input.display());
        println!("Output: {}", output.display());

        let report = converter.convert_video_with_progress(input, output, |progress| {
            if progress.phase == ProgressPhase::ProcessingFrames && progress.completed % 25 == 0 {
                println!("{}", progress.message);
            }
        })?;

        println!(
            "✓ {} frames at {}x{}, audio: {}",
            report.frames_written,
            report.info.width,
            report.info.height,
            if report.audio_merged { "kept" } else { "none" }
        );
    } else {
        println!("Note: {} not found.", input.display());
        println!("To use this example, provide a video file at that path.");
    }

    Ok(())
}
