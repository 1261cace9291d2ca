use anyhow::{anyhow, Result};
use clap::Parser;
use dialoguer::{Confirm, FuzzySelect};
use gridmosaic::{load_config, AppConfig, FailurePolicy, MosaicConverter, ProgressPhase};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(version, about = "Rebuild every video frame as a grid of plain and inverted copies of itself.")]
struct Args {
    /// Input video or image (prompts for a file in the current directory if omitted)
    input: Option<PathBuf>,

    /// Output file; the container is chosen by its extension
    out: Option<PathBuf>,

    /// Number of cells per axis
    #[arg(long, short, value_parser = clap::value_parser!(u32).range(1..))]
    grid_size: Option<u32>,

    /// Config file (JSON or TOML) instead of the default search path
    #[arg(long)]
    config: Option<PathBuf>,

    /// ffmpeg executable to use
    #[arg(long)]
    ffmpeg: Option<String>,

    /// Print failures and exit non-zero instead of failing silently
    #[arg(long, default_value_t = false)]
    report_failures: bool,

    /// Log pipeline progress to standard error
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    /// Never prompt; use defaults and overwrite existing output
    #[arg(long, short, default_value_t = false)]
    yes: bool,

    /// Log details to standard output
    #[arg(long, default_value_t = false)]
    log_details: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match build_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match config.failure_policy {
            FailurePolicy::Silent => {
                tracing::debug!(error = ?e, "conversion failed");
                ExitCode::SUCCESS
            }
            FailurePolicy::Report => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<AppConfig> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(grid_size) = args.grid_size {
        cfg = cfg.with_grid_size(grid_size);
    }
    if let Some(ffmpeg) = &args.ffmpeg {
        cfg = cfg.with_ffmpeg(ffmpeg.clone());
    }
    if args.report_failures {
        cfg = cfg.with_failure_policy(FailurePolicy::Report);
    }
    cfg.validate()?;
    Ok(cfg)
}

fn run(args: &Args, config: &AppConfig) -> Result<()> {
    let is_interactive = !args.yes && std::io::stdin().is_terminal();

    let input_path = match &args.input {
        Some(p) => p.clone(),
        None if is_interactive => {
            let files = find_media_files();
            if files.is_empty() {
                return Err(anyhow!("No media files found in current directory."));
            }
            let selection = FuzzySelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
                .with_prompt("Choose an input file")
                .default(0)
                .items(&files)
                .interact()?;
            PathBuf::from(&files[selection])
        }
        None => PathBuf::from("video.mp4"),
    };
    let output_path = args.out.clone().unwrap_or_else(|| PathBuf::from("output.mp4"));

    if output_path.exists()
        && is_interactive
        && !Confirm::new()
            .with_prompt(format!("{} already exists. Overwrite?", output_path.display()))
            .default(false)
            .interact()?
    {
        println!("Operation cancelled.");
        return Ok(());
    }

    let converter = MosaicConverter::with_config(config.clone())?;

    if is_image(&input_path) {
        converter.convert_image(&input_path, &output_path)?;
        println!("Mosaic written to {}", output_path.display());
        if args.log_details {
            print_details(config, None);
        }
        return Ok(());
    }

    let pb = ProgressBar::new_spinner();
    let report = converter.convert_video_with_progress(&input_path, &output_path, |progress| {
        match progress.phase {
            ProgressPhase::ExtractingAudio | ProgressPhase::MergingAudio => {
                pb.set_message(progress.message.clone());
                pb.tick();
            }
            ProgressPhase::ProcessingFrames => {
                if progress.total > 0 && pb.length() != Some(progress.total) {
                    pb.set_length(progress.total);
                    pb.set_style(
                        ProgressStyle::with_template(
                            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                    );
                    pb.set_message("Processing");
                }
                pb.set_position(progress.completed);
            }
            ProgressPhase::Complete => pb.finish_with_message("Done"),
        }
    });
    if !pb.is_finished() {
        pb.finish_and_clear();
    }
    let report = report?;

    if report.has_audio && !report.audio_merged {
        tracing::warn!("audio could not be merged; staging files were kept for inspection");
    }
    println!("\nMosaic written to {}", report.output.display());

    if args.log_details {
        print_details(config, Some(&report));
    }
    Ok(())
}

fn print_details(config: &AppConfig, report: Option<&gridmosaic::PipelineReport>) {
    let mut details = format!(
        "Version: {}\nGrid Size: {}",
        env!("CARGO_PKG_VERSION"),
        config.grid_size
    );
    if let Some(report) = report {
        details.push_str(&format!(
            "\nResolution: {}x{}\nFPS: {}\nFrames: {}\nAudio: {}",
            report.info.width,
            report.info.height,
            report.info.frame_rate,
            report.frames_written,
            if report.audio_merged {
                "merged"
            } else if report.has_audio {
                "merge failed"
            } else {
                "none"
            }
        ));
    }
    println!("\n--- Generation Details ---");
    println!("{}", details);
}

fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

fn find_media_files() -> Vec<String> {
    WalkDir::new(".")
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().is_file()
                && e.path().extension().is_some_and(|ext| {
                    matches!(
                        ext.to_str(),
                        Some("mp4" | "mkv" | "mov" | "avi" | "webm" | "png" | "jpg" | "jpeg")
                    )
                })
        })
        .map(|e| e.path().to_string_lossy().into_owned())
        .collect()
}
