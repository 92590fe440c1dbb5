use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use plateblur_core::blurring::infrastructure::cpu_polygon_blurrer::CpuPolygonBlurrer;
use plateblur_core::detection::domain::region_detector::RegionDetector;
use plateblur_core::detection::infrastructure::http_region_detector::HttpRegionDetector;
use plateblur_core::detection::infrastructure::json_region_detector::JsonRegionDetector;
use plateblur_core::interpolation::interpolation_logger::StatsInterpolationLogger;
use plateblur_core::pipeline::blur_plates_use_case::{BlurPlatesUseCase, ProgressFn};
use plateblur_core::shared::constants::{MAX_BLUR_STRENGTH, MIN_BLUR_STRENGTH};
use plateblur_core::shared::engine_config::{EngineConfig, KeyframeHandoff};
use plateblur_core::tracking::infrastructure::optical_flow_propagator::OpticalFlowPropagator;
use plateblur_core::video::infrastructure::image_sequence_reader::ImageSequenceReader;
use plateblur_core::video::infrastructure::image_sequence_writer::ImageSequenceWriter;
use plateblur_core::video::infrastructure::threaded_frame_sink::ThreadedFrameSink;

const OUTPUT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

/// License plate blurring for image sequences.
///
/// Plates are detected on every Nth frame and tracked with optical flow
/// through the frames in between.
#[derive(Parser)]
#[command(name = "plateblur")]
struct Cli {
    /// Directory of input frames, played back in file name order.
    input: PathBuf,

    /// Directory for the blurred frames.
    output: PathBuf,

    /// JSON file with precomputed polygons per frame.
    #[arg(long, conflicts_with = "detector_url", required_unless_present = "detector_url")]
    polygons: Option<PathBuf>,

    /// Detection service that accepts a PNG and returns polygons.
    #[arg(long)]
    detector_url: Option<String>,

    /// Detection request timeout in seconds (0 = none).
    #[arg(long, default_value = "30")]
    detector_timeout: u64,

    /// JSON engine config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run detection every Nth frame.
    #[arg(long)]
    sample_interval: Option<usize>,

    /// Blur strength (1-10); higher blurs less.
    #[arg(long)]
    blur_strength: Option<u32>,

    /// Optical-flow search window in pixels (odd).
    #[arg(long)]
    window_size: Option<usize>,

    /// Maximum optical-flow pyramid levels.
    #[arg(long)]
    pyramid_levels: Option<usize>,

    /// Block on detection hand-off instead of dropping unprocessed keyframes.
    /// Always on with --polygons, where detection is instant.
    #[arg(long)]
    wait_for_keyframes: bool,

    /// Output image format.
    #[arg(long, default_value = "png")]
    extension: String,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;
    let config = build_config(&cli)?;
    let detector = build_detector(&cli)?;

    let sink = ThreadedFrameSink::new(Box::new(ImageSequenceWriter::new(&cli.extension)));
    let progress: ProgressFn = Box::new(|current, total| {
        eprint!("\rProcessing frame {current}/{total}");
        true
    });

    let mut use_case = BlurPlatesUseCase::new(
        Box::new(ImageSequenceReader::new()),
        Box::new(sink),
        detector,
        Box::new(OpticalFlowPropagator::new(&config.flow)),
        Box::new(CpuPolygonBlurrer::new(config.clamped_blur_strength())),
        Box::new(StatsInterpolationLogger::new()),
        config,
        Some(progress),
        None,
    );
    let result = use_case.execute(&cli.input, &cli.output);
    eprintln!();
    let report = result?;

    if !report.dropped_keyframes.is_empty() {
        log::warn!(
            "{} keyframes were replaced before processing and are missing from the output: {:?}",
            report.dropped_keyframes.len(),
            report.dropped_keyframes
        );
    }
    log::info!(
        "Wrote {} frames to {}",
        report.frames_emitted,
        cli.output.display()
    );
    Ok(())
}

fn build_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(interval) = cli.sample_interval {
        config.sample_interval = interval;
    }
    if let Some(strength) = cli.blur_strength {
        config.blur_strength = strength;
    }
    if let Some(window) = cli.window_size {
        config.flow.window_size = window;
    }
    if let Some(levels) = cli.pyramid_levels {
        config.flow.max_levels = levels;
    }
    // Precomputed polygons arrive instantly, so nothing else would pace the
    // reader against the interpolation worker.
    if cli.wait_for_keyframes || cli.polygons.is_some() {
        config.handoff = KeyframeHandoff::Wait;
    }
    config.validate()?;
    Ok(config)
}

fn build_detector(cli: &Cli) -> Result<Box<dyn RegionDetector>, Box<dyn std::error::Error>> {
    if let Some(url) = &cli.detector_url {
        let timeout = (cli.detector_timeout > 0).then(|| Duration::from_secs(cli.detector_timeout));
        log::info!("Using detection service at {url}");
        return Ok(Box::new(HttpRegionDetector::new(url, timeout)?));
    }
    let path = cli
        .polygons
        .as_ref()
        .ok_or("Either --polygons or --detector-url is required")?;
    let detector = JsonRegionDetector::from_file(path)?;
    log::info!(
        "Loaded polygons for {} frames from {}",
        detector.frame_count(),
        path.display()
    );
    Ok(Box::new(detector))
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.input.is_dir() {
        return Err(format!("Input directory not found: {}", cli.input.display()).into());
    }
    if cli.input == cli.output {
        return Err("Output directory must differ from the input directory".into());
    }
    if let Some(path) = &cli.polygons {
        if !path.exists() {
            return Err(format!("Polygon file not found: {}", path.display()).into());
        }
    }
    if let Some(path) = &cli.config {
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()).into());
        }
    }
    if cli.sample_interval == Some(0) {
        return Err("Sample interval must be at least 1".into());
    }
    if let Some(strength) = cli.blur_strength {
        if !(MIN_BLUR_STRENGTH..=MAX_BLUR_STRENGTH).contains(&strength) {
            return Err(format!(
                "Blur strength must be between {MIN_BLUR_STRENGTH} and {MAX_BLUR_STRENGTH}, \
                 got {strength}"
            )
            .into());
        }
    }
    if let Some(window) = cli.window_size {
        if window < 3 || window % 2 == 0 {
            return Err(format!("Window size must be an odd integer >= 3, got {window}").into());
        }
    }
    if cli.pyramid_levels == Some(0) {
        return Err("Pyramid levels must be at least 1".into());
    }
    let extension = cli.extension.trim_start_matches('.').to_lowercase();
    if !OUTPUT_EXTENSIONS.contains(&extension.as_str()) {
        return Err(format!(
            "Extension must be one of: {}, got '{}'",
            OUTPUT_EXTENSIONS.join(", "),
            cli.extension
        )
        .into());
    }
    Ok(())
}
