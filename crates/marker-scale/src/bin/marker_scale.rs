//! `marker-scale`: rescale an OpenMVG scene to metric units using markers of
//! known size visible in its images.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use marker_scale::core::level_from_verbosity;
use marker_scale::{run, scale_ply, DetectionMethod, PipelineError, ScaleConfig};

#[derive(Debug, Parser)]
#[command(name = "marker-scale", version)]
#[command(about = "Estimate the metric scale of an SfM scene from fiducial markers of known size")]
struct Cli {
    /// Input scene (OpenMVG sfm_data.json).
    #[arg(short = 'i', long)]
    input_scene: Option<PathBuf>,

    /// Where to write the scaled scene.
    #[arg(short = 'o', long)]
    output_scene: Option<PathBuf>,

    /// Physical side length of the markers (sets the output unit).
    #[arg(short = 's', long)]
    marker_size: Option<f64>,

    /// How markers are searched for in each image.
    #[arg(short = 'm', long, value_enum)]
    detection_method: Option<DetectionMethod>,

    /// Built-in dictionary name or path to a JSON dictionary.
    #[arg(long)]
    dictionary: Option<String>,

    /// Image root directory, overriding the scene's root_path.
    #[arg(long)]
    sfm_root: Option<PathBuf>,

    /// Only search the images listed in this file (one per line).
    #[arg(long)]
    include_from: Option<PathBuf>,

    /// Skip the images listed in this file (one per line).
    #[arg(long)]
    exclude_from: Option<PathBuf>,

    /// Remove lens distortion before detecting markers.
    #[arg(long)]
    undistort_images: bool,

    /// Smallest marker side, in pixels, that is considered.
    #[arg(long)]
    min_marker_pix: Option<f64>,

    /// Also detect white-on-black markers.
    #[arg(long)]
    detect_inverted: bool,

    /// Triangulate from all observations without RANSAC.
    #[arg(long)]
    no_ransac: bool,

    /// RANSAC inlier threshold in pixels.
    #[arg(long)]
    ransac_threshold: Option<f64>,

    /// Maximum RANSAC iterations per landmark.
    #[arg(long)]
    ransac_iterations: Option<usize>,

    /// Base seed for RANSAC sampling.
    #[arg(long)]
    seed: Option<u64>,

    /// Write detection overlays (JPEG) into this directory.
    #[arg(long, value_name = "DIR")]
    save_debug_images: Option<PathBuf>,

    /// Write the triangulated landmarks (.obj or .ply).
    #[arg(long)]
    save_landmarks: Option<PathBuf>,

    /// Write the scaled landmarks (.obj or .ply).
    #[arg(long)]
    save_scaled_landmarks: Option<PathBuf>,

    /// Write an SVG histogram of the per-edge scale ratios.
    #[arg(long)]
    histogram: Option<PathBuf>,

    /// Write a JSON run report.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log detection progress.
    #[arg(short = 'p', long)]
    progress: bool,

    /// Base configuration (JSON); other flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration (JSON) and exit.
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Rescale the vertices of a PLY file by the computed scale.
    #[arg(long, num_args = 2, value_names = ["IN", "OUT"])]
    scale_ply: Option<Vec<PathBuf>>,

    /// Use this scale factor instead of running the pipeline (with --scale-ply).
    #[arg(long, requires = "scale_ply")]
    scale: Option<f64>,

    /// More log output (repeatable).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors.
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit JSON log lines.
    #[cfg(feature = "tracing")]
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Layer the command-line flags over the base configuration.
    fn to_config(&self) -> Result<ScaleConfig, PipelineError> {
        let mut cfg = match &self.config {
            Some(path) => ScaleConfig::load(path)?,
            None => ScaleConfig::default(),
        };

        if let Some(p) = &self.input_scene {
            cfg.input_scene = p.clone();
        }
        if let Some(p) = &self.output_scene {
            cfg.output_scene = Some(p.clone());
        }
        if let Some(s) = self.marker_size {
            cfg.marker_size = s;
        }
        if let Some(m) = self.detection_method {
            cfg.detection_method = m;
        }
        if let Some(d) = &self.dictionary {
            cfg.dictionary = d.clone();
        }
        if let Some(p) = &self.sfm_root {
            cfg.sfm_root = Some(p.clone());
        }
        if let Some(p) = &self.include_from {
            cfg.include_from = Some(p.clone());
        }
        if let Some(p) = &self.exclude_from {
            cfg.exclude_from = Some(p.clone());
        }
        cfg.undistort_images |= self.undistort_images;
        if let Some(px) = self.min_marker_pix {
            cfg.detector.min_marker_px = px;
        }
        cfg.detector.detect_inverted |= self.detect_inverted;
        if self.no_ransac {
            cfg.triangulation.robust = false;
        }
        if let Some(t) = self.ransac_threshold {
            cfg.triangulation.inlier_threshold = t;
        }
        if let Some(n) = self.ransac_iterations {
            cfg.triangulation.max_iterations = n;
        }
        if let Some(seed) = self.seed {
            cfg.triangulation.seed = Some(seed);
        }
        if let Some(p) = &self.save_debug_images {
            cfg.save_debug_images = Some(p.clone());
        }
        if let Some(p) = &self.save_landmarks {
            cfg.save_landmarks = Some(p.clone());
        }
        if let Some(p) = &self.save_scaled_landmarks {
            cfg.save_scaled_landmarks = Some(p.clone());
        }
        if let Some(p) = &self.histogram {
            cfg.histogram = Some(p.clone());
        }
        if let Some(p) = &self.report {
            cfg.report = Some(p.clone());
        }
        cfg.progress |= self.progress;
        Ok(cfg)
    }

    fn ply_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match self.scale_ply.as_deref() {
            Some([input, output]) => Some((input, output)),
            _ => None,
        }
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(_cli: &Cli, level: LevelFilter) {
    let _ = marker_scale::core::init_with_level(level);
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli, level: LevelFilter) {
    if marker_scale::core::init_tracing(level, cli.log_json) {
        let _ = tracing_log::LogTracer::init_with_filter(level);
    }
}

fn try_main(cli: &Cli) -> Result<(), PipelineError> {
    let cfg = cli.to_config()?;

    if let Some(path) = &cli.write_config {
        cfg.save(path)?;
        log::info!("wrote configuration to {}", path.display());
        return Ok(());
    }

    if let (Some(factor), Some((input, output))) = (cli.scale, cli.ply_paths()) {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(PipelineError::Config(format!(
                "scale must be positive (got {factor})"
            )));
        }
        scale_ply(input, output, factor)?;
        return Ok(());
    }

    let report = run(&cfg)?;
    println!("{}", report.scale);

    if let Some((input, output)) = cli.ply_paths() {
        scale_ply(input, output, report.scale)?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli, level_from_verbosity(cli.verbose, cli.quiet));

    if let Err(err) = try_main(&cli) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
