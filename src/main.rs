use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod batch;
mod detect;
mod distance;
mod error;
mod record;
mod region;
mod render;
mod runner;
mod track;

use detect::DetectorConfig;
use region::Region;

#[derive(Parser, Debug)]
#[command(name = "fishtrack", about = "Single-subject dark-object tracker for fixed-region videos")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track one video, with an optional live preview window
    Track {
        /// Path to the video file
        video: PathBuf,
        #[arg(long, default_value = "outputs")]
        output_dir: PathBuf,
        /// Skip the preview window and interactive region selection
        #[arg(long)]
        headless: bool,
        /// Tracking region as x,y,width,height; defaults to interactive
        /// selection (or the full frame when headless)
        #[arg(long)]
        region: Option<Region>,
        #[command(flatten)]
        detector: DetectorArgs,
    },
    /// Track a folder of videos headless, in groups over a worker pool
    Batch {
        /// Directory containing the video files
        videos_dir: PathBuf,
        #[arg(long, default_value = "outputs")]
        output_dir: PathBuf,
        /// Bounded worker pool size
        #[arg(long, default_value_t = 10)]
        workers: usize,
        /// Number of videos per group; a group completes before the next starts
        #[arg(long, default_value_t = 10)]
        group_size: usize,
        /// Tracking region as x,y,width,height; defaults to the full frame
        #[arg(long)]
        region: Option<Region>,
        #[command(flatten)]
        detector: DetectorArgs,
    },
    /// Compute travelled-distance summaries from recorded trajectories
    Distance {
        /// Directory containing the source video files
        videos_dir: PathBuf,
        #[arg(long, default_value = "outputs")]
        output_dir: PathBuf,
        /// Trajectory CSV directory; defaults to <output-dir>/data
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Physical width of the tracked region in centimeters
        #[arg(long, default_value_t = 28.0)]
        real_width_cm: f64,
        /// Physical height of the tracked region in centimeters
        #[arg(long, default_value_t = 14.0)]
        real_height_cm: f64,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct DetectorArgs {
    /// Intensity below which a pixel counts as the dark subject
    #[arg(long, default_value_t = 60.0)]
    darkness_threshold: f64,
    /// Minimum frame-to-frame intensity change that counts as motion
    #[arg(long, default_value_t = 1.0)]
    motion_threshold: f64,
    /// Minimum blob area (px^2) on the darkness-and-motion path
    #[arg(long, default_value_t = 200.0)]
    min_motion_area: f64,
    /// Minimum blob area (px^2) on the darkness-only fallback path
    #[arg(long, default_value_t = 300.0)]
    min_fallback_area: f64,
}

impl From<DetectorArgs> for DetectorConfig {
    fn from(args: DetectorArgs) -> Self {
        Self {
            darkness_threshold: args.darkness_threshold,
            motion_threshold: args.motion_threshold,
            min_motion_area: args.min_motion_area,
            min_fallback_area: args.min_fallback_area,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Track {
            video,
            output_dir,
            headless,
            region,
            detector,
        } => {
            let report = runner::run_video(&runner::RunConfig {
                video,
                output_dir,
                display: !headless,
                region,
                detector: detector.into(),
            })?;
            tracing::info!(
                "trajectory written to {}, heatmap to {}",
                report.trajectory_path.display(),
                report.heatmap_path.display()
            );
            Ok(())
        }
        Command::Batch {
            videos_dir,
            output_dir,
            workers,
            group_size,
            region,
            detector,
        } => {
            let failures = batch::run_batch(&batch::BatchConfig {
                videos_dir,
                output_dir,
                workers,
                group_size,
                region,
                detector: detector.into(),
            })?;
            if failures > 0 {
                tracing::warn!("{failures} video(s) failed, see the batch log");
            }
            Ok(())
        }
        Command::Distance {
            videos_dir,
            output_dir,
            data_dir,
            real_width_cm,
            real_height_cm,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| output_dir.join("data"));
            let calibration = distance::Calibration {
                real_width_cm,
                real_height_cm,
            };
            let summaries = distance::summarize(&data_dir, &videos_dir, calibration)?;
            std::fs::create_dir_all(&output_dir)?;
            let summary_path = output_dir.join("distance_summary.csv");
            distance::write_summary(&summaries, &summary_path)?;
            tracing::info!(
                "distance summary for {} video(s) written to {}",
                summaries.len(),
                summary_path.display()
            );
            Ok(())
        }
    }
}
