use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use opencv::{core::Mat, highgui, prelude::*, videoio};

use crate::detect::DetectorConfig;
use crate::error::TrackError;
use crate::record::TrajectoryRecorder;
use crate::region::{self, Region};
use crate::render;
use crate::track::TrackState;

const KEY_QUIT: i32 = 113; // q
const KEY_PAUSE: i32 = 112; // p
const KEY_ESC: i32 = 27;

/// Everything one video's run needs. `region: None` means interactive
/// selection when a display is available, full frame otherwise.
pub struct RunConfig {
    pub video: PathBuf,
    pub output_dir: PathBuf,
    pub display: bool,
    pub region: Option<Region>,
    pub detector: DetectorConfig,
}

#[derive(Debug)]
pub struct RunReport {
    pub video: String,
    pub frames: u64,
    pub detections: u64,
    pub trajectory_path: PathBuf,
    pub heatmap_path: PathBuf,
}

/// Opens a capture, failing fast with a per-video error if the stream is
/// unreadable.
pub fn open_capture(path: &Path) -> Result<videoio::VideoCapture, TrackError> {
    let unreadable = || TrackError::VideoUnreadable(path.display().to_string());
    let path_str = path.to_str().ok_or_else(unreadable)?;
    let cap =
        videoio::VideoCapture::from_file(path_str, videoio::CAP_ANY).map_err(|_| unreadable())?;
    if !cap.is_opened().map_err(|_| unreadable())? {
        return Err(unreadable());
    }
    Ok(cap)
}

/// Tracks one video end to end: region selection, the frame loop, trajectory
/// and heatmap flush. The capture is released on every exit path before the
/// result is reported.
pub fn run_video(config: &RunConfig) -> Result<RunReport> {
    let stem = config
        .video
        .file_stem()
        .and_then(|s| s.to_str())
        .context("video path has no usable file stem")?
        .to_owned();

    let mut cap = open_capture(&config.video)?;
    let result = track_video(&mut cap, config, &stem);
    if let Err(err) = cap.release() {
        tracing::warn!("failed to release capture for {stem}: {err}");
    }
    result
}

fn track_video(
    cap: &mut videoio::VideoCapture,
    config: &RunConfig,
    stem: &str,
) -> Result<RunReport> {
    let frame_width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let frame_height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
    if frame_width <= 0 || frame_height <= 0 {
        return Err(TrackError::VideoUnreadable(config.video.display().to_string()).into());
    }

    let region = match config.region {
        Some(region) => region,
        None if config.display => region::select_region(cap, "Select Region")?,
        None => Region::full_frame(frame_width, frame_height),
    };

    let mut display = config.display;
    let window = "fishtrack";
    if display {
        if let Err(err) = highgui::named_window(window, highgui::WINDOW_NORMAL) {
            tracing::warn!("failed to open display window: {err}. Running headless.");
            display = false;
        } else {
            highgui::resize_window(window, 1024, 768)?;
        }
    }

    let mut state = TrackState::new();
    let mut recorder = TrajectoryRecorder::new(frame_width, frame_height)?;
    let mut frame = Mat::default();
    let mut frame_index: u64 = 0;

    'frames: loop {
        let frame_start = Instant::now();
        if !cap.read(&mut frame)? || frame.empty() {
            break;
        }

        let candidate = state.step(&frame, region, &config.detector)?;
        recorder.record(frame_index, candidate.as_ref())?;
        frame_index += 1;

        if display {
            let fps = 1.0 / (frame_start.elapsed().as_secs_f64() + 1e-5);
            render::annotate(&mut frame, region, candidate.as_ref(), &state.trail, fps)?;
            highgui::imshow(window, &frame)?;

            let key = highgui::wait_key(1)?;
            if key == KEY_QUIT || key == KEY_ESC {
                break;
            }
            if key == KEY_PAUSE {
                loop {
                    let key = highgui::wait_key(0)?;
                    if key == KEY_PAUSE {
                        break;
                    }
                    if key == KEY_QUIT || key == KEY_ESC {
                        break 'frames;
                    }
                }
            }
        }
    }

    if display {
        highgui::destroy_window(window)?;
    }

    let (trajectory_path, heatmap_path) = recorder.flush(&config.output_dir, stem)?;
    let report = RunReport {
        video: stem.to_owned(),
        frames: frame_index,
        detections: recorder.detections(),
        trajectory_path,
        heatmap_path,
    };
    tracing::info!(
        "{}: {} frames, {} detections, stillness counter ended at {}",
        report.video,
        report.frames,
        report.detections,
        state.no_movement_frames
    );
    Ok(report)
}
