use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opencv::{prelude::*, videoio};

use crate::batch::numeric_key;
use crate::error::TrackError;
use crate::record::{self, TrajectoryRecord};
use crate::runner::open_capture;

/// Every Nth trajectory record is kept as a sample point before distance
/// summation (0-indexed: records 0, 60, 120, ...).
pub const SAMPLE_STRIDE: usize = 60;

const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

/// Physical dimensions of the tracked region, used to rescale pixels to
/// centimeters. The per-axis ratios are averaged into a single scale.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub real_width_cm: f64,
    pub real_height_cm: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            real_width_cm: 28.0,
            real_height_cm: 14.0,
        }
    }
}

impl Calibration {
    pub fn pixel_to_cm(&self, frame_width: i32, frame_height: i32) -> f64 {
        let ratio_x = self.real_width_cm / frame_width as f64;
        let ratio_y = self.real_height_cm / frame_height as f64;
        (ratio_x + ratio_y) / 2.0
    }
}

pub fn stride_sample(records: &[TrajectoryRecord], stride: usize) -> Vec<(i32, i32)> {
    records
        .iter()
        .enumerate()
        .filter(|(idx, _)| idx % stride == 0)
        .map(|(_, r)| (r.centroid_x, r.centroid_y))
        .collect()
}

/// Sum of Euclidean step lengths between consecutive points, in pixels.
/// Fewer than two points is a distance of exactly zero, not an error.
pub fn pixel_distance(points: &[(i32, i32)]) -> f64 {
    points
        .windows(2)
        .map(|pair| {
            let dx = (pair[1].0 - pair[0].0) as f64;
            let dy = (pair[1].1 - pair[0].1) as f64;
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}

/// Reads only the stream header for frame geometry; no frame is decoded.
pub fn video_frame_size(path: &Path) -> Result<(i32, i32), TrackError> {
    let unreadable = || TrackError::VideoUnreadable(path.display().to_string());
    let mut cap = open_capture(path)?;
    let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(|_| unreadable())? as i32;
    let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(|_| unreadable())? as i32;
    cap.release().map_err(|_| unreadable())?;
    if width <= 0 || height <= 0 {
        return Err(unreadable());
    }
    Ok((width, height))
}

/// Total travelled distance in centimeters for one persisted trajectory.
pub fn total_distance_cm(
    csv_path: &Path,
    video_path: &Path,
    calibration: Calibration,
) -> Result<f64, TrackError> {
    let (frame_width, frame_height) = video_frame_size(video_path)?;
    let records = record::read_trajectory(csv_path)?;
    let points = stride_sample(&records, SAMPLE_STRIDE);
    Ok(pixel_distance(&points) * calibration.pixel_to_cm(frame_width, frame_height))
}

/// Per-video scalar result for the summary table. Failed videos carry the
/// underlying message for diagnosis; the summary row only says `"Error"`.
#[derive(Debug)]
pub struct DistanceSummary {
    pub video: String,
    pub distance_cm: Result<f64, TrackError>,
}

/// Computes one summary row per trajectory CSV in `data_dir`, pairing each
/// with its source video in `videos_dir`. Unreadable videos or logs become
/// `"Error"` rows; a CSV with no matching video is skipped with a warning.
/// One bad video never aborts the rest.
pub fn summarize(data_dir: &Path, videos_dir: &Path, calibration: Calibration) -> Result<Vec<DistanceSummary>> {
    let mut stems: Vec<String> = fs::read_dir(data_dir)
        .with_context(|| format!("failed to read data directory {}", data_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_owned))
        .collect();
    stems.sort_by_key(|stem| numeric_key(stem));

    let mut results = Vec::with_capacity(stems.len());
    for stem in stems {
        let csv_path = data_dir.join(format!("{stem}.csv"));
        let Some(video_path) = find_video(videos_dir, &stem) else {
            tracing::warn!("no source video found for {stem}.csv, skipping");
            continue;
        };
        let distance_cm = total_distance_cm(&csv_path, &video_path, calibration);
        if let Err(err) = &distance_cm {
            tracing::error!("{stem}: {err}");
        }
        results.push(DistanceSummary { video: stem, distance_cm });
    }
    Ok(results)
}

fn find_video(videos_dir: &Path, stem: &str) -> Option<PathBuf> {
    VIDEO_EXTENSIONS
        .iter()
        .map(|ext| videos_dir.join(format!("{stem}.{ext}")))
        .find(|path| path.is_file())
}

/// Writes the summary table: header `Video,Total Distance (cm)`, distances
/// to two decimals, a literal `Error` for failed videos.
pub fn write_summary(summaries: &[DistanceSummary], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(["Video", "Total Distance (cm)"])?;
    for summary in summaries {
        let value = match &summary.distance_cm {
            Ok(cm) => format!("{cm:.2}"),
            Err(_) => "Error".to_owned(),
        };
        writer.write_record([summary.video.as_str(), value.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}
