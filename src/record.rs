use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::detect::Candidate;
use crate::error::TrackError;

/// Sentinel centroid written for frames with no detection. A genuine
/// detection can never produce negative pixel coordinates, so the sentinel
/// is unambiguous without an extra column.
pub const NO_DETECTION: (i32, i32) = (-1, -1);

/// One persisted observation. Exactly one row per processed frame, so the
/// row count always equals frames processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    #[serde(rename = "Frame")]
    pub frame: u64,
    #[serde(rename = "Centroid_X")]
    pub centroid_x: i32,
    #[serde(rename = "Centroid_Y")]
    pub centroid_y: i32,
}

impl TrajectoryRecord {
    pub fn is_detection(&self) -> bool {
        (self.centroid_x, self.centroid_y) != NO_DETECTION
    }
}

/// Buffers one record per frame and accumulates the visitation-density
/// surface; both are flushed once when the video ends.
pub struct TrajectoryRecorder {
    records: Vec<TrajectoryRecord>,
    heatmap: Mat,
    frame_width: i32,
    frame_height: i32,
}

impl TrajectoryRecorder {
    pub fn new(frame_width: i32, frame_height: i32) -> Result<Self> {
        let heatmap = Mat::zeros(frame_height, frame_width, core::CV_32FC1)?.to_mat()?;
        Ok(Self {
            records: Vec::new(),
            heatmap,
            frame_width,
            frame_height,
        })
    }

    /// Appends the frame's record and, when a candidate exists, bumps every
    /// heatmap cell under its bounding box.
    pub fn record(&mut self, frame_index: u64, candidate: Option<&Candidate>) -> Result<()> {
        let (cx, cy) = match candidate {
            Some(found) => (found.centroid.x, found.centroid.y),
            None => NO_DETECTION,
        };
        self.records.push(TrajectoryRecord {
            frame: frame_index,
            centroid_x: cx,
            centroid_y: cy,
        });

        if let Some(found) = candidate {
            let x0 = found.bbox.x.max(0);
            let y0 = found.bbox.y.max(0);
            let x1 = (found.bbox.x + found.bbox.width).min(self.frame_width);
            let y1 = (found.bbox.y + found.bbox.height).min(self.frame_height);
            for y in y0..y1 {
                for x in x0..x1 {
                    *self.heatmap.at_2d_mut::<f32>(y, x)? += 1.0;
                }
            }
        }
        Ok(())
    }

    pub fn frames_recorded(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn detections(&self) -> u64 {
        self.records.iter().filter(|r| r.is_detection()).count() as u64
    }

    #[cfg(test)]
    fn heat_at(&self, x: i32, y: i32) -> f32 {
        *self.heatmap.at_2d::<f32>(y, x).unwrap()
    }

    /// Writes `data/<stem>.csv` and `heatmaps/<stem>.png` under `output_dir`.
    pub fn flush(&self, output_dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
        let data_dir = output_dir.join("data");
        let heatmap_dir = output_dir.join("heatmaps");
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&heatmap_dir)?;

        let csv_path = data_dir.join(format!("{stem}.csv"));
        write_trajectory(&csv_path, &self.records)?;

        let heatmap_path = heatmap_dir.join(format!("{stem}.png"));
        let mut normalized = Mat::default();
        core::normalize(
            &self.heatmap,
            &mut normalized,
            0.0,
            255.0,
            core::NORM_MINMAX,
            core::CV_8U,
            &core::no_array(),
        )?;
        let mut colored = Mat::default();
        imgproc::apply_color_map(&normalized, &mut colored, imgproc::COLORMAP_JET)?;
        imgcodecs::imwrite(
            heatmap_path.to_str().context("heatmap path is not valid UTF-8")?,
            &colored,
            &Vector::new(),
        )?;

        Ok((csv_path, heatmap_path))
    }
}

pub fn write_trajectory(path: &Path, records: &[TrajectoryRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    if records.is_empty() {
        // serde only emits the header alongside a first record.
        writer.write_record(["Frame", "Centroid_X", "Centroid_Y"])?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a trajectory log back, in row order. Missing or malformed files
/// come back as [`TrackError::Trajectory`] so the distance pass can turn
/// them into a per-video `"Error"` row.
pub fn read_trajectory(path: &Path) -> Result<Vec<TrajectoryRecord>, TrackError> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| TrackError::Trajectory {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    reader
        .deserialize()
        .collect::<Result<Vec<TrajectoryRecord>, _>>()
        .map_err(|err| TrackError::Trajectory {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
}
