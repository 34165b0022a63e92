use std::str::FromStr;

use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Rect},
    highgui,
    prelude::*,
    videoio,
};

use crate::error::TrackError;

/// Fixed sub-rectangle of the frame that tracking is confined to.
/// Selected once per video; immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full_frame(width: i32, height: i32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

impl From<Rect> for Region {
    fn from(r: Rect) -> Self {
        Self::new(r.x, r.y, r.width, r.height)
    }
}

impl FromStr for Region {
    type Err = String;

    /// Parses `"x,y,width,height"` as given on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected x,y,width,height, got {s:?}"));
        }
        let mut vals = [0i32; 4];
        for (slot, part) in vals.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("invalid integer {part:?} in region {s:?}"))?;
        }
        let region = Region::new(vals[0], vals[1], vals[2], vals[3]);
        if region.is_empty() {
            return Err(format!("region {s:?} has zero area"));
        }
        Ok(region)
    }
}

/// Lets the operator mark the tank area on the first decoded frame, then
/// rewinds the stream so the first frame is reprocessed by the detector.
pub fn select_region(cap: &mut videoio::VideoCapture, window: &str) -> Result<Region> {
    let mut frame = Mat::default();
    if !cap.read(&mut frame)? || frame.empty() {
        return Err(TrackError::NoFrame.into());
    }

    highgui::named_window(window, highgui::WINDOW_NORMAL)?;
    highgui::resize_window(window, 1024, 768)?;
    let roi = highgui::select_roi_for_window(window, &frame, true, false)?;
    highgui::destroy_window(window)?;

    if roi.width <= 0 || roi.height <= 0 {
        return Err(TrackError::EmptySelection.into());
    }

    cap.set(videoio::CAP_PROP_POS_FRAMES, 0.0)
        .context("failed to rewind stream after region selection")?;

    tracing::info!(
        "region selected: {}x{} at ({}, {})",
        roi.width,
        roi.height,
        roi.x,
        roi.y
    );
    Ok(roi.into())
}
