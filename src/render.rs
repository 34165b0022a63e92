use std::collections::VecDeque;

use anyhow::Result;
use opencv::{core::{Mat, Point, Scalar}, imgproc};

use crate::detect::{Candidate, DetectionPath};
use crate::region::Region;

fn region_color() -> Scalar {
    Scalar::new(255.0, 0.0, 0.0, 0.0) // blue
}

fn path_color(path: DetectionPath) -> Scalar {
    match path {
        DetectionPath::Motion => Scalar::new(0.0, 255.0, 0.0, 0.0), // green
        DetectionPath::Fallback => Scalar::new(0.0, 255.0, 255.0, 0.0), // yellow
    }
}

/// Draws the live-preview overlay: region rectangle, current bounding box
/// (green for motion-path hits, yellow for fallback), trail dots and an
/// instantaneous FPS readout. Display-only; nothing here is persisted.
pub fn annotate(
    frame: &mut Mat,
    region: Region,
    candidate: Option<&Candidate>,
    trail: &VecDeque<Point>,
    fps: f64,
) -> Result<()> {
    if let Some(found) = candidate {
        imgproc::rectangle(frame, found.bbox, path_color(found.path), 2, imgproc::LINE_8, 0)?;
    }

    for point in trail {
        imgproc::circle(
            frame,
            *point,
            2,
            Scalar::new(0.0, 255.0, 255.0, 0.0),
            -1,
            imgproc::LINE_8,
            0,
        )?;
    }

    imgproc::rectangle(frame, region.rect(), region_color(), 2, imgproc::LINE_8, 0)?;

    imgproc::put_text(
        frame,
        &format!("FPS: {fps:.2}"),
        Point::new(10, 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.8,
        Scalar::all(255.0),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}
