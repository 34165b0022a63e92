use anyhow::Result;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size, Vector},
    imgproc,
    prelude::*,
};

use crate::region::Region;

/// Tunables for the per-frame detector. Defaults match the field-calibrated
/// values: subjects darker than 60, frame diffs above 1, and blob area floors
/// of 200 px² on the motion path and 300 px² on the darkness-only fallback
/// (the fallback sees far more static-dark false positives, so it filters
/// harder).
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub darkness_threshold: f64,
    pub motion_threshold: f64,
    pub min_motion_area: f64,
    pub min_fallback_area: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            darkness_threshold: 60.0,
            motion_threshold: 1.0,
            min_motion_area: 200.0,
            min_fallback_area: 300.0,
        }
    }
}

/// Which detector produced a candidate. Fallback means the darkness-only
/// path located a motionless subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPath {
    Motion,
    Fallback,
}

/// One area-qualified blob, already translated to full-frame coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub bbox: Rect,
    pub centroid: Point,
    pub area: f64,
    pub path: DetectionPath,
}

/// Crops the frame to the region and converts it to single-channel intensity.
pub fn grayscale_region(frame: &Mat, region: Region) -> Result<Mat> {
    let crop = Mat::roi(frame, region.rect())?;
    let mut gray = Mat::default();
    imgproc::cvt_color(
        &crop,
        &mut gray,
        imgproc::COLOR_BGR2GRAY,
        0,
    )?;
    Ok(gray)
}

/// Inverse threshold: dark pixels become candidates.
pub fn darkness_mask(gray: &Mat, config: &DetectorConfig) -> Result<Mat> {
    let mut dark = Mat::default();
    imgproc::threshold(
        gray,
        &mut dark,
        config.darkness_threshold,
        255.0,
        imgproc::THRESH_BINARY_INV,
    )?;
    Ok(dark)
}

/// Frame-difference mask against the previous region grayscale. The current
/// frame is lightly smoothed first to keep sensor noise out of the diff.
pub fn motion_mask(gray: &Mat, prev_gray: &Mat, config: &DetectorConfig) -> Result<Mat> {
    let mut blurred = Mat::default();
    imgproc::gaussian_blur(
        gray,
        &mut blurred,
        Size::new(3, 3),
        0.0,
        0.0,
        core::BORDER_DEFAULT,
    )?;

    let mut diff = Mat::default();
    core::absdiff(&blurred, prev_gray, &mut diff)?;

    let mut motion = Mat::default();
    imgproc::threshold(
        &diff,
        &mut motion,
        config.motion_threshold,
        255.0,
        imgproc::THRESH_BINARY,
    )?;
    Ok(motion)
}

/// AND of darkness and motion, then a morphological open with a 5x5 ellipse
/// to drop isolated noise pixels. Opening is anti-extensive, so the result
/// stays a subset of the raw AND.
pub fn combined_mask(dark: &Mat, motion: &Mat) -> Result<Mat> {
    let mut combined = Mat::default();
    core::bitwise_and(dark, motion, &mut combined, &core::no_array())?;

    let kernel =
        imgproc::get_structuring_element(imgproc::MORPH_ELLIPSE, Size::new(5, 5), Point::new(-1, -1))?;
    let mut opened = Mat::default();
    imgproc::morphology_ex(
        &combined,
        &mut opened,
        imgproc::MORPH_OPEN,
        &kernel,
        Point::new(-1, -1),
        1,
        core::BORDER_CONSTANT,
        Scalar::default(),
    )?;
    Ok(opened)
}

/// External contours of a binary mask, in region-local coordinates.
/// An empty list is a normal outcome, not an error.
pub fn external_contours(mask: &Mat) -> Result<Vector<Vector<Point>>> {
    let mut contours: Vector<Vector<Point>> = Vector::new();
    imgproc::find_contours(
        mask,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;
    Ok(contours)
}

/// Picks the first contour meeting the area floor and translates its bounding
/// box and centroid into full-frame coordinates.
///
/// First-found, not largest-area: the legacy trails were produced by
/// extraction order and this keeps them bit-compatible.
pub fn select_candidate(
    contours: &Vector<Vector<Point>>,
    min_area: f64,
    region: Region,
    path: DetectionPath,
) -> Result<Option<Candidate>> {
    for contour in contours.iter() {
        let area = imgproc::contour_area(&contour, false)?;
        if area < min_area {
            continue;
        }
        let local = imgproc::bounding_rect(&contour)?;
        let bbox = Rect::new(
            local.x + region.x,
            local.y + region.y,
            local.width,
            local.height,
        );
        let centroid = Point::new(
            local.x + local.width / 2 + region.x,
            local.y + local.height / 2 + region.y,
        );
        return Ok(Some(Candidate {
            bbox,
            centroid,
            area,
            path,
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Uniform bright grayscale mat with a dark square painted on it.
    fn gray_with_square(size: i32, sq: Rect, level: u8) -> Mat {
        let mut mat =
            Mat::new_rows_cols_with_default(size, size, core::CV_8UC1, Scalar::all(200.0)).unwrap();
        for y in sq.y..sq.y + sq.height {
            for x in sq.x..sq.x + sq.width {
                *mat.at_2d_mut::<u8>(y, x).unwrap() = level;
            }
        }
        mat
    }

    fn rect_contour(r: Rect) -> Vector<Point> {
        Vector::from_iter([
            Point::new(r.x, r.y),
            Point::new(r.x + r.width, r.y),
            Point::new(r.x + r.width, r.y + r.height),
            Point::new(r.x, r.y + r.height),
        ])
    }

    #[test]
    fn darkness_mask_marks_only_dark_pixels() {
        let config = DetectorConfig::default();
        let gray = gray_with_square(40, Rect::new(10, 10, 8, 8), 20);
        let dark = darkness_mask(&gray, &config).unwrap();

        assert_eq!(*dark.at_2d::<u8>(12, 12).unwrap(), 255);
        assert_eq!(*dark.at_2d::<u8>(0, 0).unwrap(), 0);
    }

    #[test]
    fn combined_mask_is_subset_of_darkness_and_motion() {
        let config = DetectorConfig::default();
        let prev = gray_with_square(60, Rect::new(10, 10, 20, 20), 20);
        let gray = gray_with_square(60, Rect::new(13, 13, 20, 20), 20);

        let dark = darkness_mask(&gray, &config).unwrap();
        let motion = motion_mask(&gray, &prev, &config).unwrap();
        let combined = combined_mask(&dark, &motion).unwrap();

        for y in 0..60 {
            for x in 0..60 {
                if *combined.at_2d::<u8>(y, x).unwrap() != 0 {
                    assert_ne!(*dark.at_2d::<u8>(y, x).unwrap(), 0, "({x},{y}) not dark");
                    assert_ne!(*motion.at_2d::<u8>(y, x).unwrap(), 0, "({x},{y}) not moving");
                }
            }
        }
    }

    #[test]
    fn identical_frames_produce_empty_combined_mask() {
        let config = DetectorConfig::default();
        let gray = gray_with_square(60, Rect::new(10, 10, 20, 20), 20);
        let prev = gray.try_clone().unwrap();

        let dark = darkness_mask(&gray, &config).unwrap();
        let motion = motion_mask(&gray, &prev, &config).unwrap();
        let combined = combined_mask(&dark, &motion).unwrap();

        assert_eq!(core::count_non_zero(&combined).unwrap(), 0);
    }

    #[test]
    fn candidate_selection_filters_by_area_and_takes_first_match() {
        let contours: Vector<Vector<Point>> = Vector::from_iter([
            rect_contour(Rect::new(0, 0, 5, 5)),    // 25 px², below the floor
            rect_contour(Rect::new(10, 10, 20, 20)), // first qualifying
            rect_contour(Rect::new(40, 40, 30, 30)), // larger, but never reached
        ]);
        let region = Region::new(100, 50, 80, 80);

        let candidate = select_candidate(&contours, 200.0, region, DetectionPath::Motion)
            .unwrap()
            .unwrap();

        assert_eq!(candidate.bbox, Rect::new(110, 60, 20, 20));
        assert_eq!(candidate.centroid, Point::new(120, 70));
        assert_eq!(candidate.path, DetectionPath::Motion);
    }

    #[test]
    fn no_qualifying_contour_yields_none() {
        let contours: Vector<Vector<Point>> =
            Vector::from_iter([rect_contour(Rect::new(0, 0, 5, 5))]);
        let region = Region::new(0, 0, 80, 80);

        let candidate =
            select_candidate(&contours, 200.0, region, DetectionPath::Fallback).unwrap();
        assert!(candidate.is_none());
    }

    #[test]
    fn moving_dark_square_survives_the_full_mask_chain() {
        let config = DetectorConfig {
            min_motion_area: 5.0,
            ..DetectorConfig::default()
        };
        let prev = gray_with_square(80, Rect::new(20, 20, 24, 24), 20);
        let gray = gray_with_square(80, Rect::new(30, 30, 24, 24), 20);

        let dark = darkness_mask(&gray, &config).unwrap();
        let motion = motion_mask(&gray, &prev, &config).unwrap();
        let combined = combined_mask(&dark, &motion).unwrap();
        let contours = external_contours(&combined).unwrap();
        let region = Region::new(0, 0, 80, 80);

        let candidate = select_candidate(&contours, config.min_motion_area, region, DetectionPath::Motion)
            .unwrap()
            .expect("moving dark square should be detected");
        assert!(candidate.area >= config.min_motion_area);
    }
}
