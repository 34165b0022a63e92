use std::collections::VecDeque;

use anyhow::Result;
use opencv::core::{Mat, Point, Rect};

use crate::detect::{self, Candidate, DetectionPath, DetectorConfig};
use crate::region::Region;

/// Most-recent centroid positions kept for the trail overlay.
pub const TRAIL_CAPACITY: usize = 50;

/// Consecutive no-detection frames after which the track is considered lost.
/// Observational only; crossing it logs a warning and nothing else.
pub const NO_MOVEMENT_CEILING: u32 = 90;

/// The only cross-frame memory in the system: last bounding box, bounded
/// centroid trail, stillness counter and the previous frame's region
/// grayscale. Owned by the per-video run loop and fed into [`TrackState::step`]
/// once per frame.
pub struct TrackState {
    pub last_bbox: Option<Rect>,
    pub trail: VecDeque<Point>,
    pub no_movement_frames: u32,
    prev_gray: Option<Mat>,
    lost_track_reported: bool,
}

impl TrackState {
    pub fn new() -> Self {
        Self {
            last_bbox: None,
            trail: VecDeque::with_capacity(TRAIL_CAPACITY),
            no_movement_frames: 0,
            prev_gray: None,
            lost_track_reported: false,
        }
    }

    /// Runs the full per-frame transition: detect, reconcile, update memory.
    ///
    /// The first processed frame only seeds the previous-grayscale buffer and
    /// never yields a detection. On later frames the motion path (darkness
    /// AND frame-diff) is tried first; if it produces no area-qualified blob,
    /// the darkness-only fallback keeps a motionless subject from being lost.
    pub fn step(
        &mut self,
        frame: &Mat,
        region: Region,
        config: &DetectorConfig,
    ) -> Result<Option<Candidate>> {
        let gray = detect::grayscale_region(frame, region)?;

        let Some(prev_gray) = self.prev_gray.take() else {
            self.prev_gray = Some(gray);
            return Ok(None);
        };

        let dark = detect::darkness_mask(&gray, config)?;
        let motion = detect::motion_mask(&gray, &prev_gray, config)?;
        let combined = detect::combined_mask(&dark, &motion)?;

        let contours = detect::external_contours(&combined)?;
        let mut candidate = detect::select_candidate(
            &contours,
            config.min_motion_area,
            region,
            DetectionPath::Motion,
        )?;

        if candidate.is_none() {
            let fallback_contours = detect::external_contours(&dark)?;
            candidate = detect::select_candidate(
                &fallback_contours,
                config.min_fallback_area,
                region,
                DetectionPath::Fallback,
            )?;
        }

        match &candidate {
            Some(found) => self.apply_detection(found),
            None => self.apply_miss(),
        }

        self.prev_gray = Some(gray);
        Ok(candidate)
    }

    fn apply_detection(&mut self, candidate: &Candidate) {
        self.trail.push_back(candidate.centroid);
        if self.trail.len() > TRAIL_CAPACITY {
            self.trail.pop_front();
        }
        self.last_bbox = Some(candidate.bbox);
        self.no_movement_frames = 0;
        self.lost_track_reported = false;
    }

    fn apply_miss(&mut self) {
        self.no_movement_frames += 1;
        if self.no_movement_frames > NO_MOVEMENT_CEILING && !self.lost_track_reported {
            tracing::warn!(
                "no detection for {} consecutive frames, track may be lost",
                self.no_movement_frames
            );
            self.lost_track_reported = true;
        }
    }
}

impl Default for TrackState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{self, Scalar, Vec3b};
    use opencv::prelude::*;

    fn candidate_at(x: i32, y: i32) -> Candidate {
        Candidate {
            bbox: Rect::new(x - 5, y - 5, 10, 10),
            centroid: Point::new(x, y),
            area: 100.0,
            path: DetectionPath::Motion,
        }
    }

    /// 100x100 BGR frame, bright background, dark square at `pos`.
    fn frame_with_square(pos: Option<(i32, i32)>) -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(100, 100, core::CV_8UC3, Scalar::all(200.0)).unwrap();
        if let Some((sx, sy)) = pos {
            for y in sy..sy + 20 {
                for x in sx..sx + 20 {
                    *frame.at_2d_mut::<Vec3b>(y, x).unwrap() = Vec3b::from([20, 20, 20]);
                }
            }
        }
        frame
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            min_motion_area: 5.0,
            min_fallback_area: 40.0,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn trail_is_bounded_and_evicts_oldest_first() {
        let mut state = TrackState::new();
        for i in 0..80 {
            state.apply_detection(&candidate_at(10 + i, 10));
        }

        assert_eq!(state.trail.len(), TRAIL_CAPACITY);
        // 80 detections, capacity 50: the first kept centroid is number 30.
        assert_eq!(state.trail.front().unwrap().x, 10 + 30);
        assert_eq!(state.trail.back().unwrap().x, 10 + 79);
    }

    #[test]
    fn misses_only_increment_the_stillness_counter() {
        let mut state = TrackState::new();
        state.apply_detection(&candidate_at(10, 10));
        let bbox = state.last_bbox;

        for _ in 0..5 {
            state.apply_miss();
        }

        assert_eq!(state.no_movement_frames, 5);
        assert_eq!(state.trail.len(), 1);
        assert_eq!(state.last_bbox, bbox);

        state.apply_detection(&candidate_at(11, 10));
        assert_eq!(state.no_movement_frames, 0);
    }

    #[test]
    fn empty_frames_count_all_but_the_first() {
        let mut state = TrackState::new();
        let region = Region::new(25, 25, 50, 50);
        let config = test_config();

        for _ in 0..10 {
            let frame = frame_with_square(None);
            let candidate = state.step(&frame, region, &config).unwrap();
            assert!(candidate.is_none());
        }

        assert_eq!(state.no_movement_frames, 9);
        assert!(state.trail.is_empty());
        assert!(state.last_bbox.is_none());
    }

    #[test]
    fn moving_square_is_tracked_through_the_motion_path() {
        let mut state = TrackState::new();
        let region = Region::new(5, 5, 90, 90);
        let config = test_config();
        let mut detections = 0u32;

        // Fast diagonal motion: the frame-diff strips are wide enough to
        // survive the morphological opening, so the motion path fires.
        for i in 0..9 {
            let frame = frame_with_square(Some((10 + 8 * i, 10 + 8 * i)));
            if let Some(candidate) = state.step(&frame, region, &config).unwrap() {
                detections += 1;
                assert_eq!(candidate.path, DetectionPath::Motion);
                // Centroids come back in full-frame coordinates.
                assert!(candidate.centroid.x > region.x);
                assert!(candidate.centroid.y > region.y);
            }
        }

        assert!(detections >= 7, "expected steady detections, got {detections}");
        assert_eq!(state.trail.len() as u32, detections);
        assert_eq!(state.no_movement_frames, 0);
    }

    #[test]
    fn frozen_square_is_recovered_by_the_fallback_path() {
        let mut state = TrackState::new();
        let region = Region::new(25, 25, 50, 50);
        let config = test_config();

        for i in 0..10 {
            let frame = frame_with_square(Some((30 + i, 30 + i)));
            state.step(&frame, region, &config).unwrap();
        }

        // Square stops dead: no motion signal, darkness-only path takes over.
        let mut fallback_hits = 0u32;
        for _ in 0..10 {
            let frame = frame_with_square(Some((39, 39)));
            if let Some(candidate) = state.step(&frame, region, &config).unwrap() {
                assert_eq!(candidate.path, DetectionPath::Fallback);
                fallback_hits += 1;
            }
        }

        assert!(fallback_hits >= 9, "fallback should keep locating the still square");
        assert_eq!(state.no_movement_frames, 0);
    }

    #[test]
    fn trail_caps_at_fifty_points_over_a_long_run() {
        let mut state = TrackState::new();
        let region = Region::new(0, 0, 100, 100);
        let config = test_config();

        for i in 0..120 {
            // Bounce the square so it keeps moving inside the region.
            let offset = (i % 60) as i32;
            let frame = frame_with_square(Some((10 + offset, 10 + offset / 2)));
            state.step(&frame, region, &config).unwrap();
            assert!(state.trail.len() <= TRAIL_CAPACITY);
        }

        assert_eq!(state.trail.len(), TRAIL_CAPACITY);
    }
}
