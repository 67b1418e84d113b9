// ============================================================================
// POINT TRACKING — nearest-feature search around each handle point
// ============================================================================
//
// Each handle point is relocated to the pixel, inside a square window around
// its previous position, whose feature vector is closest (L2) to the
// reference vector captured when the drag started. Read-only with respect to
// the optimisation: nothing here produces gradients.

use ndarray::{Array1, Array3};
use rayon::prelude::*;

use crate::config::Point;
use crate::error::{DragError, Result};

/// Inclusive-exclusive window `[up, down) x [left, right)` clipped to the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchWindow {
    pub up: usize,
    pub down: usize,
    pub left: usize,
    pub right: usize,
}

impl SearchWindow {
    pub fn around(point: &Point, radius: usize, height: usize, width: usize) -> Self {
        let (row, col) = (point.row as usize, point.col as usize);
        Self {
            up: row.saturating_sub(radius),
            down: row.saturating_add(radius).saturating_add(1).min(height),
            left: col.saturating_sub(radius),
            right: col.saturating_add(radius).saturating_add(1).min(width),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.up >= self.down || self.left >= self.right
    }
}

/// Relocate every point. `feat` is the current feature map resized to full
/// image resolution, `refs[j]` the reference vector for `points[j]`.
///
/// The returned list has the same length and order as `points`. Ties resolve
/// to the first candidate in row-major order.
pub fn track_points(
    feat: &Array3<f32>,
    points: &[Point],
    refs: &[Array1<f32>],
    radius: usize,
) -> Result<Vec<Point>> {
    if points.len() != refs.len() {
        return Err(DragError::runtime(format!(
            "tracking {} points with {} feature references",
            points.len(),
            refs.len()
        )));
    }
    let (channels, height, width) = feat.dim();
    if let Some(r) = refs.iter().find(|r| r.len() != channels) {
        return Err(DragError::runtime(format!(
            "feature reference has {} channels, feature map has {}",
            r.len(),
            channels
        )));
    }

    points
        .par_iter()
        .zip(refs.par_iter())
        .map(|(point, reference)| {
            if !point.in_bounds(height, width) {
                return Err(DragError::runtime(format!(
                    "point {} lies outside the {}x{} image",
                    point, height, width
                )));
            }
            let window = SearchWindow::around(point, radius, height, width);
            Ok(best_match(feat, reference, &window))
        })
        .collect()
}

fn best_match(feat: &Array3<f32>, reference: &Array1<f32>, window: &SearchWindow) -> Point {
    let channels = reference.len();
    let mut best = (f32::INFINITY, window.up, window.left);
    for r in window.up..window.down {
        for c in window.left..window.right {
            let mut sq = 0.0f32;
            for ch in 0..channels {
                let d = feat[[ch, r, c]] - reference[ch];
                sq += d * d;
            }
            let dist = sq.sqrt();
            // Strict comparison keeps the first minimum in scan order.
            if dist < best.0 {
                best = (dist, r, c);
            }
        }
    }
    Point::new(best.1 as u32, best.2 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};

    /// Single-channel map whose value is the Manhattan distance to `peak`.
    fn cone(h: usize, w: usize, peak: (usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn((1, h, w), |(_, r, c)| {
            (r as f32 - peak.0 as f32).abs() + (c as f32 - peak.1 as f32).abs()
        })
    }

    #[test]
    fn window_is_clipped_to_bounds() {
        let w = SearchWindow::around(&Point::new(2, 30), 5, 32, 32);
        assert_eq!(w, SearchWindow { up: 0, down: 8, left: 25, right: 32 });
    }

    #[test]
    fn oversized_radius_covers_the_image() {
        let w = SearchWindow::around(&Point::new(5, 9), usize::MAX, 16, 12);
        assert_eq!(w, SearchWindow { up: 0, down: 16, left: 0, right: 12 });

        let feat = cone(16, 12, (15, 0));
        let refs = [Array1::from_elem(1, 0.0f32)];
        let out = track_points(&feat, &[Point::new(5, 9)], &refs, usize::MAX).unwrap();
        assert_eq!(out, vec![Point::new(15, 0)]);
    }

    #[test]
    fn moves_to_matching_feature_within_window() {
        let feat = cone(32, 32, (12, 9));
        let refs = vec![Array1::from_vec(vec![0.0])];
        let out = track_points(&feat, &[Point::new(10, 10)], &refs, 4).unwrap();
        assert_eq!(out, vec![Point::new(12, 9)]);
    }

    #[test]
    fn match_outside_window_is_not_reached() {
        let feat = cone(32, 32, (25, 25));
        let refs = vec![Array1::from_vec(vec![0.0])];
        let out = track_points(&feat, &[Point::new(5, 5)], &refs, 3).unwrap();
        // closest reachable pixel towards the peak is the window corner
        assert_eq!(out, vec![Point::new(8, 8)]);
    }

    #[test]
    fn ties_resolve_in_row_major_order() {
        let feat = Array3::<f32>::zeros((2, 16, 16));
        let refs = vec![Array1::zeros(2)];
        let out = track_points(&feat, &[Point::new(8, 8)], &refs, 2).unwrap();
        assert_eq!(out, vec![Point::new(6, 6)]);
    }

    #[test]
    fn preserves_length_and_order() {
        let feat = cone(40, 40, (20, 20));
        let pts = vec![Point::new(18, 18), Point::new(0, 39), Point::new(39, 0)];
        let refs = vec![Array1::from_vec(vec![0.0]); 3];
        let out = track_points(&feat, &pts, &refs, 3).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Point::new(20, 20));
        assert!(out.iter().all(|p| p.in_bounds(40, 40)));
    }

    #[test]
    fn rejects_out_of_bounds_points() {
        let feat = Array3::<f32>::zeros((1, 8, 8));
        let refs = vec![Array1::zeros(1)];
        assert!(track_points(&feat, &[Point::new(8, 0)], &refs, 2).is_err());
    }
}
