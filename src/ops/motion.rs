// ============================================================================
// MOTION SUPERVISION — directional L1 loss that walks content toward targets
// ============================================================================
//
// For every handle point still farther than one pixel from its target, the
// features on a small disk around the point are pulled toward the features
// found one unit step *behind* them along the drag direction. Matching
// F(q) to F(q - d) translates the content by +d. The shifted samples are a
// fixed target: gradients only flow into the unshifted features.
//
// All gradients here are with respect to the feature map resized to full
// image resolution; the caller maps them back through the resize and the
// generator.

use ndarray::Array3;

use crate::config::{Mask, Point};
use crate::error::{DragError, Result};
use crate::ops::resample::sample_bilinear;

/// Pixels strictly inside the disk of `radius` around `center`, clipped to
/// the image. Only the clipped bounding square is visited.
pub fn disk_pixels(center: &Point, radius: usize, height: usize, width: usize) -> Vec<(usize, usize)> {
    let (row, col) = (center.row as usize, center.col as usize);
    let limit = (radius as u64).saturating_mul(radius as u64);
    let rows = row.saturating_sub(radius)..row.saturating_add(radius).saturating_add(1).min(height);
    let cols = col.saturating_sub(radius)..col.saturating_add(radius).saturating_add(1).min(width);
    let mut out = Vec::new();
    for r in rows {
        let dr = r.abs_diff(row) as u64;
        for c in cols.clone() {
            let dc = c.abs_diff(col) as u64;
            if dr * dr + dc * dc < limit {
                out.push((r, c));
            }
        }
    }
    out
}

/// Distance under which a point counts as arrived, for a square image of
/// side `resolution`.
pub fn stop_threshold(resolution: usize) -> f32 {
    (2.0 / 512.0 * resolution as f32).max(2.0)
}

/// Loss value, its gradient, and the arrival verdict for one drag step.
#[derive(Debug)]
pub struct MotionOutcome {
    pub loss: f32,
    /// d(loss)/d(feature map), same shape as the resized map.
    pub grad: Array3<f32>,
    /// True when every point is within [`stop_threshold`] of its target.
    pub converged: bool,
    /// Distance from each point to its target, in input order.
    pub distances: Vec<f32>,
}

/// Motion term summed over all points.
pub fn motion_loss(
    feat: &Array3<f32>,
    points: &[Point],
    targets: &[Point],
    radius: usize,
) -> Result<MotionOutcome> {
    if points.len() != targets.len() {
        return Err(DragError::runtime(format!(
            "{} points but {} targets",
            points.len(),
            targets.len()
        )));
    }
    let (channels, height, width) = feat.dim();
    let threshold = stop_threshold(height);

    let mut grad = Array3::<f32>::zeros(feat.dim());
    let mut loss = 0.0f32;
    let mut converged = true;
    let mut distances = Vec::with_capacity(points.len());

    for (point, target) in points.iter().zip(targets) {
        if !point.in_bounds(height, width) {
            return Err(DragError::runtime(format!(
                "point {} lies outside the {}x{} image",
                point, height, width
            )));
        }
        let (d_row, d_col) = point.displacement_to(target);
        let dist = (d_row * d_row + d_col * d_col).sqrt();
        distances.push(dist);
        if dist > threshold {
            converged = false;
        }
        if dist <= 1.0 {
            continue;
        }

        let unit = (d_row / (dist + 1e-7), d_col / (dist + 1e-7));
        let neighbourhood = disk_pixels(point, radius, height, width);
        if neighbourhood.is_empty() {
            continue;
        }

        let n = (channels * neighbourhood.len()) as f32;
        let mut term = 0.0f32;
        for &(r, c) in &neighbourhood {
            let shifted = sample_bilinear(feat, r as f32 - unit.0, c as f32 - unit.1);
            for ch in 0..channels {
                let diff = feat[[ch, r, c]] - shifted[ch];
                term += diff.abs();
                grad[[ch, r, c]] += sign(diff) / n;
            }
        }
        loss += term / n;
    }

    Ok(MotionOutcome { loss, grad, converged, distances })
}

/// Adds `weight * mean(|mask * (feat - snapshot)|)` to the loss and its
/// gradient into `grad`. Returns the weighted term; unusable masks add zero.
pub fn mask_loss(
    feat: &Array3<f32>,
    snapshot: &Array3<f32>,
    mask: &Mask,
    weight: f32,
    grad: &mut Array3<f32>,
) -> Result<f32> {
    if !mask.is_usable() {
        return Ok(0.0);
    }
    let (channels, height, width) = feat.dim();
    if snapshot.dim() != feat.dim() {
        return Err(DragError::runtime(format!(
            "feature snapshot {:?} does not match feature map {:?}",
            snapshot.dim(),
            feat.dim()
        )));
    }
    if mask.dim() != (height, width) {
        return Err(DragError::runtime(format!(
            "mask is {:?}, image is {}x{}",
            mask.dim(),
            height,
            width
        )));
    }

    let n = (channels * height * width) as f32;
    let mut sum = 0.0f32;
    for ((r, c), &m) in mask.0.indexed_iter() {
        if m == 0.0 {
            continue;
        }
        for ch in 0..channels {
            let diff = feat[[ch, r, c]] - snapshot[[ch, r, c]];
            sum += diff.abs();
            grad[[ch, r, c]] += weight * sign(diff) / n;
        }
    }
    Ok(weight * sum / n)
}

pub(crate) fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn ramp_cols(h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((1, h, w), |(_, _, c)| c as f32)
    }

    #[test]
    fn disk_is_strict() {
        let c = Point::new(10, 10);
        assert!(disk_pixels(&c, 0, 32, 32).is_empty());
        assert_eq!(disk_pixels(&c, 1, 32, 32), vec![(10, 10)]);
        // radius 2: centre, 4 neighbours, 4 diagonals
        assert_eq!(disk_pixels(&c, 2, 32, 32).len(), 9);
    }

    #[test]
    fn disk_is_clipped_to_the_image() {
        // radius 2 at a corner keeps the centre, two neighbours, one diagonal
        assert_eq!(disk_pixels(&Point::new(0, 0), 2, 32, 32), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(disk_pixels(&Point::new(3, 3), 4000, 8, 8).len(), 64);
        assert_eq!(disk_pixels(&Point::new(7, 0), usize::MAX, 8, 8).len(), 64);
    }

    #[test]
    fn huge_radius_is_bounded_by_the_map() {
        let feat = ramp_cols(8, 8);
        let out = motion_loss(&feat, &[Point::new(4, 4)], &[Point::new(4, 7)], usize::MAX).unwrap();
        assert!(!out.converged);
        assert!(out.loss.is_finite() && out.loss > 0.0);
        // every pixel of the map is in the neighbourhood
        assert!(out.grad.iter().filter(|&&g| g != 0.0).count() > 32);
    }

    #[test]
    fn threshold_has_two_pixel_floor() {
        assert_eq!(stop_threshold(256), 2.0);
        assert_eq!(stop_threshold(512), 2.0);
        assert_eq!(stop_threshold(1024), 4.0);
    }

    #[test]
    fn arrived_points_converge_without_loss() {
        let feat = ramp_cols(32, 32);
        let p = [Point::new(10, 10)];
        let out = motion_loss(&feat, &p, &p, 2).unwrap();
        assert!(out.converged);
        assert_eq!(out.loss, 0.0);
        assert!(out.grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn within_threshold_but_beyond_one_pixel_still_pulls() {
        let feat = ramp_cols(32, 32);
        let out = motion_loss(&feat, &[Point::new(10, 10)], &[Point::new(10, 12)], 2).unwrap();
        assert!(out.converged);
        assert!(out.loss > 0.0);
    }

    #[test]
    fn gradient_points_against_drag_direction_on_a_ramp() {
        // Dragging right on an increasing ramp: the shifted target is one
        // column to the left, so features must decrease -> positive gradient.
        let feat = ramp_cols(32, 32);
        let out = motion_loss(&feat, &[Point::new(16, 16)], &[Point::new(16, 26)], 2).unwrap();
        assert!(!out.converged);
        assert!((out.loss - 1.0).abs() < 1e-4, "loss {}", out.loss);
        assert!(out.grad[[0, 16, 16]] > 0.0);
        assert_eq!(out.grad[[0, 0, 0]], 0.0);
        assert_eq!(out.distances, vec![10.0]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let feat = ramp_cols(8, 8);
        let err = motion_loss(&feat, &[Point::new(1, 1)], &[], 2).unwrap_err();
        assert!(err.to_string().contains("1 points but 0 targets"));
    }

    #[test]
    fn mask_term_only_counts_masked_pixels() {
        let feat = Array3::<f32>::from_elem((2, 4, 4), 1.0);
        let snap = Array3::<f32>::zeros((2, 4, 4));
        let mut m = Array2::<f32>::zeros((4, 4));
        m[[0, 0]] = 1.0;
        m[[3, 3]] = 1.0;
        let mut grad = Array3::<f32>::zeros((2, 4, 4));
        let l = mask_loss(&feat, &snap, &Mask(m), 10.0, &mut grad).unwrap();
        // 2 pixels * 2 channels of |1| over 32 elements, times 10
        assert!((l - 10.0 * 4.0 / 32.0).abs() < 1e-6);
        assert!(grad[[0, 0, 0]] > 0.0);
        assert_eq!(grad[[0, 1, 1]], 0.0);
    }

    #[test]
    fn degenerate_mask_is_ignored() {
        let feat = Array3::<f32>::from_elem((1, 4, 4), 1.0);
        let snap = Array3::<f32>::zeros((1, 4, 4));
        let mut grad = Array3::<f32>::zeros((1, 4, 4));
        let all_ones = Mask(Array2::from_elem((4, 4), 1.0));
        assert_eq!(mask_loss(&feat, &snap, &all_ones, 10.0, &mut grad).unwrap(), 0.0);
    }
}
