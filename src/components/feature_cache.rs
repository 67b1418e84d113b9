// ============================================================================
// FEATURE CACHE — reference vectors and the first-frame feature snapshot
// ============================================================================

use ndarray::{Array1, Array3, s};

use crate::config::Point;
use crate::error::{DragError, Result};

/// Per-drag reference data captured on the first drag step after a reset.
///
/// `refs[j]` is the feature vector under `origins[j]` in `snapshot`, and the
/// snapshot (full image resolution) anchors the masked stability loss. Both
/// are read every step and replaced only by [`FeatureCache::clear`] followed
/// by a new capture.
#[derive(Clone, Debug, Default)]
pub struct FeatureCache {
    refs: Vec<Array1<f32>>,
    snapshot: Option<Array3<f32>>,
    origins: Vec<Point>,
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn clear(&mut self) {
        self.refs.clear();
        self.snapshot = None;
        self.origins.clear();
    }

    /// Capture references from `feat` at `points` unless already populated.
    /// Returns true when a capture happened.
    pub fn ensure(&mut self, feat: &Array3<f32>, points: &[Point]) -> Result<bool> {
        if !self.is_empty() {
            return Ok(false);
        }
        let (_, height, width) = feat.dim();
        let mut refs = Vec::with_capacity(points.len());
        for p in points {
            if !p.in_bounds(height, width) {
                return Err(DragError::runtime(format!(
                    "cannot sample features at {} in a {}x{} map",
                    p, height, width
                )));
            }
            refs.push(feat.slice(s![.., p.row as usize, p.col as usize]).to_owned());
        }
        self.refs = refs;
        self.snapshot = Some(feat.clone());
        self.origins = points.to_vec();
        Ok(true)
    }

    pub fn refs(&self) -> &[Array1<f32>] {
        &self.refs
    }

    pub fn snapshot(&self) -> Option<&Array3<f32>> {
        self.snapshot.as_ref()
    }

    /// Where the handle points were when the references were captured.
    pub fn origins(&self) -> &[Point] {
        &self.origins
    }
}
