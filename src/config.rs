// ============================================================================
// RENDER CONFIGURATION — per-call parameters supplied by the UI layer
// ============================================================================

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Pixel coordinate in image space. Row first, matching the (y, x) order the
/// UI hands over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub row: u32,
    pub col: u32,
}

impl Point {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Displacement `(d_row, d_col)` from `self` to `target`.
    pub fn displacement_to(&self, target: &Point) -> (f32, f32) {
        (
            target.row as f32 - self.row as f32,
            target.col as f32 - self.col as f32,
        )
    }

    pub fn distance_to(&self, target: &Point) -> f32 {
        let (dr, dc) = self.displacement_to(target);
        (dr * dr + dc * dc).sqrt()
    }

    pub fn in_bounds(&self, height: usize, width: usize) -> bool {
        (self.row as usize) < height && (self.col as usize) < width
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Noise handling requested from the synthesis network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseMode {
    #[default]
    Const,
    Random,
    None,
}

impl NoiseMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "const" => Some(NoiseMode::Const),
            "random" => Some(NoiseMode::Random),
            "none" => Some(NoiseMode::None),
            _ => None,
        }
    }
}

/// Stability mask at full image resolution. Regions where the mask is 1 are
/// held close to the features of the first drag frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mask(pub Array2<f32>);

impl Mask {
    /// A mask only takes part in the loss when every value is 0 or 1 and both
    /// values occur. All-0 and all-1 masks are ignored.
    pub fn is_usable(&self) -> bool {
        let mut has_zero = false;
        let mut has_one = false;
        for &v in self.0.iter() {
            if v == 0.0 {
                has_zero = true;
            } else if v == 1.0 {
                has_one = true;
            } else {
                return false;
            }
        }
        has_zero && has_one
    }

    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }
}

/// Flat per-call configuration record.
///
/// Every field has a default so a caller can fill in only what it changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderArgs {
    /// Model identifier: a pretrained name, a URL/path, or `procedural[-RES]`.
    pub model: String,
    /// Seed for the initial latent. Default: 0.
    pub w0_seed: u64,
    /// Optimise an independent vector per synthesis layer. Default: true.
    pub w_plus: bool,
    pub noise_mode: NoiseMode,
    /// Truncation strength for the mapping stage. Default: 0.7.
    pub trunc_psi: f32,
    /// Number of layers truncation applies to; `None` = all.
    pub trunc_cutoff: Option<usize>,
    /// Row-major 3x3 geometric transform; inverted before synthesis.
    pub input_transform: Option<[[f64; 3]; 3]>,
    /// Optimizer learning rate. Default: 0.001.
    pub lr: f32,
    pub points: Vec<Point>,
    pub targets: Vec<Point>,
    pub mask: Option<Mask>,
    /// Weight of the masked stability loss. Default: 10.
    pub lambda_mask: f32,
    /// Weight of the latent regularisation. Default: 0.
    pub reg: f32,
    /// Synthesis layer whose features drive tracking and motion. Default: 5.
    pub feature_idx: usize,
    /// Motion neighbourhood radius, relative to a 512px image. Default: 3.
    pub r1: f32,
    /// Tracking search radius, relative to a 512px image. Default: 12.
    pub r2: f32,
    /// Output gain in decibels. Default: 0.
    pub img_scale_db: f32,
    /// Normalise each channel by its peak magnitude before scaling.
    pub img_normalize: bool,
    /// Run tracking + motion supervision this call.
    pub is_drag: bool,
    /// Clear the feature references before this call.
    pub reset: bool,
    /// Force a fresh session (new latent and optimizer).
    pub reset_w: bool,
}

impl Default for RenderArgs {
    fn default() -> Self {
        Self {
            model: "procedural".to_string(),
            w0_seed: 0,
            w_plus: true,
            noise_mode: NoiseMode::Const,
            trunc_psi: 0.7,
            trunc_cutoff: None,
            input_transform: None,
            lr: 0.001,
            points: Vec::new(),
            targets: Vec::new(),
            mask: None,
            lambda_mask: 10.0,
            reg: 0.0,
            feature_idx: 5,
            r1: 3.0,
            r2: 12.0,
            img_scale_db: 0.0,
            img_normalize: false,
            is_drag: false,
            reset: false,
            reset_w: false,
        }
    }
}

impl RenderArgs {
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            model: self.model.clone(),
            seed: self.w0_seed,
            w_plus: self.w_plus,
        }
    }
}

/// Identity of a drag session. A change in any field means the latent code
/// and optimizer must be rebuilt from scratch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub model: String,
    pub seed: u64,
    pub w_plus: bool,
}

/// Decide whether a render call must (re)initialise the session.
pub fn needs_init(prev: Option<&SessionKey>, next: &SessionKey, force: bool) -> bool {
    match prev {
        None => true,
        Some(prev) => force || prev != next,
    }
}
