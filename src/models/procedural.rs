// ============================================================================
// PROCEDURAL GENERATOR — analytic blob field with exact feature gradients
// ============================================================================
//
// A small stand-in for a trained synthesis network. Each of `NUM_BLOBS`
// compactly supported bumps has a centre driven by the coarse latent layers
// and a brightness driven by the fine layers, so dragging a handle on a blob
// moves the blob the way dragging a feature moves content in a real GAN.
//
// Feature channel c of blob k at (transformed) pixel p is
//
//     b(|p - centre_k|) * (s_kc + t_kc * dy / rho + u_kc * dx / rho)
//
// with b(r) = (1 - r^2/rho^2)^2 inside radius rho and 0 outside, on top of a
// weak latent-independent ramp over the whole frame. The linear terms make
// every position distinguishable, which is what the point tracker relies on.
// Everything is differentiable in closed form.

use std::sync::Arc;

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array1, Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use super::{Architecture, Generator, GeneratorInfo, MappingParams, NetworkLoader, Synthesis, SynthesisParams};
use crate::config::NoiseMode;
use crate::error::{DragError, Result};

pub const NUM_BLOBS: usize = 8;
pub const FEATURE_CHANNELS: usize = 16;
pub const NUM_FEATURE_LAYERS: usize = 8;
/// Latent layers that move blobs; the rest only change brightness.
pub const GEOMETRY_LAYERS: usize = 6;
pub const DEFAULT_RESOLUTION: usize = 256;

/// Fixed seed for the network "weights" (signatures and palette).
const WEIGHT_SEED: u64 = 0x5eed_b10b;
const MAPPING_GAIN: f32 = 0.6;
const CONST_NOISE_AMPLITUDE: f32 = 0.02;
const BACKGROUND_GAIN: f32 = 0.05;

/// Per-layer channel signatures, each `(NUM_BLOBS, FEATURE_CHANNELS)`.
struct LayerSignature {
    resolution: usize,
    base: Array2<f32>,
    along_rows: Array2<f32>,
    along_cols: Array2<f32>,
    /// Background ramp per channel, `(2, FEATURE_CHANNELS)`: rows then cols.
    background: Array2<f32>,
}

#[derive(Clone, Copy, Debug)]
struct Blob {
    row: f32,
    col: f32,
    /// d(row)/d(geometry latent) at the current latent.
    drow: f32,
    dcol: f32,
    brightness: f32,
}

pub struct ProceduralGenerator {
    info: GeneratorInfo,
    layers: Vec<LayerSignature>,
    palette: Vec<[f32; 3]>,
    radius: f32,
}

impl ProceduralGenerator {
    pub fn new(resolution: usize) -> Result<Self> {
        if !resolution.is_power_of_two() || !(32..=1024).contains(&resolution) {
            return Err(DragError::ModelLoad(format!(
                "procedural resolution must be a power of two in 32..=1024, got {}",
                resolution
            )));
        }
        let mut rng = Pcg64::seed_from_u64(WEIGHT_SEED);
        let draw = |rng: &mut Pcg64| {
            Array2::from_shape_fn((NUM_BLOBS, FEATURE_CHANNELS), |_| rng.gen_range(-1.0f32..1.0))
        };
        let layers = (0..NUM_FEATURE_LAYERS)
            .map(|l| LayerSignature {
                resolution: (16usize << (l / 2)).min(resolution),
                base: draw(&mut rng),
                along_rows: draw(&mut rng),
                along_cols: draw(&mut rng),
                background: Array2::from_shape_fn((2, FEATURE_CHANNELS), |_| rng.gen_range(-1.0f32..1.0)),
            })
            .collect();
        let palette = (0..NUM_BLOBS)
            .map(|_| [rng.gen_range(-0.6f32..1.0), rng.gen_range(-0.6f32..1.0), rng.gen_range(-0.6f32..1.0)])
            .collect();

        let w_dim = 3 * NUM_BLOBS;
        let num_ws = Architecture::num_ws_for_resolution(resolution);
        let info = GeneratorInfo {
            name: format!("procedural-{}", resolution),
            architecture: Architecture::Procedural,
            img_resolution: resolution,
            z_dim: w_dim,
            w_dim,
            c_dim: 0,
            num_ws,
            num_feature_layers: NUM_FEATURE_LAYERS,
            has_noise: true,
            has_input_transform: true,
        };
        Ok(Self { info, layers, palette, radius: resolution as f32 / 8.0 })
    }

    /// Parse `procedural` or `procedural-<RES>`.
    pub fn from_identifier(identifier: &str) -> Result<Self> {
        let tail = identifier.rsplit('-').next().unwrap_or("");
        if tail.eq_ignore_ascii_case("procedural") || !identifier.contains('-') {
            return Self::new(DEFAULT_RESOLUTION);
        }
        let res: usize = tail.parse().map_err(|_| {
            DragError::ModelLoad(format!("cannot parse a resolution from \"{}\"", identifier))
        })?;
        Self::new(res)
    }

    /// Blob centres `(row, col)` in image pixels for the given latents.
    pub fn blob_centers(&self, ws: &Array2<f32>) -> Result<Vec<(f32, f32)>> {
        Ok(self.blobs(ws)?.iter().map(|b| (b.row, b.col)).collect())
    }

    fn check_ws(&self, ws: &Array2<f32>) -> Result<()> {
        if ws.dim() != (self.info.num_ws, self.info.w_dim) {
            return Err(DragError::runtime(format!(
                "expected ws of shape ({}, {}), got {:?}",
                self.info.num_ws,
                self.info.w_dim,
                ws.dim()
            )));
        }
        Ok(())
    }

    fn geometry_rows(&self) -> usize {
        GEOMETRY_LAYERS.min(self.info.num_ws)
    }

    fn blobs(&self, ws: &Array2<f32>) -> Result<Vec<Blob>> {
        self.check_ws(ws)?;
        let n_geo = self.geometry_rows();
        let n_app = self.info.num_ws - n_geo;
        let res = self.info.img_resolution as f32;
        let half = res / 2.0;
        let spread = 0.8 * half;

        let mean = |rows: std::ops::Range<usize>, d: usize| {
            let n = rows.len().max(1) as f32;
            rows.map(|r| ws[[r, d]]).sum::<f32>() / n
        };

        Ok((0..NUM_BLOBS)
            .map(|k| {
                let tr = mean(0..n_geo, 2 * k).tanh();
                let tc = mean(0..n_geo, 2 * k + 1).tanh();
                let app_rows = if n_app == 0 { 0..n_geo } else { n_geo..self.info.num_ws };
                let a = mean(app_rows, 2 * NUM_BLOBS + k).tanh();
                Blob {
                    row: half + spread * tr,
                    col: half + spread * tc,
                    drow: spread * (1.0 - tr * tr),
                    dcol: spread * (1.0 - tc * tc),
                    brightness: 0.75 + 0.25 * a,
                }
            })
            .collect())
    }

    /// Image-space position seen by the generator for output pixel
    /// `(row, col)` after the input transform.
    fn warp(&self, transform: &Matrix3<f64>, row: f32, col: f32) -> (f32, f32) {
        if *transform == Matrix3::identity() {
            return (row, col);
        }
        let half = self.info.img_resolution as f64 / 2.0;
        let centre = (self.info.img_resolution as f64 - 1.0) / 2.0;
        let u = Vector3::new((col as f64 - centre) / half, (row as f64 - centre) / half, 1.0);
        let v = transform * u;
        let w = if v.z.abs() > 1e-12 { v.z } else { 1.0 };
        ((v.y / w * half + centre) as f32, (v.x / w * half + centre) as f32)
    }

    /// Bump value and its derivative factor `4 (1 - q) / rho^2` at offset
    /// `(dy, dx)`; `None` outside the support.
    fn bump(&self, dy: f32, dx: f32) -> Option<(f32, f32)> {
        let rho2 = self.radius * self.radius;
        let q = (dy * dy + dx * dx) / rho2;
        if q >= 1.0 {
            return None;
        }
        let one_minus = 1.0 - q;
        Some((one_minus * one_minus, 4.0 * one_minus / rho2))
    }

    /// Output pixel `(i, j)` of a `size`-wide layer in image coordinates.
    fn layer_to_image(&self, size: usize, i: usize, j: usize) -> (f32, f32) {
        let scale = self.info.img_resolution as f32 / size as f32;
        ((i as f32 + 0.5) * scale - 0.5, (j as f32 + 0.5) * scale - 0.5)
    }

    fn feature_layer(&self, sig: &LayerSignature, blobs: &[Blob], transform: &Matrix3<f64>) -> Array3<f32> {
        let size = sig.resolution;
        let res = self.info.img_resolution as f32;
        let mut out = Array3::<f32>::zeros((FEATURE_CHANNELS, size, size));
        for i in 0..size {
            for j in 0..size {
                let (r, c) = self.layer_to_image(size, i, j);
                let (pr, pc) = self.warp(transform, r, c);
                let (gy, gx) = (pr / res - 0.5, pc / res - 0.5);
                for ch in 0..FEATURE_CHANNELS {
                    out[[ch, i, j]] =
                        BACKGROUND_GAIN * (sig.background[[0, ch]] * gy + sig.background[[1, ch]] * gx);
                }
                for (k, blob) in blobs.iter().enumerate() {
                    let (dy, dx) = (pr - blob.row, pc - blob.col);
                    let Some((b, _)) = self.bump(dy, dx) else { continue };
                    for ch in 0..FEATURE_CHANNELS {
                        let h = sig.base[[k, ch]]
                            + sig.along_rows[[k, ch]] * dy / self.radius
                            + sig.along_cols[[k, ch]] * dx / self.radius;
                        out[[ch, i, j]] += b * h;
                    }
                }
            }
        }
        out
    }

    fn render_image(&self, blobs: &[Blob], params: &SynthesisParams) -> Array3<f32> {
        let res = self.info.img_resolution;
        let mut noise_rng = match params.noise_mode {
            NoiseMode::Const => Some(Pcg64::seed_from_u64(WEIGHT_SEED ^ 0xfeed)),
            NoiseMode::Random => Some(Pcg64::from_entropy()),
            NoiseMode::None => None,
        };
        let mut img = Array3::<f32>::zeros((3, res, res));
        for r in 0..res {
            for c in 0..res {
                let (pr, pc) = self.warp(&params.input_transform, r as f32, c as f32);
                let mut acc = [-0.8f32; 3];
                for (k, blob) in blobs.iter().enumerate() {
                    if let Some((b, _)) = self.bump(pr - blob.row, pc - blob.col) {
                        for ch in 0..3 {
                            acc[ch] += b * (self.palette[k][ch] + 0.8) * blob.brightness;
                        }
                    }
                }
                let grain = noise_rng
                    .as_mut()
                    .map(|rng| rng.gen_range(-CONST_NOISE_AMPLITUDE..CONST_NOISE_AMPLITUDE))
                    .unwrap_or(0.0);
                for ch in 0..3 {
                    img[[ch, r, c]] = (acc[ch] + grain).clamp(-1.0, 1.0);
                }
            }
        }
        img
    }
}

impl Generator for ProceduralGenerator {
    fn info(&self) -> &GeneratorInfo {
        &self.info
    }

    fn mapping(&self, z: &Array1<f32>, label: &Array1<f32>, params: &MappingParams) -> Result<Array2<f32>> {
        if z.len() != self.info.z_dim {
            return Err(DragError::runtime(format!(
                "z has {} entries, mapping expects {}",
                z.len(),
                self.info.z_dim
            )));
        }
        if label.len() != self.info.c_dim {
            return Err(DragError::runtime(format!(
                "label has {} entries, mapping expects {}",
                label.len(),
                self.info.c_dim
            )));
        }
        let cutoff = params.truncation_cutoff.unwrap_or(self.info.num_ws);
        // The average latent of this mapping is the origin.
        Ok(Array2::from_shape_fn((self.info.num_ws, self.info.w_dim), |(row, d)| {
            let w = MAPPING_GAIN * z[d];
            if row < cutoff { params.truncation_psi * w } else { w }
        }))
    }

    fn synthesis(&self, ws: &Array2<f32>, params: &SynthesisParams) -> Result<Synthesis> {
        let blobs = self.blobs(ws)?;
        let features = self
            .layers
            .iter()
            .map(|sig| self.feature_layer(sig, &blobs, &params.input_transform))
            .collect();
        let image = self.render_image(&blobs, params);
        Ok(Synthesis { image, features })
    }

    fn feature_vjp(
        &self,
        ws: &Array2<f32>,
        params: &SynthesisParams,
        layer: usize,
        grad: &Array3<f32>,
    ) -> Result<Array2<f32>> {
        let sig = self.layers.get(layer).ok_or_else(|| {
            DragError::runtime(format!(
                "feature layer {} out of range (network has {})",
                layer, NUM_FEATURE_LAYERS
            ))
        })?;
        let size = sig.resolution;
        if grad.dim() != (FEATURE_CHANNELS, size, size) {
            return Err(DragError::runtime(format!(
                "gradient {:?} does not match feature layer {} ({}, {}, {})",
                grad.dim(),
                layer,
                FEATURE_CHANNELS,
                size,
                size
            )));
        }
        let blobs = self.blobs(ws)?;

        // d loss / d centre, per blob
        let mut d_centre = vec![(0.0f32, 0.0f32); NUM_BLOBS];
        for i in 0..size {
            for j in 0..size {
                let (r, c) = self.layer_to_image(size, i, j);
                let (pr, pc) = self.warp(&params.input_transform, r, c);
                for (k, blob) in blobs.iter().enumerate() {
                    let (dy, dx) = (pr - blob.row, pc - blob.col);
                    let Some((b, db)) = self.bump(dy, dx) else { continue };
                    for ch in 0..FEATURE_CHANNELS {
                        let g = grad[[ch, i, j]];
                        if g == 0.0 {
                            continue;
                        }
                        let t = sig.along_rows[[k, ch]];
                        let u = sig.along_cols[[k, ch]];
                        let h = sig.base[[k, ch]] + t * dy / self.radius + u * dx / self.radius;
                        d_centre[k].0 += g * (db * dy * h - b * t / self.radius);
                        d_centre[k].1 += g * (db * dx * h - b * u / self.radius);
                    }
                }
            }
        }

        let n_geo = self.geometry_rows();
        let mut out = Array2::<f32>::zeros(ws.dim());
        for (k, blob) in blobs.iter().enumerate() {
            let gr = d_centre[k].0 * blob.drow / n_geo as f32;
            let gc = d_centre[k].1 * blob.dcol / n_geo as f32;
            for row in 0..n_geo {
                out[[row, 2 * k]] = gr;
                out[[row, 2 * k + 1]] = gc;
            }
        }
        Ok(out)
    }
}

/// Loader registered for [`Architecture::Procedural`].
pub struct ProceduralLoader;

impl NetworkLoader for ProceduralLoader {
    fn load(&self, identifier: &str) -> Result<Arc<dyn Generator>> {
        Ok(Arc::new(ProceduralGenerator::from_identifier(identifier)?))
    }
}
