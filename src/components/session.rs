// ============================================================================
// DRAG SESSION — latent code, optimizer and feature cache for one image
// ============================================================================
//
// Lifecycle:
//   init()                 fresh latent from (model, seed), fresh optimizer,
//                          empty feature cache
//   update_lr()            new optimizer, latent and cache kept
//   update_optim_space()   latent rebuilt from the base latent, cache cleared
//   drag_step(reset)       cache cleared, latent and optimizer kept
//
// Only the first OPTIMIZED_LAYERS synthesis layers are ever optimised; the
// remaining layers always come from the base latent.

use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Axis, s};
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rand_pcg::Pcg64;
use uuid::Uuid;

use crate::components::feature_cache::FeatureCache;
use crate::config::{Mask, NoiseMode, Point, SessionKey};
use crate::error::{DragError, Result};
use crate::models::{invert_transform, Generator, GeneratorInfo, MappingParams, SynthesisParams};
use crate::ops::motion::{mask_loss, motion_loss, sign};
use crate::ops::optim::Adam;
use crate::ops::resample::{resize_bilinear, resize_bilinear_adjoint};
use crate::ops::scaled_radius;
use crate::ops::tracking::track_points;
use crate::{log_info, log_warn};

/// Synthesis layers whose latents take part in the optimisation.
pub const OPTIMIZED_LAYERS: usize = 6;

/// Everything needed to build a session besides the network itself.
#[derive(Clone, Debug)]
pub struct InitParams {
    pub seed: u64,
    pub w_plus: bool,
    pub lr: f32,
    pub mapping: MappingParams,
    pub noise_mode: NoiseMode,
    pub input_transform: Option<[[f64; 3]; 3]>,
}

/// Per-call drag inputs.
#[derive(Clone, Copy, Debug)]
pub struct DragParams<'a> {
    pub points: &'a [Point],
    pub targets: &'a [Point],
    pub mask: Option<&'a Mask>,
    pub lambda_mask: f32,
    pub reg: f32,
    pub feature_idx: usize,
    pub r1: f32,
    pub r2: f32,
    pub is_drag: bool,
    pub reset: bool,
}

/// Result of one [`DragSession::drag_step`].
#[derive(Clone, Debug)]
pub struct StepOutput {
    /// Raw `(C, H, W)` synthesis output, rendered from the latent as it was
    /// *before* this step's update.
    pub image: Array3<f32>,
    /// Tracked points; `None` when not dragging.
    pub points: Option<Vec<Point>>,
    /// Convergence verdict; `None` when not dragging.
    pub stop: Option<bool>,
    pub loss: Option<f32>,
}

pub struct DragSession {
    id: Uuid,
    key: SessionKey,
    generator: Arc<dyn Generator>,
    synthesis: SynthesisParams,
    /// Base latent, `(num_ws, w_dim)`. Never modified.
    w0: Array2<f32>,
    /// Optimised latent: `(num_ws, w_dim)` in W+ mode, `(1, w_dim)` otherwise.
    w: Array2<f32>,
    w_plus: bool,
    optimizer: Adam,
    cache: FeatureCache,
    points: Option<Vec<Point>>,
    converged: bool,
}

impl DragSession {
    /// Build a session. The second value is a non-fatal problem (a singular
    /// input transform, replaced by identity) that the caller should report.
    pub fn init(
        generator: Arc<dyn Generator>,
        key: SessionKey,
        params: &InitParams,
    ) -> Result<(Self, Option<DragError>)> {
        let info = generator.info().clone();
        let mut warning = None;

        let mut synthesis = SynthesisParams { noise_mode: params.noise_mode, ..Default::default() };
        if info.has_input_transform
            && let Some(m) = &params.input_transform
        {
            match invert_transform(m) {
                Ok(inv) => synthesis.input_transform = inv,
                Err(e) => {
                    log_warn!("{}; falling back to identity", e);
                    warning = Some(e);
                }
            }
        }

        let mut rng = Pcg64::seed_from_u64(params.seed);
        let z: Array1<f32> = Array1::from_shape_fn(info.z_dim, |_| StandardNormal.sample(&mut rng));
        let label = Array1::<f32>::zeros(info.c_dim);
        let ws = generator.mapping(&z, &label, &params.mapping)?;
        if ws.dim() != (info.num_ws, info.w_dim) {
            return Err(DragError::runtime(format!(
                "mapping returned {:?}, expected ({}, {})",
                ws.dim(),
                info.num_ws,
                info.w_dim
            )));
        }

        let w = Self::optimisable_from(&ws, params.w_plus);
        let session = Self {
            id: Uuid::new_v4(),
            key,
            generator,
            synthesis,
            w0: ws,
            w,
            w_plus: params.w_plus,
            optimizer: Adam::new(params.lr),
            cache: FeatureCache::new(),
            points: None,
            converged: false,
        };
        log_info!(
            "Session {} initialised: {} seed={} w_plus={} lr={}",
            session.id,
            info.name,
            params.seed,
            params.w_plus,
            params.lr
        );
        Ok((session, warning))
    }

    fn optimisable_from(w0: &Array2<f32>, w_plus: bool) -> Array2<f32> {
        if w_plus { w0.clone() } else { w0.slice(s![0..1, ..]).to_owned() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn info(&self) -> &GeneratorInfo {
        self.generator.info()
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    pub fn latent(&self) -> &Array2<f32> {
        &self.w
    }

    pub fn base_latent(&self) -> &Array2<f32> {
        &self.w0
    }

    pub fn w_plus(&self) -> bool {
        self.w_plus
    }

    pub fn lr(&self) -> f32 {
        self.optimizer.lr()
    }

    /// Updates applied by the current optimizer instance.
    pub fn optimizer_steps(&self) -> u32 {
        self.optimizer.steps()
    }

    pub fn feature_cache(&self) -> &FeatureCache {
        &self.cache
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Point list seen on the most recent call.
    pub fn points(&self) -> Option<&[Point]> {
        self.points.as_deref()
    }

    /// Replace the optimizer; latent and feature cache are kept.
    pub fn update_lr(&mut self, lr: f32) {
        self.optimizer = Adam::new(lr);
        log_info!("Rebuild optimizer with lr: {} (feature references kept)", lr);
    }

    /// Switch between one shared latent and per-layer latents. Returns false
    /// (and changes nothing) when already in the requested mode.
    pub fn update_optim_space(&mut self, w_plus: bool) -> bool {
        if self.w_plus == w_plus {
            log_info!("Optimisation space unchanged, w_plus: {}", w_plus);
            return false;
        }
        let lr = self.optimizer.lr();
        self.w_plus = w_plus;
        self.key.w_plus = w_plus;
        self.w = Self::optimisable_from(&self.w0, w_plus);
        self.optimizer = Adam::new(lr);
        self.cache.clear();
        log_info!(
            "Change optimisation space, w_plus: {}; rebuilt optimizer with lr {}, cleared feature references",
            w_plus,
            lr
        );
        true
    }

    /// Install latents saved from an earlier run of the same key.
    pub fn restore_latents(&mut self, w: Array2<f32>, w0: Array2<f32>) -> Result<()> {
        if w0.dim() != self.w0.dim() {
            return Err(DragError::runtime(format!(
                "saved base latent {:?} does not match network ({:?})",
                w0.dim(),
                self.w0.dim()
            )));
        }
        let expected = Self::optimisable_from(&w0, self.w_plus).dim();
        if w.dim() != expected {
            return Err(DragError::runtime(format!(
                "saved latent {:?} does not match {:?}",
                w.dim(),
                expected
            )));
        }
        self.w0 = w0;
        self.w = w;
        self.optimizer = Adam::new(self.optimizer.lr());
        self.cache.clear();
        Ok(())
    }

    /// Full per-layer latent fed to synthesis.
    pub fn compose_ws(&self) -> Array2<f32> {
        let n_opt = OPTIMIZED_LAYERS.min(self.w0.nrows());
        let mut ws = self.w0.clone();
        for r in 0..n_opt {
            let src = if self.w_plus { self.w.row(r) } else { self.w.row(0) };
            ws.row_mut(r).assign(&src);
        }
        ws
    }

    /// Fold a gradient on the composed latent back onto the optimised one.
    fn reduce_to_latent(&self, grad_ws: &Array2<f32>) -> Array2<f32> {
        let n_opt = OPTIMIZED_LAYERS.min(grad_ws.nrows());
        if self.w_plus {
            let mut g = Array2::<f32>::zeros(self.w.dim());
            g.slice_mut(s![0..n_opt, ..]).assign(&grad_ws.slice(s![0..n_opt, ..]));
            g
        } else {
            grad_ws.slice(s![0..n_opt, ..]).sum_axis(Axis(0)).insert_axis(Axis(0))
        }
    }

    /// Synthesise one frame and, when dragging, track points and take one
    /// optimisation step toward the targets.
    pub fn drag_step(&mut self, p: &DragParams<'_>) -> Result<StepOutput> {
        let ws = self.compose_ws();

        let mut reset = p.reset;
        if let Some(prev) = &self.points
            && prev.len() != p.points.len()
        {
            reset = true;
        }
        if reset && !self.cache.is_empty() {
            self.cache.clear();
            log_info!("Cleared feature references");
        }
        self.points = Some(p.points.to_vec());

        let synth = self.generator.synthesis(&ws, &self.synthesis)?;
        if !p.is_drag {
            return Ok(StepOutput { image: synth.image, points: None, stop: None, loss: None });
        }

        if p.points.len() != p.targets.len() {
            return Err(DragError::runtime(format!(
                "{} points but {} targets",
                p.points.len(),
                p.targets.len()
            )));
        }
        let layer = synth.features.get(p.feature_idx).ok_or_else(|| {
            DragError::runtime(format!(
                "feature_idx {} out of range ({} feature layers)",
                p.feature_idx,
                synth.features.len()
            ))
        })?;
        let (_, height, width) = synth.image.dim();
        let (_, layer_h, layer_w) = layer.dim();
        let feat = resize_bilinear(layer, height, width)?;

        self.cache.ensure(&feat, p.points)?;

        let tracked = track_points(&feat, p.points, self.cache.refs(), scaled_radius(p.r2, height))?;
        self.points = Some(tracked.clone());

        let motion = motion_loss(&feat, &tracked, p.targets, scaled_radius(p.r1, height))?;
        let mut loss = motion.loss;
        let mut grad_feat = motion.grad;
        if let (Some(mask), Some(snapshot)) = (p.mask, self.cache.snapshot()) {
            loss += mask_loss(&feat, snapshot, mask, p.lambda_mask, &mut grad_feat)?;
        }
        let (reg_loss, reg_grad) = latent_regularisation(&ws, &self.w0, p.reg);
        loss += reg_loss;

        self.converged = motion.converged;
        if !motion.converged {
            let grad_layer = resize_bilinear_adjoint(&grad_feat, layer_h, layer_w)?;
            let mut grad_ws = self
                .generator
                .feature_vjp(&ws, &self.synthesis, p.feature_idx, &grad_layer)?;
            if grad_ws.dim() != ws.dim() {
                return Err(DragError::runtime(format!(
                    "feature gradient {:?} does not match ws {:?}",
                    grad_ws.dim(),
                    ws.dim()
                )));
            }
            if let Some(g) = reg_grad {
                grad_ws += &g;
            }
            let grad_w = self.reduce_to_latent(&grad_ws);
            self.optimizer.step(&mut self.w, &grad_w)?;
        }

        Ok(StepOutput {
            image: synth.image,
            points: Some(tracked),
            stop: Some(motion.converged),
            loss: Some(loss),
        })
    }
}

/// `weight * mean(|ws - w0|)` and its gradient (`None` when the weight is 0).
fn latent_regularisation(ws: &Array2<f32>, w0: &Array2<f32>, weight: f32) -> (f32, Option<Array2<f32>>) {
    if weight == 0.0 {
        return (0.0, None);
    }
    let n = ws.len() as f32;
    let diff = ws - w0;
    let loss = weight * diff.iter().map(|d| d.abs()).sum::<f32>() / n;
    let grad = diff.mapv(|d| weight * sign(d) / n);
    (loss, Some(grad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::procedural::ProceduralGenerator;

    fn session(w_plus: bool) -> DragSession {
        let generator: Arc<dyn Generator> = Arc::new(ProceduralGenerator::new(64).unwrap());
        let key = SessionKey { model: "procedural-64".into(), seed: 0, w_plus };
        let params = InitParams {
            seed: 0,
            w_plus,
            lr: 0.01,
            mapping: MappingParams::default(),
            noise_mode: NoiseMode::Const,
            input_transform: None,
        };
        DragSession::init(generator, key, &params).unwrap().0
    }

    #[test]
    fn latent_shape_follows_parameterisation() {
        let plus = session(true);
        assert_eq!(plus.latent().dim(), plus.base_latent().dim());
        let shared = session(false);
        assert_eq!(shared.latent().dim(), (1, 24));
        assert_eq!(shared.compose_ws(), shared.base_latent().clone());
    }

    #[test]
    fn same_seed_same_latent() {
        assert_eq!(session(true).base_latent(), session(true).base_latent());
    }

    #[test]
    fn gradient_folding() {
        let shared = session(false);
        let grad = Array2::from_shape_fn(shared.base_latent().dim(), |(r, _)| r as f32);
        let folded = shared.reduce_to_latent(&grad);
        // rows 0..6 summed: 0+1+2+3+4+5
        assert!(folded.iter().all(|&v| v == 15.0));

        let plus = session(true);
        let folded = plus.reduce_to_latent(&grad);
        assert_eq!(folded[[5, 0]], 5.0);
        assert_eq!(folded[[6, 0]], 0.0);
    }

    #[test]
    fn regularisation_gradient() {
        let w0 = Array2::<f32>::zeros((2, 2));
        let ws = ndarray::array![[1.0f32, -1.0], [0.0, 2.0]];
        let (loss, grad) = latent_regularisation(&ws, &w0, 2.0);
        assert!((loss - 2.0 * 4.0 / 4.0).abs() < 1e-6);
        let grad = grad.unwrap();
        assert_eq!(grad[[0, 0]], 0.5);
        assert_eq!(grad[[0, 1]], -0.5);
        assert_eq!(grad[[1, 0]], 0.0);
        assert_eq!(latent_regularisation(&ws, &w0, 0.0), (0.0, None));
    }

    #[test]
    fn optim_space_switch_is_idempotent() {
        let mut s = session(true);
        let before = s.latent().clone();
        assert!(!s.update_optim_space(true));
        assert_eq!(s.latent(), &before);

        assert!(s.update_optim_space(false));
        assert_eq!(s.latent().dim(), (1, 24));
        assert!(!s.key().w_plus);
        assert!(s.feature_cache().is_empty());
        assert_eq!(s.lr(), 0.01);
    }
}
