// ============================================================================
// RENDERER — per-call orchestration of session lifecycle and drag steps
// ============================================================================
//
// Every call:
//   1. decide (from the session key) whether the session must be rebuilt
//   2. rebuild it if so, leaving the old one in place when that fails
//   3. pick up a changed learning rate
//   4. run one drag step (or plain synthesis) and quantise the frame
//
// Nothing escapes `render`: errors and generator panics come back as text in
// the result, and the session is left as the failing stage found it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use image::RgbImage;

use crate::components::{DragParams, DragSession, InitParams, StepOutput};
use crate::config::{needs_init, Point, RenderArgs, SessionKey};
use crate::error::{DragError, ErrorKind, Result};
use crate::io::SessionSnapshot;
use crate::models::MappingParams;
use crate::ops::postprocess::{to_rgb8, FrameScale};
use crate::resources::Resources;
use crate::{log_err, log_info};

/// Outcome of one [`Renderer::render`] call. Fields that do not apply to the
/// call are `None`.
#[derive(Clone, Debug, Default)]
pub struct RenderResult {
    pub image: Option<RgbImage>,
    /// Tracked handle points, present only for drag calls.
    pub points: Option<Vec<Point>>,
    /// All points within the stop threshold; present only for drag calls.
    pub stop: Option<bool>,
    /// The session was (re)built by this call.
    pub init_net: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub loss: Option<f32>,
    // Filled on (re)initialisation only.
    pub img_resolution: Option<usize>,
    pub num_ws: Option<usize>,
    pub has_noise: Option<bool>,
    pub has_input_transform: Option<bool>,
}

impl RenderResult {
    fn record_error(&mut self, err: &DragError) {
        log_err!("{}", err);
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind());
    }
}

pub struct Renderer {
    resources: Arc<Resources>,
    session: Option<DragSession>,
}

impl Renderer {
    pub fn new(resources: Arc<Resources>) -> Self {
        Self { resources, session: None }
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Switch the active session between shared and per-layer latents
    /// without re-sampling the base latent. Returns false when there is no
    /// session or it is already in that mode.
    pub fn update_optim_space(&mut self, w_plus: bool) -> bool {
        self.session.as_mut().is_some_and(|s| s.update_optim_space(w_plus))
    }

    pub fn render(&mut self, args: &RenderArgs) -> RenderResult {
        let mut res = RenderResult::default();
        let key = args.session_key();

        let init = needs_init(self.session.as_ref().map(|s| s.key()), &key, args.reset_w);
        res.init_net = init;
        if init {
            match guarded("init", || self.build_session(key, args)) {
                Ok((session, warning)) => {
                    let info = session.info();
                    res.img_resolution = Some(info.img_resolution);
                    res.num_ws = Some(info.num_ws);
                    res.has_noise = Some(info.has_noise);
                    res.has_input_transform = Some(info.has_input_transform);
                    if let Some(w) = warning {
                        res.record_error(&w);
                    }
                    self.session = Some(session);
                }
                Err(e) => {
                    res.record_error(&e);
                    return res;
                }
            }
        }

        let Some(session) = self.session.as_mut() else {
            return res;
        };
        if session.lr() != args.lr {
            session.update_lr(args.lr);
        }

        let params = DragParams {
            points: &args.points,
            targets: &args.targets,
            mask: args.mask.as_ref(),
            lambda_mask: args.lambda_mask,
            reg: args.reg,
            feature_idx: args.feature_idx,
            r1: args.r1,
            r2: args.r2,
            is_drag: args.is_drag,
            reset: args.reset,
        };
        let step = match guarded("drag step", || session.drag_step(&params)) {
            Ok(step) => step,
            Err(e) => {
                res.record_error(&e);
                return res;
            }
        };

        let StepOutput { image, points, stop, loss } = step;
        let scale = FrameScale { normalize: args.img_normalize, scale_db: args.img_scale_db };
        match to_rgb8(&image, scale, &mut self.resources.pool()) {
            Ok(frame) => res.image = Some(frame),
            Err(e) => {
                res.record_error(&e.context("postprocess"));
                return res;
            }
        }
        res.points = points;
        res.stop = stop;
        res.loss = loss;
        res
    }

    fn build_session(&self, key: SessionKey, args: &RenderArgs) -> Result<(DragSession, Option<DragError>)> {
        let generator = self.resources.registry().get_network(&key.model)?;
        let params = InitParams {
            seed: args.w0_seed,
            w_plus: args.w_plus,
            lr: args.lr,
            mapping: MappingParams {
                truncation_psi: args.trunc_psi,
                truncation_cutoff: args.trunc_cutoff,
            },
            noise_mode: args.noise_mode,
            input_transform: args.input_transform,
        };
        DragSession::init(generator, key, &params)
    }

    /// Capture the active session so it can be resumed later.
    pub fn snapshot(&self, targets: &[Point]) -> Option<SessionSnapshot> {
        let session = self.session.as_ref()?;
        Some(SessionSnapshot {
            key: session.key().clone(),
            lr: session.lr(),
            w: session.latent().clone(),
            w0: session.base_latent().clone(),
            points: session.points().map(<[Point]>::to_vec).unwrap_or_default(),
            targets: targets.to_vec(),
        })
    }

    /// Rebuild the session named by `snapshot` and install its latents.
    /// Mapping and synthesis options come from `args`; its key fields and
    /// learning rate are overridden by the snapshot.
    pub fn restore(&mut self, snapshot: &SessionSnapshot, args: &RenderArgs) -> Result<()> {
        let mut args = args.clone();
        args.model = snapshot.key.model.clone();
        args.w0_seed = snapshot.key.seed;
        args.w_plus = snapshot.key.w_plus;
        args.lr = snapshot.lr;

        let (mut session, warning) = guarded("restore", || self.build_session(snapshot.key.clone(), &args))?;
        if let Some(w) = warning {
            log_err!("{}", w);
        }
        session.restore_latents(snapshot.w.clone(), snapshot.w0.clone())?;
        log_info!(
            "Restored session {} ({} seed={} w_plus={}, {} points)",
            session.id(),
            snapshot.key.model,
            snapshot.key.seed,
            snapshot.key.w_plus,
            snapshot.points.len()
        );
        self.session = Some(session);
        Ok(())
    }
}

/// Run `f`, turning a panic into a runtime error and tagging errors with
/// `stage`.
fn guarded<T>(stage: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r.map_err(|e| e.context(stage)),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(DragError::runtime(format!("{}: panicked: {}", stage, msg)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_runtime_errors() {
        let err = guarded::<()>("drag step", || panic!("index out of bounds")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeComputation);
        assert!(err.to_string().contains("drag step: panicked: index out of bounds"));
    }

    #[test]
    fn errors_are_tagged_with_stage() {
        let err = guarded::<()>("init", || Err(DragError::ModelLoad("missing".into()))).unwrap_err();
        assert_eq!(err.to_string(), "ModelLoadError: init: missing");
    }
}
