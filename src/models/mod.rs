// ============================================================================
// MODELS — the generator boundary: mapping, synthesis, and feature gradients
// ============================================================================
//
// The drag core never looks inside a network. It asks a `Generator` for:
//   * the mapping stage  (z + label        -> per-layer latent ws)
//   * the synthesis stage (ws               -> image + per-layer feature maps)
//   * a feature VJP      (ws, d loss/d F_l -> d loss/d ws)
// which is everything the optimisation loop needs to back-propagate a loss
// defined on one feature map into the latent code.

pub mod procedural;
pub mod registry;

use nalgebra::Matrix3;
use ndarray::{Array1, Array2, Array3};

use crate::config::NoiseMode;
use crate::error::{DragError, Result};

pub use registry::{ModelRegistry, NetworkLoader};

/// Network families the registry knows how to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Architecture {
    StyleGan2,
    /// Checkpoints from the original rosinality port: fixed 512px output and
    /// a mapping stage that returns one vector broadcast over all layers.
    StyleGan2Legacy,
    StyleGan3,
    StyleGanHuman,
    /// Built-in analytic generator (see [`procedural`]).
    Procedural,
}

impl Architecture {
    pub fn label(&self) -> &'static str {
        match self {
            Architecture::StyleGan2 => "stylegan2",
            Architecture::StyleGan2Legacy => "stylegan2-old",
            Architecture::StyleGan3 => "stylegan3",
            Architecture::StyleGanHuman => "stylegan_human",
            Architecture::Procedural => "procedural",
        }
    }

    /// Infer the family from an identifier (file name, URL, or tag).
    /// More specific tags are checked first.
    pub fn from_identifier(identifier: &str) -> Result<Self> {
        let id = identifier.to_lowercase();
        let family = if id.contains("stylegan2-old") {
            Architecture::StyleGan2Legacy
        } else if id.contains("stylegan_human") {
            Architecture::StyleGanHuman
        } else if id.contains("stylegan3") {
            Architecture::StyleGan3
        } else if id.contains("stylegan2") {
            Architecture::StyleGan2
        } else if id.contains("procedural") {
            Architecture::Procedural
        } else {
            return Err(DragError::ArchitectureInference(format!(
                "cannot infer model type from \"{}\"",
                identifier
            )));
        };
        Ok(family)
    }

    /// Per-layer latent count of a StyleGAN2-style synthesis network at
    /// `resolution`: two per block from 4px up, `2*log2(res) - 2`.
    pub fn num_ws_for_resolution(resolution: usize) -> usize {
        (resolution as f64).log2().round() as usize * 2 - 2
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A named pretrained checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PretrainedModel {
    pub name: &'static str,
    pub url: &'static str,
    pub features_extractor_size: usize,
}

pub const PRETRAINED_MODELS: &[PretrainedModel] = &[
    PretrainedModel {
        name: "afhqwild",
        url: "https://nvlabs-fi-cdn.nvidia.com/stylegan2-ada-pytorch/pretrained/afhqwild.pkl",
        features_extractor_size: 256,
    },
    PretrainedModel {
        name: "afhqcat",
        url: "https://nvlabs-fi-cdn.nvidia.com/stylegan2-ada-pytorch/pretrained/afhqcat.pkl",
        features_extractor_size: 256,
    },
    PretrainedModel {
        name: "afhqdog",
        url: "https://nvlabs-fi-cdn.nvidia.com/stylegan2-ada-pytorch/pretrained/afhqdog.pkl",
        features_extractor_size: 256,
    },
    PretrainedModel {
        name: "brecahad",
        url: "https://nvlabs-fi-cdn.nvidia.com/stylegan2-ada-pytorch/pretrained/brecahad.pkl",
        features_extractor_size: 256,
    },
    PretrainedModel {
        name: "cifar10",
        url: "https://nvlabs-fi-cdn.nvidia.com/stylegan2-ada-pytorch/pretrained/cifar10.pkl",
        features_extractor_size: 16,
    },
    PretrainedModel {
        name: "ffhq",
        url: "https://nvlabs-fi-cdn.nvidia.com/stylegan2-ada-pytorch/pretrained/ffhq.pkl",
        features_extractor_size: 256,
    },
    PretrainedModel {
        name: "metfaces",
        url: "https://nvlabs-fi-cdn.nvidia.com/stylegan2-ada-pytorch/pretrained/metfaces.pkl",
        features_extractor_size: 256,
    },
];

pub fn pretrained(name: &str) -> Option<&'static PretrainedModel> {
    PRETRAINED_MODELS.iter().find(|m| m.name.eq_ignore_ascii_case(name))
}

/// Expand a pretrained short name to its URL; other identifiers pass through.
pub fn resolve_identifier(identifier: &str) -> String {
    match pretrained(identifier) {
        Some(m) => m.url.to_string(),
        None => identifier.to_string(),
    }
}

/// Static description of a loaded network.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorInfo {
    pub name: String,
    pub architecture: Architecture,
    pub img_resolution: usize,
    pub z_dim: usize,
    pub w_dim: usize,
    /// Class-label width; 0 for unconditional networks.
    pub c_dim: usize,
    pub num_ws: usize,
    pub num_feature_layers: usize,
    pub has_noise: bool,
    pub has_input_transform: bool,
}

/// Mapping-stage options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MappingParams {
    pub truncation_psi: f32,
    /// Truncate only the first `n` layers; `None` truncates all of them.
    pub truncation_cutoff: Option<usize>,
}

impl Default for MappingParams {
    fn default() -> Self {
        Self { truncation_psi: 0.7, truncation_cutoff: None }
    }
}

/// Synthesis-stage options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SynthesisParams {
    pub noise_mode: NoiseMode,
    /// Already-inverted geometric transform (identity when unused).
    pub input_transform: Matrix3<f64>,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self { noise_mode: NoiseMode::Const, input_transform: Matrix3::identity() }
    }
}

/// Output of one synthesis pass.
#[derive(Clone, Debug)]
pub struct Synthesis {
    /// `(C, H, W)` image in roughly -1..1.
    pub image: Array3<f32>,
    /// One `(C_l, H_l, W_l)` map per synthesis layer.
    pub features: Vec<Array3<f32>>,
}

/// A generative network as seen by the drag core.
pub trait Generator: Send + Sync {
    fn info(&self) -> &GeneratorInfo;

    /// Map a latent sample and class label to `(num_ws, w_dim)` latents.
    fn mapping(&self, z: &Array1<f32>, label: &Array1<f32>, params: &MappingParams) -> Result<Array2<f32>>;

    fn synthesis(&self, ws: &Array2<f32>, params: &SynthesisParams) -> Result<Synthesis>;

    /// Vector-Jacobian product of feature layer `layer` with respect to `ws`:
    /// given d(loss)/d(features[layer]) return d(loss)/d(ws).
    fn feature_vjp(
        &self,
        ws: &Array2<f32>,
        params: &SynthesisParams,
        layer: usize,
        grad: &Array3<f32>,
    ) -> Result<Array2<f32>>;
}

/// Invert a user-supplied input transform.
pub fn invert_transform(m: &[[f64; 3]; 3]) -> Result<Matrix3<f64>> {
    let mat = Matrix3::from_fn(|r, c| m[r][c]);
    if mat.iter().any(|v| !v.is_finite()) {
        return Err(DragError::Numerical("input transform contains non-finite values".into()));
    }
    mat.try_inverse()
        .ok_or_else(|| DragError::Numerical("input transform is singular and cannot be inverted".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn architecture_dispatch_prefers_specific_tags() {
        assert_eq!(Architecture::from_identifier("stylegan2-old-ffhq.pt").unwrap(), Architecture::StyleGan2Legacy);
        assert_eq!(Architecture::from_identifier("stylegan2-ffhq-512.pkl").unwrap(), Architecture::StyleGan2);
        assert_eq!(Architecture::from_identifier("StyleGAN3-T-afhq.pkl").unwrap(), Architecture::StyleGan3);
        assert_eq!(Architecture::from_identifier("stylegan_human_v2_512.pkl").unwrap(), Architecture::StyleGanHuman);
        assert_eq!(Architecture::from_identifier("procedural-128").unwrap(), Architecture::Procedural);
        let err = Architecture::from_identifier("biggan-deep.pth").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ArchitectureInference);
    }

    #[test]
    fn pretrained_names_resolve_to_stylegan2_urls() {
        let url = resolve_identifier("ffhq");
        assert!(url.ends_with("/ffhq.pkl"));
        assert_eq!(Architecture::from_identifier(&url).unwrap(), Architecture::StyleGan2);
        assert_eq!(pretrained("cifar10").unwrap().features_extractor_size, 16);
        assert_eq!(resolve_identifier("procedural"), "procedural");
    }

    #[test]
    fn layer_count_follows_resolution() {
        assert_eq!(Architecture::num_ws_for_resolution(512), 16);
        assert_eq!(Architecture::num_ws_for_resolution(256), 14);
    }

    #[test]
    fn transform_inversion() {
        let m = [[2.0, 0.0, 1.0], [0.0, 4.0, 0.0], [0.0, 0.0, 1.0]];
        let inv = invert_transform(&m).unwrap();
        assert!((inv[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((inv[(0, 2)] + 0.5).abs() < 1e-12);

        let singular = [[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 1.0]];
        let err = invert_transform(&singular).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Numerical);
    }
}
