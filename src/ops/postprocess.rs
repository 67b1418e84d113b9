// ============================================================================
// POSTPROCESS — synthesis output (-1..1 floats) to an 8-bit RGB frame
// ============================================================================

use image::RgbImage;
use ndarray::{Array3, Axis};

use crate::error::{DragError, Result};
use crate::pool::{ElementType, TransferPool};

/// Display settings applied to every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameScale {
    /// Divide each channel by its peak magnitude first.
    pub normalize: bool,
    /// Gain in decibels (amplitude, so +20 dB = x10).
    pub scale_db: f32,
}

impl Default for FrameScale {
    fn default() -> Self {
        Self { normalize: false, scale_db: 0.0 }
    }
}

/// Convert a `(C, H, W)` image tensor into an [`RgbImage`].
///
/// Values map through `v * 127.5 + 128`, clamp to 0..=255 and truncate.
/// Single-channel images are replicated into grey RGB. The quantized bytes
/// are staged through `pool` before the frame is built.
pub fn to_rgb8(img: &Array3<f32>, scale: FrameScale, pool: &mut TransferPool) -> Result<RgbImage> {
    let (channels, height, width) = img.dim();
    if channels != 1 && channels != 3 {
        return Err(DragError::runtime(format!(
            "cannot display an image with {} channels",
            channels
        )));
    }

    let gain = 10f32.powf(scale.scale_db / 20.0);
    let peaks: Vec<f32> = if scale.normalize {
        img.axis_iter(Axis(0))
            .map(|ch| ch.iter().fold(0.0f32, |m, v| m.max(v.abs())).clamp(1e-8, 1e8))
            .collect()
    } else {
        vec![1.0; channels]
    };

    let staged = pool.staging(&[height, width, 3], ElementType::U8);
    for r in 0..height {
        for c in 0..width {
            let base = (r * width + c) * 3;
            for k in 0..3 {
                let ch = if channels == 1 { 0 } else { k };
                let v = img[[ch, r, c]] / peaks[ch] * gain;
                staged[base + k] = (v * 127.5 + 128.0).clamp(0.0, 255.0) as u8;
            }
        }
    }

    RgbImage::from_raw(width as u32, height as u32, staged.to_vec())
        .ok_or_else(|| DragError::runtime("frame buffer has the wrong size"))
}
