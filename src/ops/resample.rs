// ============================================================================
// RESAMPLING — bilinear feature-map resize, its adjoint, and point sampling
// ============================================================================
//
// Feature maps are (C, H, W) with the batch dimension of one dropped.
// The resize follows the half-pixel convention (pixel centres at +0.5, no
// corner alignment); point sampling treats coordinates as exact pixel
// indices and reads zero outside the map.

use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array3, ArrayView2, ArrayViewMut2, Axis};

use crate::error::{DragError, Result};

/// Two-tap interpolation stencil for one output index along one axis.
#[derive(Clone, Copy, Debug)]
struct Tap {
    i0: usize,
    i1: usize,
    w0: f32,
    w1: f32,
}

fn taps(in_len: usize, out_len: usize) -> Vec<Tap> {
    let scale = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|o| {
            let src = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
            let i0 = (src.floor() as usize).min(in_len - 1);
            let i1 = if i0 + 1 < in_len { i0 + 1 } else { i0 };
            let w1 = src - i0 as f32;
            Tap { i0, i1, w0: 1.0 - w1, w1 }
        })
        .collect()
}

fn check_nonempty(shape: (usize, usize, usize), what: &str) -> Result<()> {
    if shape.0 == 0 || shape.1 == 0 || shape.2 == 0 {
        return Err(DragError::runtime(format!(
            "{} has an empty dimension: {:?}",
            what, shape
        )));
    }
    Ok(())
}

/// Bilinear resize of every channel to `(out_h, out_w)`.
pub fn resize_bilinear(feat: &Array3<f32>, out_h: usize, out_w: usize) -> Result<Array3<f32>> {
    check_nonempty(feat.dim(), "feature map")?;
    if out_h == 0 || out_w == 0 {
        return Err(DragError::runtime("resize target has an empty dimension"));
    }
    let (c, in_h, in_w) = feat.dim();
    if (in_h, in_w) == (out_h, out_w) {
        return Ok(feat.clone());
    }
    let ty = taps(in_h, out_h);
    let tx = taps(in_w, out_w);

    let mut out = Array3::<f32>::zeros((c, out_h, out_w));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(feat.axis_iter(Axis(0)))
        .for_each(|(mut dst, src)| resize_channel(&src, &mut dst, &ty, &tx));
    Ok(out)
}

fn resize_channel(src: &ArrayView2<f32>, dst: &mut ArrayViewMut2<f32>, ty: &[Tap], tx: &[Tap]) {
    for (r, y) in ty.iter().enumerate() {
        for (c, x) in tx.iter().enumerate() {
            let top = src[[y.i0, x.i0]] * x.w0 + src[[y.i0, x.i1]] * x.w1;
            let bottom = src[[y.i1, x.i0]] * x.w0 + src[[y.i1, x.i1]] * x.w1;
            dst[[r, c]] = top * y.w0 + bottom * y.w1;
        }
    }
}

/// Adjoint of [`resize_bilinear`]: maps a gradient at the resized resolution
/// back onto a `(in_h, in_w)` feature map.
pub fn resize_bilinear_adjoint(grad: &Array3<f32>, in_h: usize, in_w: usize) -> Result<Array3<f32>> {
    check_nonempty(grad.dim(), "gradient")?;
    let (c, out_h, out_w) = grad.dim();
    if (in_h, in_w) == (out_h, out_w) {
        return Ok(grad.clone());
    }
    if in_h == 0 || in_w == 0 {
        return Err(DragError::runtime("adjoint target has an empty dimension"));
    }
    let ty = taps(in_h, out_h);
    let tx = taps(in_w, out_w);

    let mut out = Array3::<f32>::zeros((c, in_h, in_w));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(grad.axis_iter(Axis(0)))
        .for_each(|(mut acc, g)| {
            for (r, y) in ty.iter().enumerate() {
                for (c, x) in tx.iter().enumerate() {
                    let v = g[[r, c]];
                    if v == 0.0 {
                        continue;
                    }
                    acc[[y.i0, x.i0]] += v * y.w0 * x.w0;
                    acc[[y.i0, x.i1]] += v * y.w0 * x.w1;
                    acc[[y.i1, x.i0]] += v * y.w1 * x.w0;
                    acc[[y.i1, x.i1]] += v * y.w1 * x.w1;
                }
            }
        });
    Ok(out)
}

/// Sample all channels at a fractional `(row, col)` position. Corners that
/// fall outside the map contribute zero.
pub fn sample_bilinear(feat: &Array3<f32>, row: f32, col: f32) -> Array1<f32> {
    let (c, h, w) = feat.dim();
    let r0 = row.floor();
    let c0 = col.floor();
    let fr = row - r0;
    let fc = col - c0;
    let corners = [
        (r0, c0, (1.0 - fr) * (1.0 - fc)),
        (r0, c0 + 1.0, (1.0 - fr) * fc),
        (r0 + 1.0, c0, fr * (1.0 - fc)),
        (r0 + 1.0, c0 + 1.0, fr * fc),
    ];

    let mut out = Array1::<f32>::zeros(c);
    for &(r, cc, wgt) in &corners {
        if wgt == 0.0 || r < 0.0 || cc < 0.0 || r >= h as f32 || cc >= w as f32 {
            continue;
        }
        let (ri, ci) = (r as usize, cc as usize);
        for ch in 0..c {
            out[ch] += wgt * feat[[ch, ri, ci]];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(c: usize, h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((c, h, w), |(ch, r, col)| (ch * 100 + r * 10 + col) as f32)
    }

    #[test]
    fn resize_constant_stays_constant() {
        let f = Array3::<f32>::from_elem((2, 4, 4), 3.5);
        let up = resize_bilinear(&f, 16, 16).unwrap();
        assert_eq!(up.dim(), (2, 16, 16));
        assert!(up.iter().all(|v| (v - 3.5).abs() < 1e-6));
    }

    #[test]
    fn upsample_by_two_matches_half_pixel_convention() {
        // 1D row [0, 1] upsampled to 4 -> [0, 0.25, 0.75, 1]
        let f = Array3::from_shape_vec((1, 1, 2), vec![0.0f32, 1.0]).unwrap();
        let up = resize_bilinear(&f, 1, 4).unwrap();
        let got: Vec<f32> = up.iter().copied().collect();
        let want = [0.0, 0.25, 0.75, 1.0];
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-6, "got {:?}", got);
        }
    }

    #[test]
    fn adjoint_satisfies_inner_product_identity() {
        // <R x, y> == <x, R^T y>
        let x = ramp(2, 5, 3);
        let y = Array3::from_shape_fn((2, 12, 7), |(c, r, k)| ((c + 2 * r + 3 * k) % 5) as f32 - 2.0);
        let rx = resize_bilinear(&x, 12, 7).unwrap();
        let rty = resize_bilinear_adjoint(&y, 5, 3).unwrap();
        let lhs: f32 = rx.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
        let rhs: f32 = x.iter().zip(rty.iter()).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-2 * lhs.abs().max(1.0), "{lhs} vs {rhs}");
    }

    #[test]
    fn sampling_interpolates_and_zero_pads() {
        let f = ramp(1, 4, 4);
        let v = sample_bilinear(&f, 1.5, 2.0);
        assert!((v[0] - 17.0).abs() < 1e-5);
        let edge = sample_bilinear(&f, -0.5, 0.0);
        assert!((edge[0] - 0.0).abs() < 1e-6);
        let outside = sample_bilinear(&f, 3.5, 3.0);
        assert!((outside[0] - 0.5 * 33.0).abs() < 1e-5);
    }
}
