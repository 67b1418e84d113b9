// ============================================================================
// ADAM — first-order optimizer over a single latent parameter tensor
// ============================================================================

use ndarray::Array2;

use crate::error::{DragError, Result};

/// Adam with the usual defaults (beta1 0.9, beta2 0.999, eps 1e-8) and no
/// weight decay. Moment estimates are allocated lazily on the first step so
/// a fresh optimizer is indistinguishable from a rebuilt one.
#[derive(Clone, Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Option<Array2<f32>>,
    v: Option<Array2<f32>>,
    t: u32,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self::with_betas(lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self { lr, beta1, beta2, epsilon, m: None, v: None, t: 0 }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    /// Number of updates applied since construction.
    pub fn steps(&self) -> u32 {
        self.t
    }

    /// Apply one update to `param` in place.
    pub fn step(&mut self, param: &mut Array2<f32>, grad: &Array2<f32>) -> Result<()> {
        if param.dim() != grad.dim() {
            return Err(DragError::runtime(format!(
                "gradient {:?} does not match parameter {:?}",
                grad.dim(),
                param.dim()
            )));
        }
        let m = self.m.get_or_insert_with(|| Array2::zeros(param.dim()));
        let v = self.v.get_or_insert_with(|| Array2::zeros(param.dim()));
        if m.dim() != param.dim() {
            return Err(DragError::runtime("optimizer state belongs to a different parameter"));
        }

        self.t += 1;
        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.lr);
        let bias1 = 1.0 - b1.powi(self.t as i32);
        let bias2 = 1.0 - b2.powi(self.t as i32);

        ndarray::Zip::from(param)
            .and(grad)
            .and(m)
            .and(v)
            .for_each(|p, &g, m, v| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut p = array![[1.0f32, -1.0, 0.5]];
        let g = array![[0.3f32, -2.0, 0.0]];
        let mut opt = Adam::new(0.01);
        opt.step(&mut p, &g).unwrap();
        assert!((p[[0, 0]] - 0.99).abs() < 1e-5);
        assert!((p[[0, 1]] + 0.99).abs() < 1e-5);
        // zero gradient leaves the entry untouched
        assert_eq!(p[[0, 2]], 0.5);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn momentum_carries_over_between_steps() {
        let mut warm = Adam::new(0.1);
        let mut p = array![[0.0f32]];
        warm.step(&mut p, &array![[1.0f32]]).unwrap();
        let before = p[[0, 0]];
        warm.step(&mut p, &array![[-1.0f32]]).unwrap();
        let warm_delta = p[[0, 0]] - before;

        let mut cold = Adam::new(0.1);
        let mut q = array![[before]];
        cold.step(&mut q, &array![[-1.0f32]]).unwrap();
        let cold_delta = q[[0, 0]] - before;

        // cold optimizer moves a full lr; the warm one is held back by momentum
        assert!((cold_delta - 0.1).abs() < 1e-5);
        assert!(warm_delta < cold_delta);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut p = Array2::<f32>::zeros((1, 4));
        let g = Array2::<f32>::zeros((2, 4));
        assert!(Adam::new(0.1).step(&mut p, &g).is_err());
    }
}
