//! # DropPath (stochastic depth)
//!
//! Randomly drops the whole residual branch of a sample during training. Training is
//! detected the same way `burn::nn::Dropout` detects it: the module is only active when
//! the backend has autodiff enabled.

use burn::{prelude::*, tensor::Distribution};

/// Configuration for the [`DropPath`] module.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// The probability of dropping a sample's branch.
    #[config(default = "0.0")]
    pub drop_prob: f64,
    /// Whether surviving samples are rescaled by `1 / (1 - drop_prob)`.
    #[config(default = "true")]
    pub scale_by_keep: bool,
}

impl DropPathConfig {
    /// Initializes a new [`DropPath`] module.
    pub const fn init(&self) -> DropPath {
        DropPath {
            drop_prob: self.drop_prob,
            scale_by_keep: self.scale_by_keep,
        }
    }
}

/// Per-sample stochastic depth.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    drop_prob: f64,
    scale_by_keep: bool,
}

impl DropPath {
    /// The configured drop probability.
    pub const fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    /// Applies stochastic depth to a residual branch output.
    ///
    /// Returns the input unchanged when the backend is not tracking gradients or when
    /// `drop_prob` is 0. Otherwise one Bernoulli draw per batch element decides whether the
    /// whole sample is zeroed.
    ///
    /// # Shapes
    /// - input: `[batch_size, ...]`
    /// - output: `[batch_size, ...]`
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        if !B::ad_enabled() || self.drop_prob == 0.0 {
            return x;
        }
        let keep_prob = 1.0 - self.drop_prob;

        let mut mask_shape = [1; D];
        mask_shape[0] = x.dims()[0];
        let mask = Tensor::<B, D>::random(mask_shape, Distribution::Bernoulli(keep_prob), &x.device());

        if self.scale_by_keep && keep_prob > 0.0 {
            x * mask.div_scalar(keep_prob)
        } else {
            x * mask
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    #[test]
    fn droppath_is_identity_without_autodiff() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().with_drop_prob(0.9).init();
        let x = Tensor::<TestBackend, 4>::random(
            [4, 3, 8, 8],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let output = drop_path.forward(x.clone());

        output.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn droppath_zero_prob_is_identity_in_training() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().init();
        let x = Tensor::<TestAutodiffBackend, 4>::ones([2, 3, 4, 4], &device);

        let output = drop_path.forward(x.clone());

        output.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn droppath_drops_whole_samples_in_training() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().with_drop_prob(0.5).init();
        let batch_size = 16;
        let x = Tensor::<TestAutodiffBackend, 3>::ones([batch_size, 4, 8], &device);

        let mut dropped = 0;
        let trials = 50;
        for _ in 0..trials {
            let output = drop_path.forward(x.clone());
            for i in 0..batch_size {
                let sum = output
                    .clone()
                    .slice([i..i + 1, 0..4, 0..8])
                    .sum()
                    .into_scalar();
                if sum.abs() < 1e-6 {
                    dropped += 1;
                } else {
                    // kept samples are rescaled by 1 / keep_prob
                    assert!((sum - 64.0).abs() < 1e-4, "unexpected sample sum {sum}");
                }
            }
        }

        let rate = dropped as f64 / (trials * batch_size) as f64;
        assert!((rate - 0.5).abs() < 0.1, "drop rate {rate} too far from 0.5");
    }

    #[test]
    fn droppath_without_rescaling_keeps_values() {
        let device = Default::default();
        let drop_path = DropPathConfig::new()
            .with_drop_prob(0.5)
            .with_scale_by_keep(false)
            .init();
        let x = Tensor::<TestAutodiffBackend, 2>::ones([32, 4], &device);

        let output = drop_path.forward(x);

        for value in output.to_data().iter::<f32>() {
            assert!(value == 0.0 || value == 1.0);
        }
    }
}
