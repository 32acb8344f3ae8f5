use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Gelu, Linear, PaddingConfig2d,
    },
    prelude::*,
};
use burn_extra_ops::{DropPath, DropPathConfig};

use super::{
    init::{trunc_normal_conv2d, trunc_normal_linear},
    norm::{ChannelLayerNorm, ChannelLayerNormConfig, DataFormat},
};

/// Configuration for [`LocalBlock`].
#[derive(Config, Debug)]
pub struct LocalBlockConfig {
    dim: usize,
    /// Stochastic depth rate of the residual branch.
    #[config(default = 0.0)]
    drop_rate: f64,
    #[config(default = 1e-6)]
    epsilon: f64,
    #[config(default = 0.02)]
    init_std: f64,
}

impl LocalBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LocalBlock<B> {
        LocalBlock {
            dwconv: trunc_normal_conv2d(
                Conv2dConfig::new([self.dim, self.dim], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_groups(self.dim),
                self.init_std,
                device,
            ),
            norm: ChannelLayerNormConfig::new(self.dim)
                .with_epsilon(self.epsilon)
                .with_data_format(DataFormat::ChannelsLast)
                .init(device),
            pwconv: trunc_normal_linear(self.dim, self.dim, self.init_std, device),
            act: Gelu::new(),
            drop_path: DropPathConfig::new().with_drop_prob(self.drop_rate).init(),
        }
    }
}

/// Local feature block.
///
/// Depthwise 3x3 conv, then channels-last layer norm, linear projection and GELU on the
/// permuted `[N, H, W, C]` tensor, then a residual add.
#[derive(Module, Debug)]
pub struct LocalBlock<B: Backend> {
    dwconv: Conv2d<B>,
    norm: ChannelLayerNorm<B>,
    pwconv: Linear<B>,
    act: Gelu,
    drop_path: DropPath,
}

impl<B: Backend> LocalBlock<B> {
    /// # Shapes
    /// - input: `[batch, dim, height, width]`
    /// - output: `[batch, dim, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = x.clone();
        let x = self.dwconv.forward(x);
        let x = x.permute([0, 2, 3, 1]);
        let x = self.norm.forward(x);
        let x = self.pwconv.forward(x);
        let x = self.act.forward(x);
        let x = x.permute([0, 3, 1, 2]);
        shortcut + self.drop_path.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn local_block_preserves_shape() {
        let device = Default::default();
        let block = LocalBlockConfig::new(24).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 24, 9, 7], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [2, 24, 9, 7]);
    }

    #[test]
    fn local_block_is_residual() {
        let device = Default::default();
        let block = LocalBlockConfig::new(8).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([1, 8, 4, 4], Distribution::Default, &device);

        let branch = block.forward(x.clone()) - x.clone();
        let expected = {
            let y = block.dwconv.forward(x).permute([0, 2, 3, 1]);
            let y = block.act.forward(block.pwconv.forward(block.norm.forward(y)));
            y.permute([0, 3, 1, 2])
        };

        branch
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), burn::tensor::Tolerance::default());
    }
}
