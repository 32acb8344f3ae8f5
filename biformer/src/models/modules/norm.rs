//! # Normalization layers for NCHW feature maps
//!
//! - [`ChannelLayerNorm`]: layer norm over the channel axis, for either channels-first
//!   (`[N, C, H, W]`) or channels-last (`[N, H, W, C]`) inputs.
//! - [`Norm2d`]: the normalization selected by [`NormLayer`] for downsampling layers and
//!   the pre-head norm (channels-first layer norm or 2D batch norm).

use core::str::FromStr;

use burn::{
    module::{Ignored, Param},
    nn::{BatchNorm, BatchNormConfig},
    prelude::*,
};

use crate::error::{BiFormerError, BiFormerResult};

/// Axis ordering of the tensors fed to a [`ChannelLayerNorm`].
#[derive(Config, Debug, PartialEq, Eq)]
pub enum DataFormat {
    /// `[batch, height, width, channels]`
    ChannelsLast,
    /// `[batch, channels, height, width]`
    ChannelsFirst,
}

impl FromStr for DataFormat {
    type Err = BiFormerError;

    fn from_str(s: &str) -> BiFormerResult<Self> {
        match s {
            "channels_last" => Ok(Self::ChannelsLast),
            "channels_first" => Ok(Self::ChannelsFirst),
            other => Err(BiFormerError::UnsupportedDataFormat {
                format: other.to_owned(),
            }),
        }
    }
}

/// Configuration for [`ChannelLayerNorm`].
#[derive(Config, Debug)]
pub struct ChannelLayerNormConfig {
    /// Number of channels to normalize over.
    pub num_channels: usize,
    /// Added to the variance before the square root.
    #[config(default = 1e-6)]
    pub epsilon: f64,
    /// Layout of the input tensors.
    #[config(default = "DataFormat::ChannelsLast")]
    pub data_format: DataFormat,
}

impl ChannelLayerNormConfig {
    /// Builds a config from a textual layout identifier (`"channels_last"` or
    /// `"channels_first"`).
    ///
    /// # Errors
    ///
    /// Returns [`BiFormerError::UnsupportedDataFormat`] for any other identifier.
    pub fn from_format_str(num_channels: usize, data_format: &str) -> BiFormerResult<Self> {
        Ok(Self::new(num_channels).with_data_format(data_format.parse()?))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ChannelLayerNorm<B> {
        ChannelLayerNorm {
            weight: Param::from_tensor(Tensor::ones([self.num_channels], device)),
            bias: Param::from_tensor(Tensor::zeros([self.num_channels], device)),
            epsilon: self.epsilon,
            data_format: Ignored(self.data_format.clone()),
        }
    }
}

/// Layer norm over the channel axis.
///
/// Statistics are taken along the channel axis only (dimension 1 for channels-first,
/// the last dimension for channels-last); scale and shift broadcast over the rest. Both
/// layouts share one parameter set, `weight` and `bias`.
#[derive(Module, Debug)]
pub struct ChannelLayerNorm<B: Backend> {
    weight: Param<Tensor<B, 1>>,
    bias: Param<Tensor<B, 1>>,
    epsilon: f64,
    data_format: Ignored<DataFormat>,
}

impl<B: Backend> ChannelLayerNorm<B> {
    pub fn data_format(&self) -> &DataFormat {
        &self.data_format.0
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let axis = match *self.data_format {
            DataFormat::ChannelsFirst => 1,
            DataFormat::ChannelsLast => D - 1,
        };
        let [channels] = self.weight.val().dims();
        let mut affine_shape = [1; D];
        affine_shape[axis] = channels;

        let mean = x.clone().mean_dim(axis);
        let centered = x - mean;
        let var = centered.clone().powf_scalar(2.0).mean_dim(axis);
        let normalized = centered / var.add_scalar(self.epsilon).sqrt();

        normalized * self.weight.val().reshape(affine_shape)
            + self.bias.val().reshape(affine_shape)
    }
}

/// Normalization used by the downsampling layers and before the head.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum NormLayer {
    /// Channels-first layer norm.
    LayerNorm2d,
    /// 2D batch norm.
    BatchNorm2d,
}

impl NormLayer {
    pub fn init<B: Backend>(&self, num_channels: usize, epsilon: f64, device: &B::Device) -> Norm2d<B> {
        match self {
            Self::LayerNorm2d => Norm2d::Layer(
                ChannelLayerNormConfig::new(num_channels)
                    .with_epsilon(epsilon)
                    .with_data_format(DataFormat::ChannelsFirst)
                    .init(device),
            ),
            Self::BatchNorm2d => Norm2d::Batch(BatchNormConfig::new(num_channels).init(device)),
        }
    }
}

/// An NCHW normalization layer.
///
/// Records are matched against the variants in declaration order, so `Batch` must stay
/// ahead of `Layer`: layer-norm parameters are a subset of batch-norm ones.
#[derive(Module, Debug)]
pub enum Norm2d<B: Backend> {
    Batch(BatchNorm<B, 2>),
    Layer(ChannelLayerNorm<B>),
}

impl<B: Backend> Norm2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Batch(norm) => norm.forward(x),
            Self::Layer(norm) => norm.forward(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn parses_known_data_formats() {
        assert_eq!("channels_last".parse::<DataFormat>().unwrap(), DataFormat::ChannelsLast);
        assert_eq!("channels_first".parse::<DataFormat>().unwrap(), DataFormat::ChannelsFirst);
    }

    #[test]
    fn rejects_unknown_data_format() {
        match ChannelLayerNormConfig::from_format_str(8, "channels_middle") {
            Err(BiFormerError::UnsupportedDataFormat { format }) => {
                assert_eq!(format, "channels_middle");
            }
            other => panic!("expected UnsupportedDataFormat, got {other:?}"),
        }
    }

    #[test]
    fn channels_first_matches_channels_last_on_permuted_input() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 8, 5, 3], Distribution::Normal(1.0, 2.0), &device);

        let first = ChannelLayerNormConfig::from_format_str(8, "channels_first")
            .unwrap()
            .init::<TestBackend>(&device);
        let last = ChannelLayerNormConfig::from_format_str(8, "channels_last")
            .unwrap()
            .init::<TestBackend>(&device);

        assert_eq!(first.data_format(), &DataFormat::ChannelsFirst);
        assert_eq!(last.data_format(), &DataFormat::ChannelsLast);

        let out_first = first.forward(x.clone());
        let out_last = last.forward(x.permute([0, 2, 3, 1])).permute([0, 3, 1, 2]);

        out_first
            .to_data()
            .assert_approx_eq::<f32>(&out_last.to_data(), burn::tensor::Tolerance::default());
    }

    #[test]
    fn channels_first_normalizes_each_pixel() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([1, 16, 4, 4], Distribution::Normal(3.0, 5.0), &device);
        let norm = ChannelLayerNormConfig::new(16)
            .with_data_format(DataFormat::ChannelsFirst)
            .init::<TestBackend>(&device);

        let y = norm.forward(x);
        let mean = y.clone().mean_dim(1).abs().max().into_scalar();
        let var = y.var_bias(1).mean().into_scalar();

        assert!(mean < 1e-4, "per-pixel channel mean {mean}");
        assert!((var - 1.0).abs() < 1e-3, "per-pixel channel variance {var}");
    }

    #[test]
    fn norm_layers_preserve_shape() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([2, 12, 7, 7], &device);
        for layer in [NormLayer::LayerNorm2d, NormLayer::BatchNorm2d] {
            let norm = layer.init::<TestBackend>(12, 1e-6, &device);
            assert_eq!(norm.forward(x.clone()).dims(), [2, 12, 7, 7]);
        }
    }
}
