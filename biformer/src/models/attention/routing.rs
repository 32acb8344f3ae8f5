//! # Bi-Level Routing Attention (NCHW)
//!
//! The feature map is split into an `n_win x n_win` grid of regions. A coarse pass ranks
//! region-to-region affinity from region-averaged queries and keys and keeps the `topk`
//! best key regions for every query region. A fine pass then runs token-level attention
//! inside each query region, over the tokens of its routed key regions only.
//!
//! Reference: "BiFormer: Vision Transformer with Bi-Level Routing Attention"
//! (https://arxiv.org/abs/2303.08810)

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::softmax,
};

use super::AttentionOp;
use crate::{
    error::{BiFormerError, BiFormerResult},
    models::modules::init::trunc_normal_conv2d,
};

/// Configuration for [`BiLevelRoutingAttention`].
#[derive(Config, Debug)]
pub struct BiLevelRoutingAttentionConfig {
    /// Channel width.
    pub dim: usize,
    #[config(default = 8)]
    pub num_heads: usize,
    /// Regions per side of the window grid.
    #[config(default = 7)]
    pub n_win: usize,
    /// Key regions routed to each query region.
    #[config(default = 4)]
    pub topk: usize,
    /// Overrides the default `dim^-0.5` attention scale.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,
    /// Kernel of the depthwise LePE conv on the values; 0 disables it.
    #[config(default = 3)]
    pub side_dwconv: usize,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl BiLevelRoutingAttentionConfig {
    /// # Errors
    ///
    /// Returns [`BiFormerError::InvalidConfiguration`] if `dim` is not divisible by
    /// `num_heads`, the window grid is empty, or `topk` is 0 or larger than the number
    /// of regions.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BiFormerResult<BiLevelRoutingAttention<B>> {
        if self.num_heads == 0 || self.dim % self.num_heads != 0 {
            return Err(BiFormerError::InvalidConfiguration {
                reason: format!("dim {} is not divisible by num_heads {}", self.dim, self.num_heads),
            });
        }
        if self.n_win == 0 {
            return Err(BiFormerError::InvalidConfiguration {
                reason: "n_win must be positive".to_owned(),
            });
        }
        let regions = self.n_win * self.n_win;
        if self.topk == 0 || self.topk > regions {
            return Err(BiFormerError::InvalidConfiguration {
                reason: format!("topk {} must be in 1..={regions} for n_win {}", self.topk, self.n_win),
            });
        }

        let lepe = (self.side_dwconv > 0).then(|| {
            let padding = self.side_dwconv / 2;
            trunc_normal_conv2d(
                Conv2dConfig::new([self.dim, self.dim], [self.side_dwconv, self.side_dwconv])
                    .with_padding(PaddingConfig2d::Explicit(padding, padding))
                    .with_groups(self.dim),
                self.init_std,
                device,
            )
        });

        Ok(BiLevelRoutingAttention {
            qkv_linear: trunc_normal_conv2d(
                Conv2dConfig::new([self.dim, 3 * self.dim], [1, 1]),
                self.init_std,
                device,
            ),
            output_linear: trunc_normal_conv2d(
                Conv2dConfig::new([self.dim, self.dim], [1, 1]),
                self.init_std,
                device,
            ),
            lepe,
            num_heads: self.num_heads,
            n_win: self.n_win,
            topk: self.topk,
            scale: self.qk_scale.unwrap_or_else(|| (self.dim as f64).powf(-0.5)),
        })
    }
}

/// Bi-level routing attention over an NCHW feature map.
#[derive(Module, Debug)]
pub struct BiLevelRoutingAttention<B: Backend> {
    qkv_linear: Conv2d<B>,
    output_linear: Conv2d<B>,
    lepe: Option<Conv2d<B>>,
    num_heads: usize,
    n_win: usize,
    topk: usize,
    scale: f64,
}

impl<B: Backend> BiLevelRoutingAttention<B> {
    pub const fn n_win(&self) -> usize {
        self.n_win
    }

    pub const fn topk(&self) -> usize {
        self.topk
    }

    /// # Shapes
    /// - input: `[batch, dim, height, width]`
    /// - output: `[batch, dim, height, width]`
    ///
    /// # Panics
    /// If `height` or `width` is not divisible by `n_win`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, height, width] = x.dims();
        let region = [height / self.n_win, width / self.n_win];

        let qkv = self.qkv_linear.forward(x);
        let q = qkv.clone().narrow(1, 0, channels);
        let k = qkv.clone().narrow(1, channels, channels);
        let v = qkv.narrow(1, 2 * channels, channels);

        let routes = self.route(q.clone(), k.clone(), region);
        let output = self.routed_attention(q, k, v.clone(), routes, region);

        let output = match &self.lepe {
            Some(lepe) => output + lepe.forward(v),
            None => output,
        };
        self.output_linear.forward(output)
    }

    /// Region-to-region routing: indices of the `topk` key regions for every query region.
    ///
    /// Returns `[batch, n_win * n_win, topk]`.
    fn route(&self, q: Tensor<B, 4>, k: Tensor<B, 4>, region: [usize; 2]) -> Tensor<B, 3, Int> {
        let q_r = self.region_means(q.detach(), region);
        let k_r = self.region_means(k.detach(), region);

        let adjacency = q_r.swap_dims(1, 2).matmul(k_r);
        let (_, indices) = adjacency.topk_with_indices(self.topk, 2);
        indices
    }

    /// Mean of every region, `[batch, channels, n_win * n_win]`.
    fn region_means(&self, x: Tensor<B, 4>, region: [usize; 2]) -> Tensor<B, 3> {
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels, self.n_win, region[0], self.n_win, region[1]])
            .mean_dim(5)
            .mean_dim(3)
            .reshape([batch, channels, self.n_win * self.n_win])
    }

    fn routed_attention(
        &self,
        q: Tensor<B, 4>,
        k: Tensor<B, 4>,
        v: Tensor<B, 4>,
        routes: Tensor<B, 3, Int>,
        region: [usize; 2],
    ) -> Tensor<B, 4> {
        let q = grid_to_regions(q, self.num_heads, self.n_win, region);
        let k = gather_regions(grid_to_regions(k, self.num_heads, self.n_win, region), routes.clone());
        let v = gather_regions(grid_to_regions(v, self.num_heads, self.n_win, region), routes);

        // [batch, heads, regions, region_area, topk * region_area]
        let attn = q.mul_scalar(self.scale).matmul(k.swap_dims(3, 4));
        let attn = softmax(attn, 4);
        let output = attn.matmul(v);

        regions_to_grid(output, self.n_win, region)
    }
}

impl<B: Backend> AttentionOp<B> for BiLevelRoutingAttention<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }
}

/// `[batch, heads * head_dim, H, W]` -> `[batch, heads, regions, region_area, head_dim]`
///
/// Batch and heads share one axis during the split so the permute stays within six
/// dimensions.
fn grid_to_regions<B: Backend>(
    x: Tensor<B, 4>,
    num_heads: usize,
    n_win: usize,
    region: [usize; 2],
) -> Tensor<B, 5> {
    let [batch, channels, _, _] = x.dims();
    let head_dim = channels / num_heads;
    x.reshape([batch * num_heads, head_dim, n_win, region[0], n_win, region[1]])
        .permute([0, 2, 4, 3, 5, 1])
        .reshape([batch, num_heads, n_win * n_win, region[0] * region[1], head_dim])
}

/// Inverse of [`grid_to_regions`].
fn regions_to_grid<B: Backend>(x: Tensor<B, 5>, n_win: usize, region: [usize; 2]) -> Tensor<B, 4> {
    let [batch, num_heads, _, _, head_dim] = x.dims();
    x.reshape([batch * num_heads, n_win, n_win, region[0], region[1], head_dim])
        .permute([0, 5, 1, 3, 2, 4])
        .reshape([batch, num_heads * head_dim, n_win * region[0], n_win * region[1]])
}

/// Collects the tokens of the routed regions for every query region.
///
/// `x`: `[batch, heads, regions, region_area, head_dim]`, `routes`: `[batch, regions, topk]`.
/// Returns `[batch, heads, regions, topk * region_area, head_dim]`.
fn gather_regions<B: Backend>(x: Tensor<B, 5>, routes: Tensor<B, 3, Int>) -> Tensor<B, 5> {
    let [batch, num_heads, regions, area, head_dim] = x.dims();
    let [_, _, topk] = routes.dims();

    let index = routes
        .reshape([batch, 1, regions * topk, 1])
        .expand([batch, num_heads, regions * topk, area * head_dim]);

    x.reshape([batch, num_heads, regions, area * head_dim])
        .gather(2, index)
        .reshape([batch, num_heads, regions, topk * area, head_dim])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn routing_attention_preserves_shape() {
        let device = Default::default();
        let attn = BiLevelRoutingAttentionConfig::new(32)
            .with_num_heads(2)
            .with_n_win(4)
            .with_topk(3)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([2, 32, 8, 12], Distribution::Default, &device);

        assert_eq!(attn.forward(x).dims(), [2, 32, 8, 12]);
    }

    #[test]
    fn rejects_topk_beyond_region_count() {
        let device = Default::default();
        let result = BiLevelRoutingAttentionConfig::new(16)
            .with_num_heads(2)
            .with_n_win(2)
            .with_topk(5)
            .init::<TestBackend>(&device);

        assert!(matches!(result, Err(BiFormerError::InvalidConfiguration { .. })));
    }

    #[test]
    fn region_partition_inverts() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([1, 8, 6, 4], Distribution::Default, &device);

        let regions = grid_to_regions(x.clone(), 2, 2, [3, 2]);
        assert_eq!(regions.dims(), [1, 2, 4, 6, 4]);

        regions_to_grid(regions, 2, [3, 2])
            .to_data()
            .assert_eq(&x.to_data(), true);
    }

    #[test]
    fn regions_hold_their_window_tokens() {
        let device = Default::default();
        // [batch 2, 2 heads of dim 1, 4, 4]; value = 32 * batch + 16 * head + pixel
        let x = Tensor::<TestBackend, 1, Int>::arange(0..64, &device)
            .float()
            .reshape([2, 2, 4, 4]);

        let regions = grid_to_regions(x, 2, 2, [2, 2]);

        // batch 1, head 1, top-right window: pixels 2, 3, 6, 7.
        regions
            .slice([1..2, 1..2, 1..2, 0..4, 0..1])
            .reshape([4])
            .to_data()
            .assert_eq(&TensorData::from([50.0f32, 51.0, 54.0, 55.0]), false);
    }

    #[test]
    fn region_means_average_each_window() {
        let device = Default::default();
        let attn = BiLevelRoutingAttentionConfig::new(1)
            .with_num_heads(1)
            .with_n_win(2)
            .with_topk(1)
            .init::<TestBackend>(&device)
            .unwrap();
        // 4x4 map, row-major values 0..16
        let x = Tensor::<TestBackend, 1, Int>::arange(0..16, &device)
            .float()
            .reshape([1, 1, 4, 4]);

        let means = attn.region_means(x, [2, 2]);

        means
            .to_data()
            .assert_eq(&TensorData::from([[[2.5f32, 4.5, 10.5, 12.5]]]), false);
    }

    #[test]
    fn routing_to_every_region_equals_global_attention() {
        let device = Default::default();
        let dim = 16;
        let attn = BiLevelRoutingAttentionConfig::new(dim)
            .with_num_heads(2)
            .with_n_win(2)
            .with_topk(4)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, dim, 4, 4], Distribution::Normal(0.0, 1.0), &device);

        let routed = attn.forward(x.clone());

        // Plain multi-head attention over all 16 tokens with the same projections.
        let qkv = attn.qkv_linear.forward(x);
        let heads = |t: Tensor<TestBackend, 4>| t.reshape([1, 2, dim / 2, 16]).swap_dims(2, 3);
        let q = heads(qkv.clone().narrow(1, 0, dim));
        let k = heads(qkv.clone().narrow(1, dim, dim));
        let v_map = qkv.narrow(1, 2 * dim, dim);
        let v = heads(v_map.clone());
        let weights = softmax(q.mul_scalar(attn.scale).matmul(k.swap_dims(2, 3)), 3);
        let global = weights.matmul(v).swap_dims(2, 3).reshape([1, dim, 4, 4]);
        let global = global + attn.lepe.as_ref().unwrap().forward(v_map);
        let expected = attn.output_linear.forward(global);

        routed
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), burn::tensor::Tolerance::default());
    }
}
