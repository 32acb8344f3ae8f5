//! The BiFormer network: a stem, four (downsample -> stage) pairs, a final norm and a
//! classification head over globally pooled features.

use burn::{
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
};

use super::{
    attention::AttentionKind,
    block::BiFormerBlockConfig,
    downsample::{Downsample, DownsampleConfig},
    dpr::DropPathSchedule,
    modules::{init::trunc_normal_linear, Norm2d},
    stage::BasicLayer,
};
use crate::{
    config::{BiFormerConfig, NUM_STAGES},
    error::{BiFormerError, BiFormerResult},
};

impl BiFormerConfig {
    /// Builds the network.
    ///
    /// # Errors
    ///
    /// Returns the error of [`BiFormerConfig::validate`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> BiFormerResult<BiFormer<B>> {
        self.validate()?;

        let schedule = DropPathSchedule::new(self.drop_path_rate, &self.depth);
        let num_heads = self.num_heads();
        let kinds = self.attention_kinds()?;

        let mut downsample_layers = Vec::with_capacity(NUM_STAGES);
        let mut stages = Vec::with_capacity(NUM_STAGES);
        let mut window_grids = Vec::with_capacity(NUM_STAGES);

        for stage in 0..NUM_STAGES {
            let downsample = if stage == 0 {
                DownsampleConfig::stem(self.in_channels, self.embed_dim[0])
            } else {
                DownsampleConfig::merge(self.embed_dim[stage - 1], self.embed_dim[stage])
            };
            downsample_layers.push(
                downsample
                    .with_norm_layer(self.norm_layer.clone())
                    .with_epsilon(self.layer_norm_eps)
                    .with_init_std(self.init_std)
                    .init(device),
            );

            let blocks = schedule
                .stage(stage)
                .iter()
                .map(|&drop_path| {
                    BiFormerBlockConfig::new(self.embed_dim[stage])
                        .with_drop_path(drop_path)
                        .with_num_heads(num_heads[stage])
                        .with_n_win(self.n_wins[stage])
                        .with_qk_scale(self.qk_scale)
                        .with_topk(self.topks[stage])
                        .with_mlp_ratio(self.mlp_ratios[stage])
                        .with_side_dwconv(self.side_dwconv)
                        .with_epsilon(self.layer_norm_eps)
                        .with_init_std(self.init_std)
                        .init(device)
                })
                .collect::<BiFormerResult<Vec<_>>>()?;
            let checkpoint = self.use_checkpoint_stages.contains(&stage);

            tracing::debug!(
                stage,
                dim = self.embed_dim[stage],
                depth = self.depth[stage],
                heads = num_heads[stage],
                attention = ?kinds[stage],
                checkpoint,
                "built stage"
            );

            stages.push(BasicLayer::new(blocks, checkpoint));
            window_grids.push(match kinds[stage] {
                AttentionKind::Routed { .. } => self.n_wins[stage],
                AttentionKind::Plain => 1,
            });
        }

        let num_features = self.embed_dim[NUM_STAGES - 1];
        let norm = self
            .pre_head_norm_layer
            .as_ref()
            .unwrap_or(&self.norm_layer)
            .init(num_features, self.layer_norm_eps, device);

        tracing::info!(
            embed_dim = ?self.embed_dim,
            depth = ?self.depth,
            num_classes = self.num_classes,
            "initialized BiFormer"
        );

        Ok(BiFormer {
            downsample_layers,
            stages,
            norm,
            head_drop: DropoutConfig::new(self.drop_rate).init(),
            head: build_head(num_features, self.num_classes, self.init_std, device),
            in_channels: self.in_channels,
            num_classes: self.num_classes,
            window_grids,
            init_std: self.init_std,
        })
    }
}

fn build_head<B: Backend>(
    num_features: usize,
    num_classes: usize,
    init_std: f64,
    device: &B::Device,
) -> Option<Linear<B>> {
    (num_classes > 0).then(|| trunc_normal_linear(num_features, num_classes, init_std, device))
}

/// BiFormer image classifier on NCHW inputs.
#[derive(Module, Debug)]
pub struct BiFormer<B: Backend> {
    downsample_layers: Vec<Downsample<B>>,
    stages: Vec<BasicLayer<B>>,
    norm: Norm2d<B>,
    head_drop: Dropout,
    head: Option<Linear<B>>,
    in_channels: usize,
    num_classes: usize,
    /// Routing grid per side of every stage; 1 for stages with plain attention.
    window_grids: Vec<usize>,
    init_std: f64,
}

impl<B: Backend> BiFormer<B> {
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Channel count expected by [`BiFormer::forward`].
    pub const fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Width of the pooled feature vector.
    pub fn num_features(&self) -> usize {
        self.embed_dim()[NUM_STAGES - 1]
    }

    /// Channel width of every stage.
    pub fn embed_dim(&self) -> [usize; NUM_STAGES] {
        let mut dims = [0; NUM_STAGES];
        for (dim, layer) in dims.iter_mut().zip(&self.downsample_layers) {
            *dim = layer.out_channels();
        }
        dims
    }

    pub fn stages(&self) -> &[BasicLayer<B>] {
        &self.stages
    }

    /// Indices of the stages that requested activation checkpointing.
    ///
    /// Burn checkpoints through the autodiff backend rather than per module: a model with
    /// any such stage is meant to be trained on `Autodiff<B, BalancedCheckpointing>`.
    pub fn checkpointed_stages(&self) -> Vec<usize> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| stage.checkpoint())
            .map(|(index, _)| index)
            .collect()
    }

    /// The classification head, `None` for a headless model.
    pub fn head(&self) -> Option<&Linear<B>> {
        self.head.as_ref()
    }

    /// Replaces the classification head, keeping every other parameter.
    pub fn reset_classifier(mut self, num_classes: usize, device: &B::Device) -> Self {
        self.head = build_head(self.num_features(), num_classes, self.init_std, device);
        self.num_classes = num_classes;
        self
    }

    /// Checks that `dims` can flow through every stage.
    ///
    /// # Errors
    ///
    /// Returns [`BiFormerError::InvalidTensorShape`] if the channel count differs from the
    /// configured input channels, the spatial size is zero or not divisible by 32, or a
    /// routed stage's resolution is not divisible by its window grid.
    pub fn check_input(&self, dims: [usize; 4]) -> BiFormerResult<()> {
        let [_, channels, height, width] = dims;
        let stride = BiFormerConfig::stage_stride(NUM_STAGES - 1);

        if channels != self.in_channels {
            return Err(shape_error(format!("{} input channels", self.in_channels), dims));
        }
        if height == 0 || width == 0 || height % stride != 0 || width % stride != 0 {
            return Err(shape_error(
                format!("non-empty height and width divisible by {stride}"),
                dims,
            ));
        }

        for (stage, &grid) in self.window_grids.iter().enumerate() {
            let stride = BiFormerConfig::stage_stride(stage);
            let (h, w) = (height / stride, width / stride);
            if h % grid != 0 || w % grid != 0 {
                return Err(shape_error(
                    format!(
                        "stage {stage} resolution {h}x{w} divisible by its {grid}x{grid} routing grid"
                    ),
                    dims,
                ));
            }
        }

        Ok(())
    }

    /// Classifies a batch of images.
    ///
    /// # Shapes
    /// - input: `[batch, in_channels, height, width]`
    /// - output: `[batch, num_classes]`, or `[batch, num_features]` without a head
    ///
    /// # Errors
    ///
    /// See [`BiFormer::check_input`].
    pub fn forward(&self, x: Tensor<B, 4>) -> BiFormerResult<Tensor<B, 2>> {
        self.check_input(x.dims())?;
        Ok(self.forward_head(self.forward_features(x)))
    }

    /// Feature map after the final norm, `[batch, num_features, height / 32, width / 32]`.
    ///
    /// Expects an input accepted by [`BiFormer::check_input`].
    pub fn forward_features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .downsample_layers
            .iter()
            .zip(&self.stages)
            .fold(x, |x, (downsample, stage)| stage.forward(downsample.forward(x)));
        self.norm.forward(x)
    }

    /// Global average pool over height and width, dropout, then the head if present.
    pub fn forward_head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = self.pool(x);
        let pooled = self.head_drop.forward(pooled);
        match &self.head {
            Some(head) => head.forward(pooled),
            None => pooled,
        }
    }

    fn pool(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        x.mean_dim(3).mean_dim(2).flatten(1, 3)
    }
}

fn shape_error(expected: String, dims: [usize; 4]) -> BiFormerError {
    BiFormerError::InvalidTensorShape {
        expected: format!("[batch, channels, height, width] with {expected}"),
        actual: format!("{dims:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::modules::NormLayer;
    use burn::{
        backend::{autodiff::checkpoint::strategy::BalancedCheckpointing, Autodiff, NdArray},
        module::AutodiffModule,
        tensor::{Distribution, Tolerance},
    };

    type TestBackend = NdArray<f32>;
    type CheckpointedBackend = Autodiff<TestBackend, BalancedCheckpointing>;

    fn tiny() -> BiFormerConfig {
        BiFormerConfig::new()
            .with_num_classes(10)
            .with_depth([1, 1, 1, 1])
            .with_embed_dim([16, 32, 48, 64])
            .with_head_dim(8)
            .with_n_wins([2; NUM_STAGES])
            .with_topks([1, 2, 4, -1])
            .with_side_dwconv(3)
    }

    #[test]
    fn biformer_stl_classifies_224() {
        let device = Default::default();
        let model = BiFormerConfig::new().init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 3, 224, 224], Distribution::Default, &device);

        assert_eq!(model.forward(x).unwrap().dims(), [1, 1000]);
    }

    #[test]
    fn tiny_model_runs_on_batch_norm() {
        let device = Default::default();
        let model = tiny()
            .with_norm_layer(NormLayer::BatchNorm2d)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 64, 64], Distribution::Default, &device);

        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.embed_dim(), [16, 32, 48, 64]);
        assert_eq!(model.forward(x.clone()).unwrap().dims(), [2, 10]);
        assert_eq!(model.forward_features(x).dims(), [2, 64, 2, 2]);
    }

    #[test]
    fn headless_model_returns_pooled_features() {
        let device = Default::default();
        let model = tiny().with_num_classes(0).init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 64, 64], Distribution::Default, &device);

        let output = model.forward(x.clone()).unwrap();
        let pooled = model.pool(model.forward_features(x));

        assert!(model.head().is_none());
        assert_eq!(output.dims(), [2, 64]);
        output.to_data().assert_eq(&pooled.to_data(), true);
    }

    #[test]
    fn rejects_input_not_divisible_by_32() {
        let device = Default::default();
        let model = tiny().init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 48, 64], &device);

        assert!(matches!(
            model.forward(x),
            Err(BiFormerError::InvalidTensorShape { .. })
        ));
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let device = Default::default();
        let model = tiny().init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 64, 64], &device);

        assert!(matches!(
            model.forward(x),
            Err(BiFormerError::InvalidTensorShape { .. })
        ));
    }

    #[test]
    fn rejects_resolution_not_divisible_by_window_grid() {
        let device = Default::default();
        let model = tiny()
            .with_n_wins([3, 2, 2, 2])
            .init::<TestBackend>(&device)
            .unwrap();

        // Stage 0 sees 16x16, which a 3x3 grid cannot split.
        assert!(matches!(
            model.check_input([1, 3, 64, 64]),
            Err(BiFormerError::InvalidTensorShape { .. })
        ));
        assert!(model.check_input([1, 3, 160, 96]).is_err());
        assert!(model.check_input([1, 3, 96, 192]).is_ok());
    }

    #[test]
    fn reset_classifier_keeps_features() {
        let device = Default::default();
        let model = tiny().init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 3, 64, 64], Distribution::Default, &device);
        let features = model.forward_features(x.clone());

        assert_eq!(model.head().map(|head| head.weight.val().dims()), Some([64, 10]));

        let model = model.reset_classifier(3, &device);

        assert_eq!(model.num_classes(), 3);
        assert_eq!(model.head().map(|head| head.weight.val().dims()), Some([64, 3]));
        assert_eq!(model.forward(x.clone()).unwrap().dims(), [1, 3]);
        model
            .forward_features(x)
            .to_data()
            .assert_eq(&features.to_data(), true);
    }

    #[test]
    fn records_checkpointed_stages() {
        let device = Default::default();
        let model = tiny()
            .with_use_checkpoint_stages(vec![1, 3])
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!(model.checkpointed_stages(), vec![1, 3]);
    }

    #[test]
    fn checkpointed_autodiff_matches_inference() {
        let device = Default::default();
        let config = tiny().with_use_checkpoint_stages(vec![0, 1, 2, 3]);
        assert!(config.requests_checkpointing());

        let model = config.init::<CheckpointedBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 64, 64], Distribution::Default, &device);

        let expected = model.valid().forward(x.clone()).unwrap();
        let input = Tensor::<CheckpointedBackend, 4>::from_inner(x).require_grad();
        let output = model.forward(input.clone()).unwrap();

        output
            .clone()
            .inner()
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), Tolerance::default());

        let grads = output.sum().backward();
        let head = model.head().unwrap();
        assert!(head.weight.val().grad(&grads).is_some());
        assert_eq!(input.grad(&grads).map(|grad| grad.dims()), Some([2, 3, 64, 64]));
    }

    #[test]
    fn drop_path_ramps_across_stages() {
        let device = Default::default();
        let model = tiny()
            .with_depth([1, 2, 0, 1])
            .with_drop_path_rate(0.3)
            .init::<TestBackend>(&device)
            .unwrap();

        let rates: Vec<f64> = model
            .stages()
            .iter()
            .flat_map(|stage| stage.blocks().iter().map(|block| block.drop_path_prob()))
            .collect();

        assert_eq!(rates.len(), 4);
        assert!((rates[0] - 0.0).abs() < 1e-12);
        assert!((rates[3] - 0.3).abs() < 1e-12);
        assert!(rates.windows(2).all(|w| w[0] < w[1]));
    }
}
