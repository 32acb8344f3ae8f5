use burn::prelude::*;

use super::block::BiFormerBlock;

/// The blocks of one stage, applied in order at a fixed width and resolution.
#[derive(Module, Debug)]
pub struct BasicLayer<B: Backend> {
    blocks: Vec<BiFormerBlock<B>>,
    checkpoint: bool,
}

impl<B: Backend> BasicLayer<B> {
    pub fn new(blocks: Vec<BiFormerBlock<B>>, checkpoint: bool) -> Self {
        Self { blocks, checkpoint }
    }

    pub fn blocks(&self) -> &[BiFormerBlock<B>] {
        &self.blocks
    }

    /// Whether activation checkpointing was requested for this stage. Burn applies it
    /// through the autodiff backend's checkpointing strategy, not per module; see
    /// [`crate::BiFormerConfig::requests_checkpointing`].
    pub const fn checkpoint(&self) -> bool {
        self.checkpoint
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}
