pub mod attention;
pub mod biformer;
pub mod block;
pub mod downsample;
pub mod dpr;
pub mod modules;
pub mod stage;

pub use biformer::{BiFormer, BiFormerRecord};
pub use block::{BiFormerBlock, BiFormerBlockConfig};
pub use downsample::{Downsample, DownsampleConfig};
pub use dpr::DropPathSchedule;
pub use stage::BasicLayer;
