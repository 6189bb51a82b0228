pub mod block;
pub mod resnet;

pub use block::{BlockDescriptor, ConvBn, ResidualBlock};
pub use resnet::{ImageEncoder, ImageEncoderConfig, StageConfig};
