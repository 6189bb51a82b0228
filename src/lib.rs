pub mod attention;
pub mod backend;
pub mod classifier;
pub mod data;
pub mod encoder;
pub mod error;
pub mod model;
pub mod pretrained;
pub mod text;
pub mod training;
pub mod utils;

pub mod prelude {
    pub use crate::attention::{AttentionOutput, SoftAttention, SoftAttentionConfig};
    pub use crate::classifier::{AnswerClassifier, AnswerClassifierConfig};
    pub use crate::encoder::{ImageEncoder, ImageEncoderConfig};
    pub use crate::error::{Result, VqaError};
    pub use crate::model::{VqaHead, VqaModel, VqaModelConfig, VqaOutput, accuracy};
    pub use crate::pretrained::{PretrainedWeights, WeightImporter};
    pub use crate::text::{TextEncoder, TextEncoderConfig};
    pub use crate::training::{Trainer, TrainingConfig};
}
