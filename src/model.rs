use crate::attention::{AttentionOutput, SoftAttention, SoftAttentionConfig};
use crate::classifier::{AnswerClassifier, AnswerClassifierConfig};
use crate::data::batcher::VqaBatch;
use crate::data::vocab::EmbeddingTable;
use crate::encoder::{ImageEncoder, ImageEncoderConfig};
use crate::error::{Result as VqaResult, VqaError};
use crate::pretrained::PretrainedWeights;
use crate::text::{TextEncoder, TextEncoderConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::train::ClassificationOutput;

#[derive(Config, Debug)]
pub struct VqaModelConfig {
    pub text: TextEncoderConfig,
    pub attention: SoftAttentionConfig,
    pub classifier: AnswerClassifierConfig,
    #[config(default = "ImageEncoderConfig::new()")]
    pub image: ImageEncoderConfig,
    /// Side of the square input images.
    #[config(default = 224)]
    pub image_side: usize,
}

impl VqaModelConfig {
    /// The reference geometry for a given vocabulary and answer set.
    pub fn for_corpus(vocab_size: usize, n_answers: usize) -> Self {
        Self::new(
            TextEncoderConfig::new(vocab_size),
            SoftAttentionConfig::new(),
            AnswerClassifierConfig::new(n_answers),
        )
    }

    /// Checks that the output of every component fits the input of the next one.
    pub fn check(&self) -> VqaResult<()> {
        let d_model = self.attention.d_model;
        let grid = self.image.output_grid(self.image_side);
        let checks = [
            ("image feature grid", self.attention.grid, grid),
            ("image feature depth", d_model, self.image.out_channels()),
            ("sentence vector width", d_model, self.text.d_hidden),
            ("classifier input width", d_model, self.classifier.d_input),
        ];
        for (what, expected, actual) in checks {
            if expected != actual {
                return Err(VqaError::ShapeMismatch {
                    what,
                    expected: vec![expected],
                    actual: vec![actual],
                });
            }
        }
        Ok(())
    }

    /// Builds the trainable part. `embeddings` replaces the random word table when given.
    pub fn init_head<B: Backend>(
        &self,
        embeddings: Option<&EmbeddingTable>,
        device: &B::Device,
    ) -> VqaResult<VqaHead<B>> {
        let text = match embeddings {
            Some(table) => self.text.init_pretrained(table, device)?,
            None => self.text.init(device),
        };
        Ok(VqaHead {
            text,
            attention: self.attention.init(device),
            classifier: self.classifier.init(device),
        })
    }

    pub fn init<B: Backend>(
        &self,
        weights: &PretrainedWeights,
        embeddings: Option<&EmbeddingTable>,
        device: &B::Device,
    ) -> VqaResult<VqaModel<B>> {
        self.check()?;
        Ok(VqaModel {
            encoder: self.image.init(weights, device)?,
            head: self.init_head(embeddings, device)?,
        })
    }
}

/// Every trainable parameter: text encoder, attention and classifier.
#[derive(Module, Debug)]
pub struct VqaHead<B: Backend> {
    pub text: TextEncoder<B>,
    pub attention: SoftAttention<B>,
    pub classifier: AnswerClassifier<B>,
}

#[derive(Debug, Clone)]
pub struct VqaOutput<B: Backend> {
    /// `[batch, n_answers]`
    pub logits: Tensor<B, 2>,
    pub attention: AttentionOutput<B>,
}

impl<B: Backend> VqaHead<B> {
    /// # Shapes
    /// - features: `[batch, grid, grid, d_model]`
    /// - words: `[batch, seq_len]`
    /// - lengths: `[batch]`
    pub fn forward(
        &self,
        features: Tensor<B, 4>,
        words: Tensor<B, 2, Int>,
        lengths: Tensor<B, 1, Int>,
    ) -> VqaResult<VqaOutput<B>> {
        let sentence = self.text.forward(words, lengths);
        let attention = self.attention.forward(features, sentence)?;
        let logits = self.classifier.forward(attention.fused.clone(), None)?;
        Ok(VqaOutput { logits, attention })
    }
}

/// The frozen image encoder followed by the trainable head.
#[derive(Module, Debug)]
pub struct VqaModel<B: Backend> {
    pub encoder: ImageEncoder<B>,
    pub head: VqaHead<B>,
}

impl<B: Backend> VqaModel<B> {
    /// # Shapes
    /// - images: `[batch, 3, side, side]`
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        words: Tensor<B, 2, Int>,
        lengths: Tensor<B, 1, Int>,
    ) -> VqaResult<VqaOutput<B>> {
        let features = self.encoder.forward(images);
        self.head.forward(features, words, lengths)
    }

    /// Forward pass plus the cross-entropy of the raw logits against the gold answers.
    pub fn forward_classification(
        &self,
        batch: VqaBatch<B>,
    ) -> VqaResult<(ClassificationOutput<B>, AttentionOutput<B>)> {
        let targets = batch.answers;
        let output = self.forward(batch.images, batch.words, batch.lengths)?;
        let loss = CrossEntropyLossConfig::new()
            .init(&output.logits.device())
            .forward(output.logits.clone(), targets.clone());
        Ok((
            ClassificationOutput::new(loss, output.logits, targets),
            output.attention,
        ))
    }
}

/// Share of examples whose most likely answer is the gold one.
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f32 {
    let [batch, _] = logits.dims();
    softmax(logits, 1)
        .argmax(1)
        .reshape([batch])
        .equal(targets)
        .float()
        .mean()
        .into_scalar()
        .elem::<f32>()
}

/// Most likely answer id of every example.
pub fn predictions<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|id| id as usize)
        .collect()
}
