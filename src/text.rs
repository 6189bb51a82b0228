use crate::data::vocab::{EmbeddingTable, PAD_ID};
use crate::error::{Result as VqaResult, VqaError};
use burn::module::Param;
use burn::nn::{Embedding, EmbeddingConfig, Lstm, LstmConfig};
use burn::prelude::*;

#[derive(Config, Debug)]
pub struct TextEncoderConfig {
    /// Number of word ids, padding included.
    pub vocab_size: usize,
    #[config(default = 300)]
    pub d_embedding: usize,
    /// Width of the sentence vector.
    #[config(default = 512)]
    pub d_hidden: usize,
}

impl TextEncoderConfig {
    /// Randomly initialized embedding table, with the padding row zeroed.
    pub fn init<B: Backend>(&self, device: &B::Device) -> TextEncoder<B> {
        let mut embedding = EmbeddingConfig::new(self.vocab_size, self.d_embedding).init(device);
        let mask: Vec<f32> = (0..self.vocab_size)
            .map(|id| if id == PAD_ID { 0.0 } else { 1.0 })
            .collect();
        let mask = Tensor::<B, 1>::from_data(TensorData::new(mask, [self.vocab_size]), device)
            .reshape([self.vocab_size, 1]);
        embedding.weight = Param::from_tensor((embedding.weight.val() * mask).detach());
        self.with_embedding(embedding, device)
    }

    /// Uses a pretrained table, whose shape must be `[vocab_size, d_embedding]`.
    pub fn init_pretrained<B: Backend>(
        &self,
        table: &EmbeddingTable,
        device: &B::Device,
    ) -> VqaResult<TextEncoder<B>> {
        if [table.rows(), table.dim()] != [self.vocab_size, self.d_embedding] {
            return Err(VqaError::ShapeMismatch {
                what: "embedding table",
                expected: vec![self.vocab_size, self.d_embedding],
                actual: vec![table.rows(), table.dim()],
            });
        }
        let mut embedding = EmbeddingConfig::new(self.vocab_size, self.d_embedding).init(device);
        let data = TensorData::new(table.values().to_vec(), [table.rows(), table.dim()])
            .convert::<B::FloatElem>();
        embedding.weight = Param::from_tensor(Tensor::from_data(data, device));
        Ok(self.with_embedding(embedding, device))
    }

    fn with_embedding<B: Backend>(
        &self,
        embedding: Embedding<B>,
        device: &B::Device,
    ) -> TextEncoder<B> {
        TextEncoder {
            embedding,
            lstm: LstmConfig::new(self.d_embedding, self.d_hidden, true).init(device),
            d_hidden: self.d_hidden,
        }
    }
}

/// Embeds a padded batch of questions and summarizes each one with an LSTM.
#[derive(Module, Debug)]
pub struct TextEncoder<B: Backend> {
    pub embedding: Embedding<B>,
    pub lstm: Lstm<B>,
    pub d_hidden: usize,
}

impl<B: Backend> TextEncoder<B> {
    /// The sentence vector of each example is the LSTM output at its last real token.
    ///
    /// # Shapes
    /// - words: `[batch, seq_len]`
    /// - lengths: `[batch]`
    /// - output: `[batch, d_hidden]`
    pub fn forward(&self, words: Tensor<B, 2, Int>, lengths: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let [batch, seq_len] = words.dims();
        let embedded = self.embedding.forward(words);
        let (hidden, _state) = self.lstm.forward(embedded, None);
        debug_assert_eq!([batch, seq_len, self.d_hidden], hidden.dims());

        let last = lengths.clamp(1, seq_len as i64).sub_scalar(1);
        let index = last
            .reshape([batch, 1, 1])
            .repeat(&[1, 1, self.d_hidden]);
        hidden.gather(1, index).reshape([batch, self.d_hidden])
    }
}
