//! Soft spatial attention over an image feature grid, conditioned on a sentence vector.

use crate::error::{Result as VqaResult, VqaError};
use burn::module::Param;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::softmax;

#[derive(Config, Debug)]
pub struct SoftAttentionConfig {
    /// Width of both the grid features and the sentence vector.
    #[config(default = 512)]
    pub d_model: usize,
    /// Side of the square feature grid.
    #[config(default = 28)]
    pub grid: usize,
    /// Expected batch size; inputs of any other batch size are rejected.
    #[config(default = 32)]
    pub batch_size: usize,
}

impl SoftAttentionConfig {
    pub fn cells(&self) -> usize {
        self.grid * self.grid
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SoftAttention<B> {
        SoftAttention {
            query: LinearConfig::new(self.d_model, self.d_model).init(device),
            image: LinearConfig::new(self.d_model, self.d_model)
                .with_bias(false)
                .init(device),
            score: LinearConfig::new(self.d_model, 1).init(device),
            position_bias: Param::from_tensor(Tensor::zeros([self.cells()], device)),
            d_model: self.d_model,
            grid: self.grid,
            batch_size: self.batch_size,
        }
    }
}

#[derive(Module, Debug)]
pub struct SoftAttention<B: Backend> {
    /// Sentence projection, `d_model -> d_model`.
    pub query: Linear<B>,
    /// Per-cell feature projection, `d_model -> d_model`, without bias.
    pub image: Linear<B>,
    /// Hidden state to raw score, `d_model -> 1`.
    pub score: Linear<B>,
    /// One learned bias per grid cell, `[grid * grid]`.
    pub position_bias: Param<Tensor<B, 1>>,
    pub d_model: usize,
    pub grid: usize,
    pub batch_size: usize,
}

/// Result of one attention pass. Recomputed on every forward, never stored.
#[derive(Debug, Clone)]
pub struct AttentionOutput<B: Backend> {
    /// Attended summary plus the sentence vector, `[batch, d_model]`.
    pub fused: Tensor<B, 2>,
    /// Attention weights laid out on the grid, `[batch, grid, grid, 1]`.
    pub attention_map: Tensor<B, 4>,
    /// Attention weights per cell, `[batch, grid * grid]`, each row summing to 1.
    pub weights: Tensor<B, 2>,
}

impl<B: Backend> SoftAttention<B> {
    /// # Shapes
    /// - features: `[batch, grid, grid, d_model]`
    /// - sentence: `[batch, d_model]`
    pub fn forward(
        &self,
        features: Tensor<B, 4>,
        sentence: Tensor<B, 2>,
    ) -> VqaResult<AttentionOutput<B>> {
        let [batch, grid, d] = [self.batch_size, self.grid, self.d_model];
        let cells = grid * grid;
        check_dims("image feature grid", &[batch, grid, grid, d], &features.dims())?;
        check_dims("sentence vector", &[batch, d], &sentence.dims())?;

        let flat = features.reshape([batch, cells, d]);

        let h1 = self.query.forward(sentence.clone());
        let h2 = self.image.forward(flat.clone());
        let hidden = (h2 + h1.unsqueeze_dim::<3>(1)).tanh();
        debug_assert_eq!([batch, cells, d], hidden.dims());

        let scores = self.score.forward(hidden).reshape([batch, cells])
            + self.position_bias.val().unsqueeze::<2>();
        let weights = softmax(scores, 1);

        let attended = (flat * weights.clone().reshape([batch, cells, 1]))
            .sum_dim(1)
            .reshape([batch, d]);
        let fused = attended + sentence;

        Ok(AttentionOutput {
            fused,
            attention_map: weights.clone().reshape([batch, grid, grid, 1]),
            weights,
        })
    }
}

fn check_dims(what: &'static str, expected: &[usize], actual: &[usize]) -> VqaResult<()> {
    if expected != actual {
        return Err(VqaError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray;

    fn assert_distribution(weights: Tensor<B, 2>) {
        let [batch, cells] = weights.dims();
        let values: Vec<f32> = weights.to_data().iter::<f32>().collect();
        for row in values.chunks(cells) {
            assert!(row.iter().all(|&w| w >= 0.0));
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "sum {sum}");
        }
        assert_eq!(values.len(), batch * cells);
    }

    #[test]
    fn weights_form_a_distribution() {
        let device = Default::default();
        let config = SoftAttentionConfig::new()
            .with_d_model(8)
            .with_grid(3)
            .with_batch_size(2);
        let attention: SoftAttention<B> = config.init(&device);

        let features = Tensor::<B, 4>::random([2, 3, 3, 8], Distribution::Normal(0., 50.), &device);
        let sentence = Tensor::<B, 2>::random([2, 8], Distribution::Normal(0., 50.), &device);
        let out = attention.forward(features, sentence).unwrap();
        assert_eq!(out.attention_map.dims(), [2, 3, 3, 1]);
        assert_distribution(out.weights);

        let out = attention
            .forward(Tensor::zeros([2, 3, 3, 8], &device), Tensor::zeros([2, 8], &device))
            .unwrap();
        assert_distribution(out.weights);
    }

    #[test]
    fn fused_width_matches_the_sentence_width() {
        let device = Default::default();
        for batch in [1, 3] {
            let attention: SoftAttention<B> = SoftAttentionConfig::new()
                .with_d_model(6)
                .with_grid(2)
                .with_batch_size(batch)
                .init(&device);
            let out = attention
                .forward(
                    Tensor::ones([batch, 2, 2, 6], &device),
                    Tensor::ones([batch, 6], &device),
                )
                .unwrap();
            assert_eq!(out.fused.dims(), [batch, 6]);
        }
    }

    #[test]
    fn constant_grid_gets_uniform_attention() {
        let device = Default::default();
        let attention: SoftAttention<B> = SoftAttentionConfig::new().with_batch_size(2).init(&device);
        let features = Tensor::<B, 4>::ones([2, 28, 28, 512], &device);
        let sentence = Tensor::<B, 2>::random([2, 512], Distribution::Default, &device);

        let out = attention.forward(features, sentence.clone()).unwrap();
        for w in out.weights.to_data().iter::<f32>() {
            assert!((w - 1.0 / 784.0).abs() < 1e-6);
        }
        // uniform weights over a constant grid attend to the constant itself
        let expected = sentence + 1.0;
        let fused: Vec<f32> = out.fused.to_data().iter::<f32>().collect();
        let expected: Vec<f32> = expected.to_data().iter::<f32>().collect();
        for (a, b) in fused.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn mismatched_batch_is_rejected() {
        let device = Default::default();
        let attention: SoftAttention<B> = SoftAttentionConfig::new()
            .with_d_model(4)
            .with_grid(2)
            .with_batch_size(4)
            .init(&device);
        let result = attention.forward(Tensor::ones([3, 2, 2, 4], &device), Tensor::ones([3, 4], &device));
        assert!(matches!(
            result,
            Err(VqaError::ShapeMismatch { what: "image feature grid", .. })
        ));
    }
}
