use crate::error::{Result as VqaResult, VqaError};
use crate::pretrained::PretrainedWeights;
use burn::module::Param;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

#[derive(Config, Debug)]
pub struct AnswerClassifierConfig {
    /// Number of answer classes.
    pub n_answers: usize,
    #[config(default = 512)]
    pub d_input: usize,
    /// Width of an optional auxiliary vector concatenated to the input.
    #[config(default = 0)]
    pub d_aux: usize,
    #[config(default = 1024)]
    pub d_hidden: usize,
}

impl AnswerClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AnswerClassifier<B> {
        AnswerClassifier {
            hidden: LinearConfig::new(self.d_input + self.d_aux, self.d_hidden).init(device),
            output: LinearConfig::new(self.d_hidden, self.n_answers).init(device),
            d_input: self.d_input,
            d_aux: self.d_aux,
        }
    }
}

/// Two dense layers from the fused representation to answer logits.
#[derive(Module, Debug)]
pub struct AnswerClassifier<B: Backend> {
    pub hidden: Linear<B>,
    pub output: Linear<B>,
    pub d_input: usize,
    pub d_aux: usize,
}

impl<B: Backend> AnswerClassifier<B> {
    /// # Shapes
    /// - fused: `[batch, d_input]`
    /// - aux: `[batch, d_aux]`, required exactly when `d_aux > 0`
    /// - output: `[batch, n_answers]`
    pub fn forward(&self, fused: Tensor<B, 2>, aux: Option<Tensor<B, 2>>) -> VqaResult<Tensor<B, 2>> {
        let [batch, _] = fused.dims();
        let x = match aux {
            Some(aux) => Tensor::cat(vec![fused, aux], 1),
            None => fused,
        };
        let [_, width] = x.dims();
        if width != self.d_input + self.d_aux {
            return Err(VqaError::ShapeMismatch {
                what: "classifier input",
                expected: vec![batch, self.d_input + self.d_aux],
                actual: vec![batch, width],
            });
        }
        let x = relu(self.hidden.forward(x));
        Ok(self.output.forward(x))
    }
}

/// Rebuilds the imported final dense layer of the pretrained network.
pub fn pretrained_dense<B: Backend>(
    weights: &PretrainedWeights,
    device: &B::Device,
) -> VqaResult<Linear<B>> {
    let (kernel, bias) = weights.classifier()?;
    let [d_input, d_output] = match kernel.shape.as_slice() {
        &[d_input, d_output] => [d_input, d_output],
        other => {
            return Err(VqaError::ShapeMismatch {
                what: "pretrained dense kernel",
                expected: vec![0, 0],
                actual: other.to_vec(),
            });
        }
    };
    if bias.shape != [d_output] {
        return Err(VqaError::ShapeMismatch {
            what: "pretrained dense bias",
            expected: vec![d_output],
            actual: bias.shape.clone(),
        });
    }

    let mut linear = LinearConfig::new(d_input, d_output).init(device);
    linear.weight = Param::from_tensor(kernel.to_tensor(device));
    linear.bias = Some(Param::from_tensor(bias.to_tensor(device)));
    Ok(linear)
}
