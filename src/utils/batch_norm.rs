use crate::error::Result as VqaResult;
use crate::pretrained::{BnRole, ParamScope, PretrainedWeights};
use burn::module::{Content, DisplaySettings, ModuleDisplay, Param, RunningState};
use burn::prelude::*;

/// Configuration to create a [FrozenBatchNorm](FrozenBatchNorm) layer from pretrained tensors.
#[derive(Config, Debug)]
pub struct FrozenBatchNormConfig {
    /// The number of channels.
    pub num_features: usize,

    #[config(default = 1e-3)]
    pub epsilon: f64,

    /// Decay of the running statistics: `running = decay * running + (1 - decay) * batch`.
    #[config(default = 0.99)]
    pub decay: f64,
}

impl FrozenBatchNormConfig {
    /// Loads `gamma`, `beta`, `moving_mean` and `moving_variance` under `scope`.
    pub fn init_pretrained<B: Backend>(
        &self,
        weights: &PretrainedWeights,
        scope: &ParamScope,
        device: &B::Device,
    ) -> VqaResult<FrozenBatchNorm<B>> {
        let shape = [self.num_features];
        let load = |role: BnRole| -> VqaResult<Tensor<B, 1>> {
            Ok(weights
                .tensor(&scope.batch_norm(role), &shape)?
                .to_tensor(device))
        };
        Ok(FrozenBatchNorm {
            gamma: Param::from_tensor(load(BnRole::Gamma)?),
            beta: Param::from_tensor(load(BnRole::Beta)?),
            running_mean: RunningState::new(load(BnRole::MovingMean)?),
            running_var: RunningState::new(load(BnRole::MovingVariance)?),
            epsilon: self.epsilon,
            decay: self.decay,
        })
    }
}

/// Batch normalization over the channel dimension of an NCHW input whose
/// scale and shift come from a pretrained checkpoint.
///
/// With an autodiff backend the layer normalizes with the batch statistics and
/// folds them into the running statistics; otherwise the running statistics are used.
/// `gamma` and `beta` are expected to be excluded from optimization by the owner
/// (see [`Module::no_grad`]).
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct FrozenBatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    pub running_var: RunningState<Tensor<B, 1>>,
    pub epsilon: f64,
    pub decay: f64,
}

impl<B: Backend> FrozenBatchNorm<B> {
    /// # Shapes
    /// - input: `[batch, channels, height, width]`
    /// - output: `[batch, channels, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, channels, height, width] = x.dims();

        let (mean, var) = if B::ad_enabled() {
            let flat = x
                .clone()
                .swap_dims(0, 1)
                .reshape([channels, batch * height * width]);
            let mean = flat.clone().mean_dim(1);
            let var = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);
            let mean = mean.reshape([channels]);
            let var = var.reshape([channels]);
            self.update_running(mean.clone(), var.clone());
            (mean, var)
        } else {
            (self.running_mean.value(), self.running_var.value())
        };

        let mean = mean.reshape([1, channels, 1, 1]);
        let std = (var + self.epsilon).sqrt().reshape([1, channels, 1, 1]);
        let gamma = self.gamma.val().reshape([1, channels, 1, 1]);
        let beta = self.beta.val().reshape([1, channels, 1, 1]);

        let normalized = (x - mean) / std * gamma + beta;
        debug_assert_eq!([batch, channels, height, width], normalized.dims());
        normalized
    }

    fn update_running(&self, mean: Tensor<B, 1>, var: Tensor<B, 1>) {
        let running_mean = self.running_mean.value_sync();
        let running_var = self.running_var.value_sync();
        self.running_mean.update(
            running_mean.mul_scalar(self.decay) + mean.detach().mul_scalar(1.0 - self.decay),
        );
        self.running_var.update(
            running_var.mul_scalar(self.decay) + var.detach().mul_scalar(1.0 - self.decay),
        );
    }
}

impl<B: Backend> ModuleDisplay for FrozenBatchNorm<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        let [num_features] = self.gamma.shape().dims();
        content
            .add("num_features", &num_features)
            .add("epsilon", &self.epsilon)
            .add("decay", &self.decay)
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pretrained::WeightTensor;
    use burn::backend::{Autodiff, NdArray};
    use std::collections::HashMap;

    fn weights(mean: f32, var: f32) -> PretrainedWeights {
        let scope = ParamScope::stem();
        let mut tensors = HashMap::new();
        for (role, value) in [
            (BnRole::Gamma, 2.0),
            (BnRole::Beta, 1.0),
            (BnRole::MovingMean, mean),
            (BnRole::MovingVariance, var),
        ] {
            tensors.insert(scope.batch_norm(role), WeightTensor::filled(vec![2], value));
        }
        PretrainedWeights::from_tensors(tensors)
    }

    #[test]
    fn inference_uses_running_statistics() {
        type B = NdArray;
        let device = Default::default();
        let norm: FrozenBatchNorm<B> = FrozenBatchNormConfig::new(2)
            .with_epsilon(0.0)
            .init_pretrained(&weights(1.0, 4.0), &ParamScope::stem(), &device)
            .unwrap();
        let x = Tensor::<B, 4>::ones([1, 2, 2, 2], &device) * 5.0;
        let out: Vec<f32> = norm.forward(x).to_data().iter::<f32>().collect();
        // (5 - 1) / 2 * 2 + 1
        for v in out {
            assert!((v - 5.0).abs() < 1e-5);
        }
    }

    #[test]
    fn training_uses_batch_statistics_and_updates_running_mean() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let norm: FrozenBatchNorm<B> = FrozenBatchNormConfig::new(2)
            .with_decay(0.5)
            .init_pretrained(&weights(0.0, 1.0), &ParamScope::stem(), &device)
            .unwrap();
        let x = Tensor::<B, 4>::ones([2, 2, 3, 3], &device) * 4.0;
        let out: Vec<f32> = norm.forward(x).to_data().iter::<f32>().collect();
        // constant input normalizes to zero, leaving beta
        for v in out {
            assert!((v - 1.0).abs() < 1e-4);
        }
        let running: Vec<f32> = norm.running_mean.value_sync().to_data().iter::<f32>().collect();
        assert_eq!(running, vec![2.0, 2.0]);
    }

    #[test]
    fn missing_role_fails() {
        type B = NdArray;
        let device = Default::default();
        let result: VqaResult<FrozenBatchNorm<B>> = FrozenBatchNormConfig::new(2).init_pretrained(
            &PretrainedWeights::default(),
            &ParamScope::stem(),
            &device,
        );
        assert!(result.is_err());
    }
}
