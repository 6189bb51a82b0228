use super::block::{BlockDescriptor, ConvBn, ConvSpec, NormSettings, ResidualBlock};
use crate::error::Result as VqaResult;
use crate::pretrained::{ParamScope, PretrainedWeights};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// One residual stage: `blocks` bottlenecks of base `width`, the first one strided.
#[derive(Config, Debug)]
pub struct StageConfig {
    pub blocks: usize,
    pub width: usize,
    pub stride: usize,
}

pub fn default_stages() -> Vec<StageConfig> {
    vec![StageConfig::new(3, 64, 1), StageConfig::new(4, 128, 2)]
}

/// Truncated ResNet-v1: the stem followed by the configured stages.
///
/// The defaults build `res1` to `res3` of a ResNet-101, which turns a
/// `224×224` image into a `28×28×512` grid.
#[derive(Config, Debug)]
pub struct ImageEncoderConfig {
    #[config(default = 3)]
    pub in_channels: usize,
    #[config(default = 64)]
    pub stem_width: usize,
    #[config(default = 7)]
    pub stem_kernel: usize,
    #[config(default = "default_stages()")]
    pub stages: Vec<StageConfig>,
    #[config(default = 1e-3)]
    pub bn_epsilon: f64,
    #[config(default = 0.99)]
    pub bn_decay: f64,
}

impl ImageEncoderConfig {
    fn stem(&self) -> ConvSpec {
        ConvSpec {
            scope: ParamScope::stem(),
            c_in: self.in_channels,
            c_out: self.stem_width,
            kernel: self.stem_kernel,
            stride: 2,
        }
    }

    fn norm(&self) -> NormSettings {
        NormSettings {
            epsilon: self.bn_epsilon,
            decay: self.bn_decay,
        }
    }

    /// Descriptors of every residual block, in execution order.
    pub fn blocks(&self) -> Vec<BlockDescriptor> {
        let mut descriptors = Vec::new();
        let mut in_channels = self.stem_width;
        for (i, stage) in self.stages.iter().enumerate() {
            for block in 0..stage.blocks {
                let descriptor = BlockDescriptor {
                    stage: i + 2,
                    block: block + 1,
                    in_channels,
                    width: stage.width,
                    stride: if block == 0 { stage.stride } else { 1 },
                };
                in_channels = descriptor.out_channels();
                descriptors.push(descriptor);
            }
        }
        descriptors
    }

    /// Channel depth of the output grid.
    pub fn out_channels(&self) -> usize {
        self.blocks()
            .last()
            .map(BlockDescriptor::out_channels)
            .unwrap_or(self.stem_width)
    }

    /// Side of the output grid for a square input of side `input_side`.
    pub fn output_grid(&self, input_side: usize) -> usize {
        let stem = self.stem();
        let side = (input_side + 2 * stem.padding() - stem.kernel) / stem.stride + 1;
        // 3×3/2 max-pool, SAME padding
        let side = (side - 1) / 2 + 1;
        self.blocks()
            .iter()
            .fold(side, |side, block| (side - 1) / block.stride + 1)
    }

    /// Every `(path, shape)` that [init](Self::init) will look up.
    pub fn required_parameters(&self) -> Vec<(String, Vec<usize>)> {
        let mut params = self.stem().required_parameters();
        for block in self.blocks() {
            params.extend(block.required_parameters());
        }
        params
    }

    /// Builds the encoder from pretrained tensors. Every parameter is frozen.
    pub fn init<B: Backend>(
        &self,
        weights: &PretrainedWeights,
        device: &B::Device,
    ) -> VqaResult<ImageEncoder<B>> {
        let norm = self.norm();
        let stem = self.stem().init(weights, norm, device)?;
        let pool = MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init();
        let blocks = self
            .blocks()
            .iter()
            .map(|descriptor| descriptor.init(weights, norm, device))
            .collect::<VqaResult<Vec<_>>>()?;
        tracing::debug!(
            "image encoder built with {} residual blocks, {} output channels",
            blocks.len(),
            self.out_channels()
        );

        let encoder = ImageEncoder { stem, pool, blocks };
        Ok(encoder.no_grad())
    }
}

#[derive(Module, Debug)]
pub struct ImageEncoder<B: Backend> {
    pub stem: ConvBn<B>,
    pub pool: MaxPool2d,
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ImageEncoder<B> {
    /// # Shapes
    /// - input: `[batch, channels, height, width]`
    /// - output: `[batch, grid, grid, out_channels]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.stem.forward(images));
        let x = max_pool_same(&self.pool, x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        // NCHW -> NHWC
        x.swap_dims(1, 3).swap_dims(1, 2)
    }
}

/// Leading and trailing padding of TF `SAME` along one axis.
fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let output = input.div_ceil(stride);
    let total = ((output - 1) * stride + kernel).saturating_sub(input);
    (total / 2, total - total / 2)
}

/// Max-pool with TF `SAME` windows: any odd padding cell goes to the bottom and right.
///
/// Inputs are post-ReLU, so zero padding never wins the max.
fn max_pool_same<B: Backend>(pool: &MaxPool2d, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let (top, bottom) = same_padding(height, pool.kernel_size[0], pool.stride[0]);
    let (left, right) = same_padding(width, pool.kernel_size[1], pool.stride[1]);
    pool.forward(x.pad((left, right, top, bottom), 0.0))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::VqaError;
    use crate::pretrained::WeightTensor;
    use burn::backend::NdArray;

    type B = NdArray;

    /// A 32×32 input gives a 4×4×16 grid.
    pub(crate) fn small_config() -> ImageEncoderConfig {
        ImageEncoderConfig::new()
            .with_stem_width(4)
            .with_stages(vec![StageConfig::new(1, 2, 1), StageConfig::new(2, 4, 2)])
    }

    pub(crate) fn synthetic_weights(config: &ImageEncoderConfig) -> PretrainedWeights {
        let tensors = config
            .required_parameters()
            .into_iter()
            .map(|(path, shape)| {
                let value = if path.ends_with("moving_variance") || path.ends_with("gamma") {
                    1.0
                } else {
                    0.05
                };
                (path, WeightTensor::filled(shape, value))
            })
            .collect();
        PretrainedWeights::from_tensors(tensors)
    }

    #[test]
    fn default_geometry() {
        let config = ImageEncoderConfig::new();
        assert_eq!(config.output_grid(224), 28);
        assert_eq!(config.out_channels(), 512);

        let blocks = config.blocks();
        assert_eq!(blocks.len(), 7);
        assert!(blocks.iter().all(|block| block.stage <= 3));
        assert_eq!(blocks[3].stride, 2);
        assert_eq!(blocks[3].in_channels, 256);

        let params = config.required_parameters();
        assert!(params.contains(&("res1/weights".into(), vec![7, 7, 3, 64])));
        assert!(params.contains(&("res2/block1/branch2/a/weights".into(), vec![1, 1, 64, 64])));
        assert!(params.contains(&("res3/block1/branch1/weights".into(), vec![1, 1, 256, 512])));
        assert!(params.contains(&("res3/block4/branch2/c/weights".into(), vec![1, 1, 128, 512])));
        assert!(!params.iter().any(|(path, _)| path.starts_with("res4")));
        // stem 5 + two projected blocks 20 each + five identity blocks 15 each
        assert_eq!(params.len(), 5 + 2 * 20 + 5 * 15);
    }

    #[test]
    fn forward_produces_nhwc_grid() {
        let device = Default::default();
        let config = small_config();
        let encoder: ImageEncoder<B> = config
            .init(&synthetic_weights(&config), &device)
            .unwrap();
        assert_eq!(config.output_grid(32), 4);

        let images = Tensor::<B, 4>::ones([2, 3, 32, 32], &device);
        let grid = encoder.forward(images);
        assert_eq!(grid.dims(), [2, 4, 4, config.out_channels()]);
    }

    #[test]
    fn pooling_pads_after_on_even_inputs() {
        assert_eq!(same_padding(112, 3, 2), (0, 1));
        assert_eq!(same_padding(5, 3, 2), (1, 1));

        let device = Default::default();
        let pool = MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init();
        let mut values = vec![0f32; 16];
        values[2 * 4] = 1.0; // row 2, column 0
        let x = Tensor::<B, 4>::from_data(TensorData::new(values, [1, 1, 4, 4]), &device);

        let pooled = max_pool_same(&pool, x);
        assert_eq!(pooled.dims(), [1, 1, 2, 2]);
        let pooled: Vec<f32> = pooled.into_data().iter::<f32>().collect();
        assert_eq!(pooled, vec![1., 0., 1., 0.]);
    }

    #[test]
    fn missing_parameter_fails_loudly() {
        let device = Default::default();
        let config = small_config();
        let mut tensors = std::collections::HashMap::new();
        for (path, shape) in config.required_parameters() {
            if path != "res3/block1/branch1/weights" {
                tensors.insert(path, WeightTensor::filled(shape, 0.0));
            }
        }
        let result: VqaResult<ImageEncoder<B>> =
            config.init(&PretrainedWeights::from_tensors(tensors), &device);
        assert!(
            matches!(result, Err(VqaError::MissingTensor(path)) if path == "res3/block1/branch1/weights")
        );
    }

    #[test]
    fn mis_shaped_parameter_fails() {
        let device = Default::default();
        let config = small_config();
        let mut tensors = std::collections::HashMap::new();
        for (path, shape) in config.required_parameters() {
            tensors.insert(path, WeightTensor::filled(shape, 0.0));
        }
        tensors.insert("res1/weights".into(), WeightTensor::filled(vec![3, 3, 3, 4], 0.0));
        let result: VqaResult<ImageEncoder<B>> =
            config.init(&PretrainedWeights::from_tensors(tensors), &device);
        assert!(matches!(result, Err(VqaError::TensorShape { .. })));
    }
}
