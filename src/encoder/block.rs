use crate::error::Result;
use crate::pretrained::{BnRole, ParamScope, PretrainedWeights};
use crate::utils::batch_norm::{FrozenBatchNorm, FrozenBatchNormConfig};
use burn::module::Param;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Batch-norm hyper-parameters shared by every layer of the encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormSettings {
    pub epsilon: f64,
    pub decay: f64,
}

/// A bias-free convolution followed by frozen batch normalization.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: FrozenBatchNorm<B>,
}

/// Geometry of a [ConvBn] layer, addressed by its parameter scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvSpec {
    pub scope: ParamScope,
    pub c_in: usize,
    pub c_out: usize,
    pub kernel: usize,
    pub stride: usize,
}

impl ConvSpec {
    /// `[k, k, c_in, c_out]`, the layout in which the kernel is stored.
    pub fn kernel_shape(&self) -> [usize; 4] {
        [self.kernel, self.kernel, self.c_in, self.c_out]
    }

    pub fn required_parameters(&self) -> Vec<(String, Vec<usize>)> {
        let mut params = vec![(self.scope.weights(), self.kernel_shape().to_vec())];
        params.extend(
            BnRole::ALL
                .into_iter()
                .map(|role| (self.scope.batch_norm(role), vec![self.c_out])),
        );
        params
    }

    /// Symmetric padding that keeps `ceil(side / stride)` outputs for even sides.
    pub fn padding(&self) -> usize {
        (self.kernel - 1) / 2
    }

    pub fn init<B: Backend>(
        &self,
        weights: &PretrainedWeights,
        norm: NormSettings,
        device: &B::Device,
    ) -> Result<ConvBn<B>> {
        let kernel: Tensor<B, 4> = weights
            .tensor(&self.scope.weights(), &self.kernel_shape())?
            .to_tensor(device);
        // [k, k, c_in, c_out] -> [c_out, c_in, k, k]
        let kernel = kernel.swap_dims(0, 3).swap_dims(1, 2).swap_dims(2, 3);

        let padding = self.padding();
        let mut conv = Conv2dConfig::new([self.c_in, self.c_out], [self.kernel, self.kernel])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);
        conv.weight = Param::from_tensor(kernel);

        let norm = FrozenBatchNormConfig::new(self.c_out)
            .with_epsilon(norm.epsilon)
            .with_decay(norm.decay)
            .init_pretrained(weights, &self.scope, device)?;

        Ok(ConvBn { conv, norm })
    }
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Logical address and geometry of one bottleneck block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Stage index, the stem being stage 1.
    pub stage: usize,
    /// 1-based index of the block within its stage.
    pub block: usize,
    pub in_channels: usize,
    /// Base width; the block outputs `4 * width` channels.
    pub width: usize,
    pub stride: usize,
}

impl BlockDescriptor {
    pub fn out_channels(&self) -> usize {
        4 * self.width
    }

    /// Whether the shortcut needs a 1×1 projection instead of the identity.
    pub fn needs_projection(&self) -> bool {
        self.stride != 1 || self.in_channels != self.out_channels()
    }

    pub fn scope(&self) -> ParamScope {
        ParamScope::block(self.stage, self.block)
    }

    /// The convolutions of the block: `branch2/{a,b,c}` and the optional `branch1`.
    pub fn convs(&self) -> (Vec<ConvSpec>, Option<ConvSpec>) {
        let scope = self.scope();
        // the stride sits on the first 1×1 reduction
        let branch2 = vec![
            ConvSpec {
                scope: scope.branch2(1),
                c_in: self.in_channels,
                c_out: self.width,
                kernel: 1,
                stride: self.stride,
            },
            ConvSpec {
                scope: scope.branch2(2),
                c_in: self.width,
                c_out: self.width,
                kernel: 3,
                stride: 1,
            },
            ConvSpec {
                scope: scope.branch2(3),
                c_in: self.width,
                c_out: self.out_channels(),
                kernel: 1,
                stride: 1,
            },
        ];
        let branch1 = self.needs_projection().then(|| ConvSpec {
            scope: scope.branch1(),
            c_in: self.in_channels,
            c_out: self.out_channels(),
            kernel: 1,
            stride: self.stride,
        });
        (branch2, branch1)
    }

    pub fn required_parameters(&self) -> Vec<(String, Vec<usize>)> {
        let (branch2, branch1) = self.convs();
        branch1
            .iter()
            .chain(branch2.iter())
            .flat_map(ConvSpec::required_parameters)
            .collect()
    }

    pub fn init<B: Backend>(
        &self,
        weights: &PretrainedWeights,
        norm: NormSettings,
        device: &B::Device,
    ) -> Result<ResidualBlock<B>> {
        let (branch2, branch1) = self.convs();
        let [a, b, c] = [&branch2[0], &branch2[1], &branch2[2]];
        Ok(ResidualBlock {
            conv_a: a.init(weights, norm, device)?,
            conv_b: b.init(weights, norm, device)?,
            conv_c: c.init(weights, norm, device)?,
            shortcut: branch1
                .map(|spec| spec.init(weights, norm, device))
                .transpose()?,
        })
    }
}

/// `relu(shortcut(x) + c(relu(b(relu(a(x))))))`.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub conv_a: ConvBn<B>,
    pub conv_b: ConvBn<B>,
    pub conv_c: ConvBn<B>,
    /// `None` is the identity shortcut.
    pub shortcut: Option<ConvBn<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, height, width]`
    /// - output: `[batch, 4 * width, height / stride, width / stride]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = relu(self.conv_a.forward(x.clone()));
        let residual = relu(self.conv_b.forward(residual));
        let residual = self.conv_c.forward(residual);

        let shortcut = match &self.shortcut {
            Some(projection) => projection.forward(x),
            None => x,
        };
        debug_assert_eq!(shortcut.dims(), residual.dims());

        relu(shortcut + residual)
    }
}
