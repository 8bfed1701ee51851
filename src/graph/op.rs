//! Operation kinds carried by graph layers.
//!
//! Layer polymorphism is a closed tagged enum: each kind has a fixed
//! channel rule that the resolver matches on exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

/// Fieldless operation type, used by configuration predicates.
///
/// Serialised with the names the training framework uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpType {
    /// Graph input placeholder.
    Input,
    /// 2D convolution.
    Conv2d,
    /// Fully connected layer.
    Linear,
    /// Batch normalization over channels.
    BatchNorm2d,
    /// Rectified linear unit.
    #[serde(rename = "ReLU")]
    Relu,
    /// Logistic sigmoid.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
    /// Gaussian error linear unit.
    #[serde(rename = "GELU")]
    Gelu,
    /// 2D max pooling.
    MaxPool2d,
    /// 2D average pooling.
    AvgPool2d,
    /// Flatten to a feature vector.
    Flatten,
    /// Element-wise addition (residual junction).
    Add,
    /// Channel concatenation.
    Concat,
    /// Graph output sink.
    Output,
}

impl OpType {
    /// Framework name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Input => "Input",
            OpType::Conv2d => "Conv2d",
            OpType::Linear => "Linear",
            OpType::BatchNorm2d => "BatchNorm2d",
            OpType::Relu => "ReLU",
            OpType::Sigmoid => "Sigmoid",
            OpType::Tanh => "Tanh",
            OpType::Gelu => "GELU",
            OpType::MaxPool2d => "MaxPool2d",
            OpType::AvgPool2d => "AvgPool2d",
            OpType::Flatten => "Flatten",
            OpType::Add => "Add",
            OpType::Concat => "Concat",
            OpType::Output => "Output",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The dimension a layer can be structurally pruned along.
///
/// Scores of different dimensions are not directly comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrunableDim {
    /// Convolution output channels (filters).
    OutputChannels,
    /// Linear output features (rows).
    OutputFeatures,
    /// Normalization channels (affine scale).
    NormChannels,
}

/// How a layer relates the channel sets of its inputs and its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRule {
    /// Input and output channel sets are independent (dense conv, linear, input).
    Independent,
    /// Every input port and the output share one channel set.
    Tied,
    /// Output channels are the input ports laid end to end.
    Concat,
    /// Each input channel becomes a contiguous block of output positions.
    Flatten,
}

/// Element-wise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    /// max(0, x)
    Relu,
    /// 1 / (1 + e^-x)
    Sigmoid,
    /// tanh(x)
    Tanh,
    /// x · Φ(x)
    Gelu,
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    /// Maximum over the window.
    Max,
    /// Mean over the window.
    Avg,
}

/// 2D convolution parameters.
///
/// # Shape
///
/// - Weight: `(out_channels, in_channels / groups, kh, kw)`
/// - Input: `(C_in, H, W)`
/// - Output: `(C_out, H_out, W_out)` where
///   `H_out = (H + 2*padding - dilation*(kh-1) - 1) / stride + 1`
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2d {
    /// Filter bank.
    pub weight: Tensor,
    /// Per-filter bias.
    pub bias: Option<Tensor>,
    /// (height, width) stride.
    pub stride: (usize, usize),
    /// (height, width) zero padding.
    pub padding: (usize, usize),
    /// (height, width) dilation.
    pub dilation: (usize, usize),
    /// Number of channel groups.
    pub groups: usize,
}

impl Conv2d {
    /// Create a stride-1, unpadded, dense convolution.
    #[must_use]
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Self {
        Self {
            weight,
            bias,
            stride: (1, 1),
            padding: (0, 0),
            dilation: (1, 1),
            groups: 1,
        }
    }

    /// Set stride.
    #[must_use]
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = (stride, stride);
        self
    }

    /// Set padding.
    #[must_use]
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = (padding, padding);
        self
    }

    /// Set dilation.
    #[must_use]
    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = (dilation, dilation);
        self
    }

    /// Set channel groups.
    #[must_use]
    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    /// Number of filters.
    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.weight.dim(0)
    }

    /// Number of input channels expected.
    #[must_use]
    pub fn in_channels(&self) -> usize {
        self.weight.dim(1) * self.groups
    }

    /// (kh, kw)
    #[must_use]
    pub fn kernel_size(&self) -> (usize, usize) {
        (self.weight.dim(2), self.weight.dim(3))
    }

    /// One group per channel, one filter per group.
    #[must_use]
    pub fn is_depthwise(&self) -> bool {
        self.groups > 1 && self.weight.dim(1) == 1 && self.groups == self.out_channels()
    }

    /// Spatial output size for an `(h, w)` input, or `None` if the kernel
    /// does not fit.
    #[must_use]
    pub fn output_hw(&self, h: usize, w: usize) -> Option<(usize, usize)> {
        let (kh, kw) = self.kernel_size();
        let oh = window_out(h, kh, self.stride.0, self.padding.0, self.dilation.0)?;
        let ow = window_out(w, kw, self.stride.1, self.padding.1, self.dilation.1)?;
        Some((oh, ow))
    }
}

/// Fully connected layer: `y = xW^T + b`.
///
/// Weight shape: `(out_features, in_features)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    /// Weight matrix.
    pub weight: Tensor,
    /// Bias vector.
    pub bias: Option<Tensor>,
}

impl Linear {
    /// Create from weight and optional bias.
    #[must_use]
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Self {
        Self { weight, bias }
    }

    /// Input width.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.weight.dim(1)
    }

    /// Output width.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.weight.dim(0)
    }
}

/// Batch normalization over dimension 0.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm2d {
    /// Affine scale (gamma).
    pub weight: Tensor,
    /// Affine shift (beta).
    pub bias: Tensor,
    /// Running mean.
    pub running_mean: Tensor,
    /// Running variance.
    pub running_var: Tensor,
    /// Numerical stabiliser.
    pub eps: f32,
}

impl BatchNorm2d {
    /// Freshly initialised normalization: gamma = 1, beta = 0, mean = 0, var = 1.
    #[must_use]
    pub fn new(num_features: usize) -> Self {
        Self {
            weight: Tensor::ones(&[num_features]),
            bias: Tensor::zeros(&[num_features]),
            running_mean: Tensor::zeros(&[num_features]),
            running_var: Tensor::ones(&[num_features]),
            eps: 1e-5,
        }
    }

    /// Replace the affine scale.
    #[must_use]
    pub fn with_weight(mut self, weight: Tensor) -> Self {
        self.weight = weight;
        self
    }

    /// Number of normalised channels.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.weight.dim(0)
    }

    pub(crate) fn vectors(&self) -> [&Tensor; 4] {
        [
            &self.weight,
            &self.bias,
            &self.running_mean,
            &self.running_var,
        ]
    }
}

/// 2D pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2d {
    /// Reduction.
    pub kind: PoolKind,
    /// (kh, kw)
    pub kernel_size: (usize, usize),
    /// (sh, sw)
    pub stride: (usize, usize),
    /// (ph, pw)
    pub padding: (usize, usize),
}

impl Pool2d {
    /// Square max pooling.
    #[must_use]
    pub fn max(kernel: usize, stride: usize) -> Self {
        Self {
            kind: PoolKind::Max,
            kernel_size: (kernel, kernel),
            stride: (stride, stride),
            padding: (0, 0),
        }
    }

    /// Square average pooling.
    #[must_use]
    pub fn avg(kernel: usize, stride: usize) -> Self {
        Self {
            kind: PoolKind::Avg,
            ..Self::max(kernel, stride)
        }
    }

    /// Spatial output size for an `(h, w)` input.
    #[must_use]
    pub fn output_hw(&self, h: usize, w: usize) -> Option<(usize, usize)> {
        let oh = window_out(h, self.kernel_size.0, self.stride.0, self.padding.0, 1)?;
        let ow = window_out(w, self.kernel_size.1, self.stride.1, self.padding.1, 1)?;
        Some((oh, ow))
    }
}

fn window_out(size: usize, kernel: usize, stride: usize, padding: usize, dilation: usize) -> Option<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 {
        return None;
    }
    let effective = dilation * (kernel - 1) + 1;
    let padded = size + 2 * padding;
    if padded < effective {
        return None;
    }
    Some((padded - effective) / stride + 1)
}

/// A layer's operation and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Graph input.
    Input,
    /// 2D convolution.
    Conv2d(Conv2d),
    /// Fully connected.
    Linear(Linear),
    /// Batch normalization.
    BatchNorm2d(BatchNorm2d),
    /// Element-wise activation.
    Activation(ActivationKind),
    /// Spatial pooling.
    Pool2d(Pool2d),
    /// Flatten to rank 1.
    Flatten,
    /// Element-wise sum of all inputs.
    Add,
    /// Concatenation along dimension 0.
    Concat,
    /// Graph output.
    Output,
}

impl Op {
    /// Fieldless type of this operation.
    #[must_use]
    pub fn op_type(&self) -> OpType {
        match self {
            Op::Input => OpType::Input,
            Op::Conv2d(_) => OpType::Conv2d,
            Op::Linear(_) => OpType::Linear,
            Op::BatchNorm2d(_) => OpType::BatchNorm2d,
            Op::Activation(ActivationKind::Relu) => OpType::Relu,
            Op::Activation(ActivationKind::Sigmoid) => OpType::Sigmoid,
            Op::Activation(ActivationKind::Tanh) => OpType::Tanh,
            Op::Activation(ActivationKind::Gelu) => OpType::Gelu,
            Op::Pool2d(p) => match p.kind {
                PoolKind::Max => OpType::MaxPool2d,
                PoolKind::Avg => OpType::AvgPool2d,
            },
            Op::Flatten => OpType::Flatten,
            Op::Add => OpType::Add,
            Op::Concat => OpType::Concat,
            Op::Output => OpType::Output,
        }
    }

    /// The dimension this op can be pruned along, if any.
    #[must_use]
    pub fn prunable_dim(&self) -> Option<PrunableDim> {
        match self {
            Op::Conv2d(_) => Some(PrunableDim::OutputChannels),
            Op::Linear(_) => Some(PrunableDim::OutputFeatures),
            Op::BatchNorm2d(_) => Some(PrunableDim::NormChannels),
            _ => None,
        }
    }

    /// The tensor importance is computed from (unit `i` = slice `i` of dim 0).
    #[must_use]
    pub fn scoring_weight(&self) -> Option<&Tensor> {
        match self {
            Op::Conv2d(c) => Some(&c.weight),
            Op::Linear(l) => Some(&l.weight),
            Op::BatchNorm2d(bn) => Some(&bn.weight),
            _ => None,
        }
    }

    /// How input and output channel sets relate.
    #[must_use]
    pub fn channel_rule(&self) -> ChannelRule {
        match self {
            Op::Input | Op::Linear(_) => ChannelRule::Independent,
            Op::Conv2d(c) if c.is_depthwise() => ChannelRule::Tied,
            Op::Conv2d(_) => ChannelRule::Independent,
            Op::BatchNorm2d(_) | Op::Activation(_) | Op::Pool2d(_) | Op::Add | Op::Output => {
                ChannelRule::Tied
            }
            Op::Concat => ChannelRule::Concat,
            Op::Flatten => ChannelRule::Flatten,
        }
    }

    /// Number of learnable parameters (running statistics excluded).
    #[must_use]
    pub fn num_params(&self) -> usize {
        match self {
            Op::Conv2d(c) => c.weight.numel() + c.bias.as_ref().map_or(0, Tensor::numel),
            Op::Linear(l) => l.weight.numel() + l.bias.as_ref().map_or(0, Tensor::numel),
            Op::BatchNorm2d(bn) => bn.weight.numel() + bn.bias.numel(),
            _ => 0,
        }
    }
}
