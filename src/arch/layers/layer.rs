use ndarray::Array4;

use super::{
    shape::check_channels, AvgPool2d, BatchNorm2d, Conv2d, FeatureShape, GlobalAvgPool, Relu,
    Sequential,
};
use crate::{initialization::LayerVisitor, Result};

/// Any operator of the network.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv2d(Conv2d),
    BatchNorm2d(BatchNorm2d),
    Relu(Relu),
    AvgPool2d(AvgPool2d),
    GlobalAvgPool(GlobalAvgPool),
    Sequential(Sequential),
}

/// The structural description of a leaf operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: usize,
        groups: usize,
    },
    BatchNorm2d {
        channels: usize,
    },
    Relu,
    AvgPool2d {
        kernel: usize,
        stride: usize,
    },
    GlobalAvgPool {
        min_window: usize,
    },
}

/// A leaf operator and where it sits in the network, e.g. `stages.1.blocks.0.transition.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub path: String,
    pub kind: LayerKind,
}

impl LayerKind {
    /// Whether the operator owns learnable parameters.
    pub fn is_parameterized(&self) -> bool {
        matches!(self, Self::Conv2d { .. } | Self::BatchNorm2d { .. })
    }
}

impl Layer {
    pub fn conv2d(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: usize,
        groups: usize,
    ) -> Result<Self> {
        let conv = Conv2d::new(in_channels, out_channels, kernel, stride, padding, groups)?;
        Ok(Self::Conv2d(conv))
    }

    pub fn pointwise(in_channels: usize, out_channels: usize, stride: usize) -> Result<Self> {
        let conv = Conv2d::pointwise(in_channels, out_channels, stride)?;
        Ok(Self::Conv2d(conv))
    }

    pub fn depthwise(channels: usize, kernel: usize, stride: usize, padding: usize) -> Result<Self> {
        let conv = Conv2d::depthwise(channels, kernel, stride, padding)?;
        Ok(Self::Conv2d(conv))
    }

    pub fn batch_norm(channels: usize) -> Result<Self> {
        Ok(Self::BatchNorm2d(BatchNorm2d::new(channels)?))
    }

    pub fn relu() -> Self {
        Self::Relu(Relu::new())
    }

    pub fn avg_pool(kernel: usize, stride: usize) -> Result<Self> {
        Ok(Self::AvgPool2d(AvgPool2d::new(kernel, stride)?))
    }

    pub fn global_avg_pool(min_window: usize) -> Self {
        Self::GlobalAvgPool(GlobalAvgPool::new(min_window))
    }

    pub fn sequential<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self::Sequential(Sequential::new(layers))
    }

    pub fn forward(&self, x: Array4<f32>) -> Result<Array4<f32>> {
        match self {
            Self::Conv2d(l) => l.forward(x.view()),
            Self::BatchNorm2d(l) => l.forward(x),
            Self::Relu(l) => Ok(l.forward(x)),
            Self::AvgPool2d(l) => l.forward(x.view()),
            Self::GlobalAvgPool(l) => l.forward(x.view()),
            Self::Sequential(l) => l.forward(x),
        }
    }

    /// Computes the shape this layer outputs for a given input shape without evaluating it.
    ///
    /// # Returns
    /// The output shape, or an error exactly when `forward` would fail on that input.
    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        match self {
            Self::Conv2d(l) => l.out_shape(shape),
            Self::BatchNorm2d(l) => l.out_shape(shape),
            Self::Relu(_) => Ok(shape),
            Self::AvgPool2d(l) => l.out_shape(shape),
            Self::GlobalAvgPool(l) => l.out_shape(shape),
            Self::Sequential(l) => l.out_shape(shape),
        }
    }

    /// Checks the channel arithmetic of this layer alone, independently of any spatial size.
    ///
    /// # Arguments
    /// * `channels` - The channels of the tensor this layer is going to be fed.
    ///
    /// # Returns
    /// The channels this layer produces or a `ChannelMismatch` error.
    pub fn out_channels(&self, channels: usize) -> Result<usize> {
        match self {
            Self::Conv2d(l) => {
                check_channels("convolution", l.in_channels(), channels)?;
                Ok(l.out_channels())
            }
            Self::BatchNorm2d(l) => {
                check_channels("normalization", l.channels(), channels)?;
                Ok(channels)
            }
            Self::Sequential(l) => l.out_channels(channels),
            Self::Relu(_) | Self::AvgPool2d(_) | Self::GlobalAvgPool(_) => Ok(channels),
        }
    }

    /// Returns the amount of learnable parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Self::Conv2d(l) => l.size(),
            Self::BatchNorm2d(l) => l.size(),
            Self::Sequential(l) => l.size(),
            Self::Relu(_) | Self::AvgPool2d(_) | Self::GlobalAvgPool(_) => 0,
        }
    }

    /// Hands every parameterized leaf of this layer to the visitor.
    pub fn accept<V>(&mut self, visitor: &mut V) -> Result<()>
    where
        V: LayerVisitor + ?Sized,
    {
        match self {
            Self::Conv2d(l) => visitor.visit_conv2d(l),
            Self::BatchNorm2d(l) => visitor.visit_batch_norm(l),
            Self::Sequential(l) => l.accept(visitor),
            Self::Relu(_) | Self::AvgPool2d(_) | Self::GlobalAvgPool(_) => Ok(()),
        }
    }

    /// Appends the description of every leaf of this layer to `out`.
    pub fn describe(&self, path: &str, out: &mut Vec<LayerInfo>) {
        let kind = match self {
            Self::Sequential(l) => return l.describe(path, out),
            Self::Conv2d(l) => LayerKind::Conv2d {
                in_channels: l.in_channels(),
                out_channels: l.out_channels(),
                kernel: l.kernel(),
                stride: l.stride(),
                padding: l.padding(),
                groups: l.groups(),
            },
            Self::BatchNorm2d(l) => LayerKind::BatchNorm2d {
                channels: l.channels(),
            },
            Self::Relu(_) => LayerKind::Relu,
            Self::AvgPool2d(l) => LayerKind::AvgPool2d {
                kernel: l.kernel(),
                stride: l.stride(),
            },
            Self::GlobalAvgPool(l) => LayerKind::GlobalAvgPool {
                min_window: l.min_window(),
            },
        };

        out.push(LayerInfo {
            path: path.to_string(),
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sequentials_describe_their_leaves() {
        let layer = Layer::sequential([
            Layer::pointwise(4, 8, 1).unwrap(),
            Layer::sequential([Layer::batch_norm(8).unwrap(), Layer::relu()]),
        ]);

        let mut out = vec![];
        layer.describe("x", &mut out);

        let paths: Vec<_> = out.iter().map(|info| info.path.as_str()).collect();
        assert_eq!(paths, ["x.0", "x.1.0", "x.1.1"]);
        assert_eq!(layer.size(), 4 * 8 + 2 * 8);
        assert_eq!(layer.out_channels(4).unwrap(), 8);
        assert!(out[0].kind.is_parameterized());
        assert!(!out[2].kind.is_parameterized());
    }
}
