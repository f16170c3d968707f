use ndarray::{
    linalg, parallel::prelude::*, s, stack, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis,
    CowArray, Ix3,
};

use super::shape::{check_channels, param_len, sliding_window, FeatureShape};
use crate::{NetErr, Result};

/// A bias-free 2D convolution over `(batch, channels, height, width)` tensors.
///
/// Optimizations:
///   1. Depthwise convolutions skip the matrix products and accumulate strided windows per
///      channel.
///   2. Samples of a batch are convolved in parallel.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
    stride: usize,
    padding: usize,
    groups: usize,

    // (out_channels, in_channels / groups, kernel.0, kernel.1)
    weight: Array4<f32>,
}

impl Conv2d {
    /// Creates a new `Conv2d` with all its weights set to zero.
    ///
    /// # Arguments
    /// * `in_channels` - The channels of the input tensor.
    /// * `out_channels` - The channels of the output tensor.
    /// * `kernel` - The height and width of the kernel.
    /// * `stride` - The step between two consecutive windows.
    /// * `padding` - The amount of zeros added at each border of the input.
    /// * `groups` - The amount of independent channel groups, both channel counts must be
    ///   divisible by it.
    ///
    /// # Returns
    /// A new `Conv2d` instance or an error if the arguments are out of their domain.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: usize,
        groups: usize,
    ) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 {
            return Err(NetErr::InvalidConfig(format!(
                "a convolution can't map {in_channels} channels to {out_channels}"
            )));
        }

        if kernel.0 == 0 || kernel.1 == 0 || stride == 0 {
            return Err(NetErr::InvalidConfig(format!(
                "a convolution needs a non empty kernel and stride, got {kernel:?} and {stride}"
            )));
        }

        if groups == 0 || in_channels % groups != 0 || out_channels % groups != 0 {
            return Err(NetErr::InvalidConfig(format!(
                "{groups} groups don't evenly split {in_channels} -> {out_channels} channels"
            )));
        }

        let dims = (out_channels, in_channels / groups, kernel.0, kernel.1);
        param_len("convolution weight", &[dims.0, dims.1, dims.2, dims.3])?;
        let weight = Array4::zeros(dims);

        Ok(Self {
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
            groups,
            weight,
        })
    }

    /// Creates a 1x1 convolution without padding.
    pub fn pointwise(in_channels: usize, out_channels: usize, stride: usize) -> Result<Self> {
        Self::new(in_channels, out_channels, (1, 1), stride, 0, 1)
    }

    /// Creates a square convolution where every channel is convolved on its own.
    pub fn depthwise(channels: usize, kernel: usize, stride: usize, padding: usize) -> Result<Self> {
        Self::new(channels, channels, (kernel, kernel), stride, padding, channels)
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel(&self) -> (usize, usize) {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn weight(&self) -> &Array4<f32> {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Array4<f32> {
        &mut self.weight
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weight.len()
    }

    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        check_channels("convolution", self.in_channels, shape.channels)?;
        let (height, width) =
            sliding_window("convolution", shape, self.kernel, self.stride, self.padding)?;

        Ok(FeatureShape::new(self.out_channels, height, width))
    }

    /// Convolves every sample of the batch.
    ///
    /// # Arguments
    /// * `x` - A `(batch, in_channels, height, width)` tensor.
    ///
    /// # Returns
    /// A `(batch, out_channels, height', width')` tensor or an error if `x` doesn't fit this layer.
    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let shape = self.out_shape(FeatureShape::of(&x))?;

        let outputs = x
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|sample| self.forward_sample(sample, shape))
            .collect::<Result<Vec<_>>>()?;

        if outputs.is_empty() {
            return Ok(Array4::zeros((0, shape.channels, shape.height, shape.width)));
        }

        let views: Vec<_> = outputs.iter().map(|out| out.view()).collect();
        Ok(stack(Axis(0), &views)?)
    }

    fn forward_sample(&self, x: ArrayView3<f32>, shape: FeatureShape) -> Result<Array3<f32>> {
        let padded = self.pad(x);
        let (ho, wo) = (shape.height, shape.width);

        if self.groups == self.in_channels && self.groups == self.out_channels {
            return Ok(self.depthwise_sample(&padded, ho, wo));
        }

        self.grouped_sample(&padded, ho, wo)
    }

    fn pad<'a>(&self, x: ArrayView3<'a, f32>) -> CowArray<'a, f32, Ix3> {
        let p = self.padding;
        if p == 0 {
            return x.into();
        }

        let (c, h, w) = x.dim();
        let mut padded = Array3::zeros((c, h + 2 * p, w + 2 * p));
        padded.slice_mut(s![.., p..p + h, p..p + w]).assign(&x);
        padded.into()
    }

    fn depthwise_sample(&self, padded: &CowArray<f32, Ix3>, ho: usize, wo: usize) -> Array3<f32> {
        let (kh, kw) = self.kernel;
        let stride = self.stride;
        let mut out = Array3::zeros((self.out_channels, ho, wo));

        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(c, mut out_c)| {
                for ki in 0..kh {
                    for kj in 0..kw {
                        let window = padded.slice(s![
                            c,
                            ki..ki + stride * (ho - 1) + 1;stride,
                            kj..kj + stride * (wo - 1) + 1;stride
                        ]);
                        out_c.scaled_add(self.weight[[c, 0, ki, kj]], &window);
                    }
                }
            });

        out
    }

    // Accumulates, for every kernel offset, the product of the offset's weights with the strided
    // window of the input that offset sees.
    fn grouped_sample(
        &self,
        padded: &CowArray<f32, Ix3>,
        ho: usize,
        wo: usize,
    ) -> Result<Array3<f32>> {
        let (kh, kw) = self.kernel;
        let stride = self.stride;
        let cin_g = self.in_channels / self.groups;
        let cout_g = self.out_channels / self.groups;
        let mut out = Array2::zeros((self.out_channels, ho * wo));

        for g in 0..self.groups {
            let (ci, co) = (g * cin_g, g * cout_g);
            let mut out_g = out.slice_mut(s![co..co + cout_g, ..]);

            for ki in 0..kh {
                for kj in 0..kw {
                    let window = padded.slice(s![
                        ci..ci + cin_g,
                        ki..ki + stride * (ho - 1) + 1;stride,
                        kj..kj + stride * (wo - 1) + 1;stride
                    ]);
                    let window = window.to_shape((cin_g, ho * wo))?;
                    let w = self.weight.slice(s![co..co + cout_g, .., ki, kj]);

                    linalg::general_mat_mul(1.0, &w, &window, 1.0, &mut out_g);
                }
            }
        }

        Ok(out.into_shape_with_order((self.out_channels, ho, wo))?)
    }
}
