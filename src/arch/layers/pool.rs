use ndarray::{s, Array4, ArrayView4, Axis};

use super::shape::{sliding_window, FeatureShape};
use crate::{NetErr, Result};

/// Average pooling over square, unpadded windows.
#[derive(Debug, Clone, Copy)]
pub struct AvgPool2d {
    kernel: usize,
    stride: usize,
}

impl AvgPool2d {
    pub fn new(kernel: usize, stride: usize) -> Result<Self> {
        if kernel == 0 || stride == 0 {
            return Err(NetErr::InvalidConfig(format!(
                "a pooling needs a non empty kernel and stride, got {kernel} and {stride}"
            )));
        }

        Ok(Self { kernel, stride })
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        let k = self.kernel;
        let (height, width) = sliding_window("average pool", shape, (k, k), self.stride, 0)?;
        Ok(FeatureShape::new(shape.channels, height, width))
    }

    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let out = self.out_shape(FeatureShape::of(&x))?;
        let (k, stride) = (self.kernel, self.stride);
        let (ho, wo) = (out.height, out.width);

        let mut y = Array4::zeros((x.len_of(Axis(0)), out.channels, ho, wo));
        for ki in 0..k {
            for kj in 0..k {
                y += &x.slice(s![
                    ..,
                    ..,
                    ki..ki + stride * (ho - 1) + 1;stride,
                    kj..kj + stride * (wo - 1) + 1;stride
                ]);
            }
        }

        let area = (k * k) as f32;
        y.mapv_inplace(|v| v / area);
        Ok(y)
    }
}

/// Average pooling over the whole spatial map, leaving a single cell per channel.
#[derive(Debug, Clone, Copy)]
pub struct GlobalAvgPool {
    min_window: usize,
}

impl GlobalAvgPool {
    /// Creates a new `GlobalAvgPool`.
    ///
    /// # Arguments
    /// * `min_window` - The smallest height and width the pooled map may have.
    pub fn new(min_window: usize) -> Self {
        Self {
            min_window: min_window.max(1),
        }
    }

    pub fn min_window(&self) -> usize {
        self.min_window
    }

    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        if shape.height < self.min_window || shape.width < self.min_window {
            return Err(NetErr::SpatialCollapse {
                what: "global average pool".into(),
                height: shape.height,
                width: shape.width,
                window: self.min_window,
            });
        }

        Ok(FeatureShape::new(shape.channels, 1, 1))
    }

    pub fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let shape = FeatureShape::of(&x);
        self.out_shape(shape)?;

        let pooled = x
            .mean_axis(Axis(3))
            .and_then(|x| x.mean_axis(Axis(2)))
            .ok_or_else(|| NetErr::SpatialCollapse {
                what: "global average pool".into(),
                height: shape.height,
                width: shape.width,
                window: self.min_window,
            })?;

        Ok(pooled.insert_axis(Axis(2)).insert_axis(Axis(3)))
    }
}
