use ndarray::{parallel::prelude::*, Array1, Array4, Axis};

use super::shape::{check_channels, param_len, FeatureShape};
use crate::{NetErr, Result};

const EPS: f32 = 1e-5;

/// Per-channel affine normalization evaluated with its running statistics.
///
/// `weight` and `bias` are the learnable scale and shift, they start zeroed and are expected to
/// be filled by an initialization pass.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    channels: usize,
    eps: f32,
    weight: Array1<f32>,
    bias: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(NetErr::InvalidConfig(
                "a normalization needs at least one channel".into(),
            ));
        }

        // Four per-channel vectors are kept.
        param_len("normalization", &[channels, 4])?;

        Ok(Self {
            channels,
            eps: EPS,
            weight: Array1::zeros(channels),
            bias: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn weight(&self) -> &Array1<f32> {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Array1<f32> {
        &mut self.weight
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub fn bias_mut(&mut self) -> &mut Array1<f32> {
        &mut self.bias
    }

    /// Returns the amount of learnable parameters, the running statistics aren't counted.
    pub fn size(&self) -> usize {
        2 * self.channels
    }

    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        check_channels("normalization", self.channels, shape.channels)?;
        Ok(shape)
    }

    pub fn forward(&self, mut x: Array4<f32>) -> Result<Array4<f32>> {
        self.out_shape(FeatureShape::of(&x))?;

        x.axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(c, mut plane)| {
                let scale = self.weight[c] / (self.running_var[c] + self.eps).sqrt();
                let shift = self.bias[c] - self.running_mean[c] * scale;
                plane.mapv_inplace(|v| v * scale + shift);
            });

        Ok(x)
    }
}
