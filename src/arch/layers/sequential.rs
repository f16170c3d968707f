use ndarray::Array4;

use super::{FeatureShape, Layer, LayerInfo};
use crate::{initialization::LayerVisitor, Result};

/// A chain of layers: each one is fed the output of the previous.
#[derive(Debug, Clone, Default)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Makes a forward pass through every layer in order.
    pub fn forward(&self, mut x: Array4<f32>) -> Result<Array4<f32>> {
        for layer in &self.layers {
            x = layer.forward(x)?;
        }

        Ok(x)
    }

    pub fn out_shape(&self, shape: FeatureShape) -> Result<FeatureShape> {
        self.layers
            .iter()
            .try_fold(shape, |shape, layer| layer.out_shape(shape))
    }

    pub fn out_channels(&self, channels: usize) -> Result<usize> {
        self.layers
            .iter()
            .try_fold(channels, |channels, layer| layer.out_channels(channels))
    }

    pub fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    pub fn accept<V>(&mut self, visitor: &mut V) -> Result<()>
    where
        V: LayerVisitor + ?Sized,
    {
        self.layers
            .iter_mut()
            .try_for_each(|layer| layer.accept(&mut *visitor))
    }

    pub fn describe(&self, path: &str, out: &mut Vec<LayerInfo>) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.describe(&format!("{path}.{i}"), out);
        }
    }
}
