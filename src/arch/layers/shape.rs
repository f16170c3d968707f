use ndarray::{ArrayBase, Data, Ix4};

use crate::{NetErr, Result};

/// The per-sample shape of a feature map: everything but the batch axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Returns the shape of a `(batch, channels, height, width)` tensor, ignoring the batch axis.
    pub fn of<S: Data<Elem = f32>>(x: &ArrayBase<S, Ix4>) -> Self {
        let (_, channels, height, width) = x.dim();
        Self::new(channels, height, width)
    }

    /// Amount of scalars a single sample of this shape holds.
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes the output spatial size of a sliding window over a zero padded map.
///
/// # Arguments
/// * `what` - The operator being evaluated, used for error reporting.
/// * `shape` - The input shape.
/// * `kernel` - The window's height and width.
/// * `stride` - The step between two consecutive windows.
/// * `padding` - The amount of zeros added at each border.
///
/// # Returns
/// The output `(height, width)` or an error if the window doesn't fit in the padded map.
pub(super) fn sliding_window(
    what: &str,
    shape: FeatureShape,
    kernel: (usize, usize),
    stride: usize,
    padding: usize,
) -> Result<(usize, usize)> {
    let (h, w) = (shape.height + 2 * padding, shape.width + 2 * padding);

    if h < kernel.0 || w < kernel.1 {
        return Err(NetErr::SpatialCollapse {
            what: what.to_string(),
            height: shape.height,
            width: shape.width,
            window: kernel.0.max(kernel.1),
        });
    }

    Ok(((h - kernel.0) / stride + 1, (w - kernel.1) / stride + 1))
}

/// Computes the amount of parameters of a tensor with the given dimensions.
///
/// # Returns
/// The amount or an `InvalidConfig` error if such a tensor can't be allocated.
pub(super) fn param_len(what: &str, dims: &[usize]) -> Result<usize> {
    let max = isize::MAX as usize / std::mem::size_of::<f32>();

    dims.iter()
        .try_fold(1usize, |len, &d| len.checked_mul(d))
        .filter(|&len| len <= max)
        .ok_or_else(|| NetErr::InvalidConfig(format!("{what} of shape {dims:?} is too large")))
}

/// Fails when the channels an operator declares differ from the ones it's fed.
pub(super) fn check_channels(what: &str, declared: usize, produced: usize) -> Result<()> {
    if declared != produced {
        return Err(NetErr::ChannelMismatch {
            what: what.to_string(),
            got: declared,
            expected: produced,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_window_rounds_down() {
        let shape = FeatureShape::new(3, 224, 224);
        assert_eq!(sliding_window("conv", shape, (3, 3), 2, 1).unwrap(), (112, 112));

        let shape = FeatureShape::new(3, 7, 7);
        assert_eq!(sliding_window("conv", shape, (3, 3), 2, 1).unwrap(), (4, 4));
        assert_eq!(sliding_window("pool", shape, (4, 4), 1, 0).unwrap(), (4, 4));
    }

    #[test]
    fn oversized_parameters_are_rejected() {
        assert_eq!(param_len("conv", &[32, 3, 3, 3]).unwrap(), 864);
        assert!(matches!(
            param_len("conv", &[usize::MAX / 2, 3, 1, 1]),
            Err(NetErr::InvalidConfig(_))
        ));
        assert!(param_len("norm", &[usize::MAX / 4]).is_err());
    }

    #[test]
    fn window_larger_than_map_fails() {
        let shape = FeatureShape::new(8, 3, 5);
        let err = sliding_window("pool", shape, (4, 4), 1, 0).unwrap_err();

        assert!(matches!(
            err,
            NetErr::SpatialCollapse {
                height: 3,
                width: 5,
                window: 4,
                ..
            }
        ));
    }
}
