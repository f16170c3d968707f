use crate::{
    arch::layers::{BatchNorm2d, Conv2d},
    Result,
};

/// Receives every parameterized leaf of a network exactly once, in forward order.
///
/// Activations and poolings hold no parameters and are never visited.
pub trait LayerVisitor {
    fn visit_conv2d(&mut self, conv: &mut Conv2d) -> Result<()>;

    fn visit_batch_norm(&mut self, norm: &mut BatchNorm2d) -> Result<()>;
}
