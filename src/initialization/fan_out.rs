use rand::Rng;

use super::{ConstParamGen, LayerVisitor, ParamGen, RandParamGen};
use crate::{
    arch::layers::{BatchNorm2d, Conv2d},
    NetErr, Result,
};

/// Fan-out scaled normal initialization.
///
/// Convolution weights are drawn from `N(0, 2 / (kh * kw * out_channels))`, regardless of the
/// convolution's groups. Normalizations get a unit scale and a zero shift.
pub struct FanOutInit<R: Rng> {
    rng: R,
    visited: usize,
}

impl<R: Rng> FanOutInit<R> {
    pub fn new(rng: R) -> Self {
        Self { rng, visited: 0 }
    }

    /// Returns the amount of layers initialized so far.
    pub fn visited(&self) -> usize {
        self.visited
    }

    /// Overwrites every parameter yielded by `params` with a sample of `param_gen`.
    fn fill<'a, P, I>(&mut self, mut param_gen: P, params: I) -> Result<()>
    where
        P: ParamGen<R>,
        I: ExactSizeIterator<Item = &'a mut f32>,
    {
        let n = params.len();
        let sample = param_gen.sample(&mut self.rng, n).unwrap_or_default();

        if sample.len() != n {
            return Err(NetErr::Init(format!(
                "expected {n} parameters but the generator yielded {}",
                sample.len()
            )));
        }

        for (param, value) in params.zip(sample) {
            *param = value;
        }

        Ok(())
    }
}

impl<R: Rng> LayerVisitor for FanOutInit<R> {
    fn visit_conv2d(&mut self, conv: &mut Conv2d) -> Result<()> {
        let (kh, kw) = conv.kernel();
        let fan_out = kh * kw * conv.out_channels();
        let weight = conv.weight_mut();

        let param_gen = RandParamGen::kaiming(weight.len(), fan_out)?;
        self.fill(param_gen, weight.iter_mut())?;

        self.visited += 1;
        Ok(())
    }

    fn visit_batch_norm(&mut self, norm: &mut BatchNorm2d) -> Result<()> {
        let channels = norm.channels();
        self.fill(ConstParamGen::new(1., channels), norm.weight_mut().iter_mut())?;
        self.fill(ConstParamGen::new(0., channels), norm.bias_mut().iter_mut())?;

        self.visited += 1;
        Ok(())
    }
}
