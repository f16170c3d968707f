use ndarray::Array4;

/// Rectified linear unit, applied elementwise and in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl Relu {
    pub fn new() -> Self {
        Self
    }

    pub fn f(&self, z: f32) -> f32 {
        z.max(0.)
    }

    pub fn forward(&self, mut x: Array4<f32>) -> Array4<f32> {
        x.par_mapv_inplace(|z| self.f(z));
        x
    }
}
