use rand::Rng;

/// A `ParamGen` generates values for the initial state of a layer's parameters.
pub trait ParamGen<R: Rng> {
    /// Should sample at most `n` parameters.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// An option whether the generator is exhausted.
    fn sample(&mut self, rng: &mut R, n: usize) -> Option<Vec<f32>>;

    /// Should return the amount of remaining parameters this generator can still generate.
    fn remaining(&self) -> usize;
}
