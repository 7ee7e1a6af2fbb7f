use super::ParamGen;

/// Yields a fixed amount of copies of one value. Biases and batch-norm shifts
/// start at zero, batch-norm scales at one.
pub struct ConstParamGen {
    value: f32,
    remaining: usize,
}

impl ConstParamGen {
    /// Creates a new `ConstParamGen`.
    ///
    /// # Arguments
    /// * `value` - The value every parameter starts at.
    /// * `count` - The amount of parameters to yield before running dry.
    pub fn new(value: f32, count: usize) -> Self {
        Self {
            value,
            remaining: count,
        }
    }

    pub fn zeros(count: usize) -> Self {
        Self::new(0., count)
    }

    pub fn ones(count: usize) -> Self {
        Self::new(1., count)
    }

    /// The amount of parameters left to yield.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        let taken = n.min(self.remaining);
        self.remaining -= taken;
        Some(vec![self.value; taken])
    }
}
