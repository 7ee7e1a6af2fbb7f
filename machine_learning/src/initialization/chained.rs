use super::ParamGen;

/// A parameter generator that delegates the generation to a chain of generators, so that each
/// layer of a model can have its own initialization scheme.
pub struct ChainedParamGen {
    param_gens: Vec<Box<dyn ParamGen>>,
    curr: usize,
}

impl ChainedParamGen {
    /// Creates a new `ChainedParamGen`.
    ///
    /// # Arguments
    /// * `param_gens` - The generators to exhaust, in order.
    pub fn new(param_gens: Vec<Box<dyn ParamGen>>) -> Self {
        Self {
            param_gens,
            curr: 0,
        }
    }
}

impl ParamGen for ChainedParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.curr == self.param_gens.len() {
            return None;
        }

        match self.param_gens[self.curr].sample(n) {
            Some(sample) if sample.len() == n => Some(sample),
            Some(mut sample) => {
                self.curr += 1;

                if let Some(next_sample) = self.sample(n - sample.len()) {
                    sample.extend(next_sample);
                }

                Some(sample)
            }
            None => {
                self.curr += 1;
                self.sample(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{super::ConstParamGen, *};

    #[test]
    fn empty() {
        let mut param_gen = ChainedParamGen::new(vec![]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn spans_generators() {
        let param_gens: Vec<Box<dyn ParamGen>> = vec![
            Box::new(ConstParamGen::new(0., 1)),
            Box::new(ConstParamGen::new(1., 3)),
        ];

        let mut param_gen = ChainedParamGen::new(param_gens);

        assert_eq!(param_gen.sample(2).unwrap(), [0., 1.]);
        assert_eq!(param_gen.sample(2).unwrap(), [1., 1.]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn skips_empty_generators() {
        let param_gens: Vec<Box<dyn ParamGen>> = vec![
            Box::new(ConstParamGen::new(0., 0)),
            Box::new(ConstParamGen::new(2., 2)),
        ];

        let mut param_gen = ChainedParamGen::new(param_gens);
        assert_eq!(param_gen.sample(2).unwrap(), [2., 2.]);
    }
}
