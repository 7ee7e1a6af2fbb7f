use std::mem;

/// Walks a model's flat parameter and gradient buffers layer by layer.
///
/// The parameters can be iterated sequentially in order through the `FrontIter` (forward
/// pass) or in reverse, together with their gradient, through the `BackIter` (backward pass).
pub struct ParamManager<'a> {
    params: &'a mut [f32],
    grad: &'a mut [f32],
}

impl<'a> ParamManager<'a> {
    /// Creates a new `ParamManager`.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - A buffer of the same length for the model's gradient.
    ///
    /// # Returns
    /// `None` if the buffers have different lengths.
    pub fn new(params: &'a mut [f32], grad: &'a mut [f32]) -> Option<Self> {
        if params.len() != grad.len() {
            return None;
        }

        Some(Self { params, grad })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f32] {
        &*self.params
    }

    /// Fills the gradient buffer with zeros.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// Returns the whole parameter and gradient buffers, for the optimizer to step on.
    pub fn split(&mut self) -> (&mut [f32], &[f32]) {
        (&mut *self.params, &*self.grad)
    }

    /// Creates a new iterator over the parameters.
    pub fn front(&self) -> FrontIter<'_> {
        FrontIter::new(&*self.params)
    }

    /// Creates a new reversed iterator over the parameters and their gradient.
    pub fn back(&mut self) -> BackIter<'_> {
        BackIter {
            params: &*self.params,
            grad: &mut *self.grad,
        }
    }
}

/// The parameter iterator.
pub struct FrontIter<'pm> {
    params: &'pm [f32],
}

impl<'pm> FrontIter<'pm> {
    /// Creates a new iterator over a parameter slice without a gradient.
    pub fn new(params: &'pm [f32]) -> Self {
        Self { params }
    }

    /// Takes the next `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The amount of parameters to take.
    ///
    /// # Returns
    /// A slice of parameters or `None` if there aren't enough left.
    pub fn take(&mut self, n: usize) -> Option<&'pm [f32]> {
        if n > self.params.len() {
            return None;
        }

        let params = self.params;
        let (head, tail) = params.split_at(n);
        self.params = tail;
        Some(head)
    }
}

/// The reversed parameter iterator.
pub struct BackIter<'pm> {
    params: &'pm [f32],
    grad: &'pm mut [f32],
}

impl<'pm> BackIter<'pm> {
    /// Takes the last `n` parameters not taken yet, together with their gradient.
    ///
    /// # Arguments
    /// * `n` - The amount of parameters to take.
    ///
    /// # Returns
    /// The parameters and the gradient slice or `None` if there aren't enough left.
    pub fn take(&mut self, n: usize) -> Option<(&'pm [f32], &'pm mut [f32])> {
        let len = self.params.len();
        if n > len {
            return None;
        }

        let params = self.params;
        let (params_head, params_tail) = params.split_at(len - n);
        self.params = params_head;

        let grad = mem::take(&mut self.grad);
        let (grad_head, grad_tail) = grad.split_at_mut(len - n);
        self.grad = grad_head;

        Some((params_tail, grad_tail))
    }
}
