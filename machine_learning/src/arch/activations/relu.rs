/// Rectified linear unit.
#[derive(Clone, Copy, Debug, Default)]
pub struct Relu;

impl Relu {
    pub fn new() -> Self {
        Self
    }

    pub fn f(&self, z: f32) -> f32 {
        z.max(0.)
    }

    /// The derivative at zero is taken as zero.
    pub fn df(&self, z: f32) -> f32 {
        if z > 0. { 1. } else { 0. }
    }
}
