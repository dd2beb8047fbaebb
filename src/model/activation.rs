/// Element-wise activation fused into a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActFn {
    /// `max(0, z)`.
    Relu,
    /// `amp / (1 + e^-z)`.
    Sigmoid { amp: f32 },
}

impl ActFn {
    pub const fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid { amp }
    }

    pub fn f(self, z: f32) -> f32 {
        match self {
            Self::Relu => z.max(0.0),
            Self::Sigmoid { amp } => amp / (1.0 + (-z).exp()),
        }
    }

    /// Derivative at the pre-activation that produced the output `a`.
    ///
    /// Layers keep only their outputs, so the derivative is expressed in terms
    /// of them: `relu'` is 1 where the output is positive and the sigmoid
    /// derivative is `a * (1 - a / amp)`.
    pub fn df(self, a: f32) -> f32 {
        match self {
            Self::Relu => {
                if a > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid { amp } => a * (1.0 - a / amp),
        }
    }
}
