//! Differentiable image models and the targets maximized inside them.
//!
//! A [`Model`] is an explicit, caller-owned handle: it records the output of
//! every named layer on the way forward and propagates a gradient from any of
//! those layers back to its input on the way back. Parameters are only ever
//! read, so the same model can back any number of inceptors.

mod activation;
mod layers;
mod sequential;
mod target;

pub use activation::ActFn;
pub use layers::{Conv2d, Dense, Layer, MaxPool2d};
pub use sequential::Sequential;
pub use target::{FilterTarget, LayerTarget, Region, Target};

use ndarray::{ArrayD, ArrayView4, Ix4};

use crate::error::{Error, Result};

/// Dynamic-rank tensor. Image tensors are NHWC (batch, height, width, channels).
pub type Tensor = ArrayD<f32>;

/// Outputs recorded during a forward pass, keyed by layer name.
#[derive(Debug, Clone)]
pub struct Activations {
    input: Tensor,
    outputs: Vec<(String, Tensor)>,
}

impl Activations {
    /// Start recording a forward pass over `input`.
    #[must_use]
    pub fn new(input: Tensor) -> Self {
        Self {
            input,
            outputs: Vec::new(),
        }
    }

    /// Record the output of the layer `name`.
    pub fn push(&mut self, name: impl Into<String>, output: Tensor) {
        self.outputs.push((name.into(), output));
    }

    /// The tensor the forward pass started from.
    #[must_use]
    pub const fn input(&self) -> &Tensor {
        &self.input
    }

    /// The recorded output of the layer `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.outputs
            .iter()
            .find(|(layer, _)| layer == name)
            .map(|(_, output)| output)
    }

    /// The output of the layer at `index`, in forward order.
    #[must_use]
    pub fn output(&self, index: usize) -> Option<&Tensor> {
        self.outputs.get(index).map(|(_, output)| output)
    }

    /// Number of recorded layer outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether no layer output has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// A differentiable function from an input tensor to named intermediate tensors.
pub trait Model {
    /// The exact input shape the model accepts.
    fn input_shape(&self) -> &[usize];

    /// Names of every layer whose output can be targeted.
    fn layer_names(&self) -> Vec<&str>;

    /// Whether `name` is one of [`Model::layer_names`].
    fn has_layer(&self, name: &str) -> bool {
        self.layer_names().contains(&name)
    }

    /// Run the model forward, recording every layer output.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` does not have the model's input shape.
    fn forward(&self, input: &Tensor) -> Result<Activations>;

    /// Propagate `grad`, the gradient of some scalar with respect to the
    /// output of `layer`, back to the model input.
    ///
    /// # Errors
    ///
    /// Returns an error if `layer` is unknown or a shape does not line up.
    fn backward(&self, activations: &Activations, layer: &str, grad: Tensor) -> Result<Tensor>;

    /// Evaluate `target` at `input` and differentiate it with respect to `input`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTarget`] if the target's layer is not produced by
    /// the forward pass, or any error raised by the target or the model.
    fn score_and_gradient(&self, target: &dyn Target, input: &Tensor) -> Result<(f32, Tensor)> {
        let activations = self.forward(input)?;
        let layer = target.layer();

        let activation = activations
            .get(layer)
            .ok_or_else(|| Error::invalid_target(layer, "layer is not produced by the model"))?;

        let score = target.score(activation)?;
        let seed = target.gradient(activation)?;
        if seed.shape() != activation.shape() {
            return Err(Error::shape_mismatch(activation.shape(), seed.shape()));
        }

        let gradient = self.backward(&activations, layer, seed)?;
        if gradient.shape() != input.shape() {
            return Err(Error::shape_mismatch(input.shape(), gradient.shape()));
        }

        Ok((score, gradient))
    }
}

/// View a tensor as a 4D NHWC array.
pub(crate) fn as_nhwc(tensor: &Tensor) -> Result<ArrayView4<'_, f32>> {
    tensor
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::ShapeMismatch {
            expected: "4D NHWC tensor".to_string(),
            actual: format!("{}D tensor", tensor.ndim()),
        })
}
