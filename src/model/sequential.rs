use std::collections::HashSet;

use rand::{rngs::StdRng, SeedableRng};

use super::{
    layers::{Conv2d, Dense, Layer, MaxPool2d},
    ActFn, Activations, Model, Tensor,
};
use crate::error::{Error, Result};
use crate::image::RGB_CHANNELS;

/// A chain of named layers: information flows forward when computing the
/// activations and backward when computing the gradient of a target.
#[derive(Debug, Clone)]
pub struct Sequential {
    input_shape: Vec<usize>,
    layers: Vec<(String, Layer)>,
    output_shapes: Vec<Vec<usize>>,
}

impl Sequential {
    /// Creates a new `Sequential`, checking that every layer accepts the output
    /// of the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an empty or zero-sized input
    /// shape or duplicate layer names, and [`Error::ShapeMismatch`] if two
    /// consecutive layers do not fit together.
    pub fn new<I, S>(input_shape: Vec<usize>, layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Layer)>,
        S: Into<String>,
    {
        if input_shape.is_empty() || input_shape.contains(&0) {
            return Err(Error::invalid_parameter(
                "input_shape",
                format!("must be non-empty with positive dimensions, got {input_shape:?}"),
            ));
        }

        let layers: Vec<(String, Layer)> = layers
            .into_iter()
            .map(|(name, layer)| (name.into(), layer))
            .collect();

        let mut seen = HashSet::new();
        if let Some((name, _)) = layers.iter().find(|(name, _)| !seen.insert(name.as_str())) {
            return Err(Error::invalid_parameter(
                "layers",
                format!("duplicate layer name {name}"),
            ));
        }

        let mut output_shapes = Vec::with_capacity(layers.len());
        let mut shape = input_shape.clone();
        for (_, layer) in &layers {
            shape = layer.output_shape(&shape)?;
            output_shapes.push(shape.clone());
        }

        Ok(Self {
            input_shape,
            layers,
            output_shapes,
        })
    }

    /// A randomly initialized VGG-style network over `[1, height, width, 3]`
    /// images.
    ///
    /// Layers: `block1_conv1` (8), `block1_pool`, `block2_conv1` (16),
    /// `block2_pool`, `block3_conv1` (32), `block3_conv2` (32), `predictions`
    /// (10 sigmoid units).
    ///
    /// # Errors
    ///
    /// Returns an error if the image is smaller than 4x4.
    pub fn vgg_like(height: usize, width: usize, seed: Option<u64>) -> Result<Self> {
        let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let relu = Some(ActFn::Relu);

        let features = (height / 4) * (width / 4) * 32;
        let layers: Vec<(&str, Layer)> = vec![
            ("block1_conv1", Conv2d::glorot(3, RGB_CHANNELS, 8, relu, &mut rng)?.into()),
            ("block1_pool", MaxPool2d::new(2)?.into()),
            ("block2_conv1", Conv2d::glorot(3, 8, 16, relu, &mut rng)?.into()),
            ("block2_pool", MaxPool2d::new(2)?.into()),
            ("block3_conv1", Conv2d::glorot(3, 16, 32, relu, &mut rng)?.into()),
            ("block3_conv2", Conv2d::glorot(3, 32, 32, relu, &mut rng)?.into()),
            (
                "predictions",
                Dense::glorot(features, 10, Some(ActFn::sigmoid(1.0)), &mut rng).into(),
            ),
        ];

        Self::new(vec![1, height, width, RGB_CHANNELS], layers)
    }

    /// Layer names with their output shapes, in forward order.
    pub fn summary(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.layers
            .iter()
            .zip(&self.output_shapes)
            .map(|((name, _), shape)| (name.as_str(), shape.as_slice()))
    }
}

impl Model for Sequential {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn forward(&self, input: &Tensor) -> Result<Activations> {
        if input.shape() != self.input_shape.as_slice() {
            return Err(Error::shape_mismatch(&self.input_shape, input.shape()));
        }

        let mut activations = Activations::new(input.clone());
        let mut x = input.clone();

        for (name, layer) in &self.layers {
            x = layer.forward(&x)?;
            activations.push(name.clone(), x.clone());
        }

        Ok(activations)
    }

    fn backward(&self, activations: &Activations, layer: &str, grad: Tensor) -> Result<Tensor> {
        let depth = self
            .layers
            .iter()
            .position(|(name, _)| name == layer)
            .ok_or_else(|| Error::invalid_target(layer, "no such layer in the model"))?;

        if activations.len() != self.layers.len() {
            return Err(Error::ShapeMismatch {
                expected: format!("{} recorded activations", self.layers.len()),
                actual: activations.len().to_string(),
            });
        }

        let mut d = grad;
        for i in (0..=depth).rev() {
            let x = match i {
                0 => activations.input(),
                _ => activations.output(i - 1).ok_or_else(|| missing(i - 1))?,
            };
            let out = activations.output(i).ok_or_else(|| missing(i))?;

            d = self.layers[i].1.backward(x, out, d)?;
        }

        Ok(d)
    }
}

fn missing(index: usize) -> Error {
    Error::ShapeMismatch {
        expected: format!("activation for layer {index}"),
        actual: "nothing recorded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2, Array4, Dimension};

    use super::*;
    use crate::model::{FilterTarget, LayerTarget};

    #[allow(clippy::cast_precision_loss)]
    fn pattern(shape: &[usize]) -> Tensor {
        Tensor::from_shape_fn(shape.to_vec(), |idx| {
            let i: usize = idx.slice().iter().sum();
            (i as f32 * 0.7).sin() * 0.3
        })
    }

    #[test]
    fn test_vgg_like_shapes() {
        let model = Sequential::vgg_like(16, 12, Some(0)).unwrap();
        let shapes: Vec<(&str, &[usize])> = model.summary().collect();

        assert_eq!(shapes[0], ("block1_conv1", &[1, 16, 12, 8][..]));
        assert_eq!(shapes[3], ("block2_pool", &[1, 4, 3, 16][..]));
        assert_eq!(shapes[6], ("predictions", &[1, 10][..]));
        assert!(model.has_layer("block3_conv2"));
    }

    #[test]
    fn test_vgg_like_too_small() {
        assert!(Sequential::vgg_like(2, 8, Some(0)).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let layers = vec![
            ("pool", Layer::from(MaxPool2d::new(1).unwrap())),
            ("pool", Layer::from(MaxPool2d::new(1).unwrap())),
        ];

        assert!(matches!(
            Sequential::new(vec![1, 2, 2, 1], layers),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_incompatible_layers_rejected() {
        let conv = Conv2d::new(Array4::zeros((3, 3, 2, 1)), arr1(&[0.0]), None).unwrap();

        assert!(matches!(
            Sequential::new(vec![1, 4, 4, 3], vec![("conv", Layer::from(conv))]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_forward_rejects_wrong_input() {
        let model = Sequential::vgg_like(8, 8, Some(0)).unwrap();
        assert!(matches!(
            model.forward(&Tensor::zeros(vec![1, 8, 4, 3])),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_linear_gradient_is_weights() {
        let dense = Dense::new(arr2(&[[1.0], [-2.0], [0.5], [3.0]]), arr1(&[0.0]), None).unwrap();
        let model =
            Sequential::new(vec![1, 2, 2, 1], vec![("logits", Layer::from(dense))]).unwrap();

        let (score, grad) = model
            .score_and_gradient(&FilterTarget::new("logits", 0), &Tensor::ones(vec![1, 2, 2, 1]))
            .unwrap();

        assert!((score - 2.5).abs() < 1e-6);
        assert_eq!(grad.shape(), &[1, 2, 2, 1]);
        assert!((grad[[0, 0, 1, 0]] + 2.0).abs() < 1e-6);
        assert!((grad[[0, 1, 1, 0]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_deep_gradient_matches_finite_difference() {
        let model = Sequential::vgg_like(8, 8, Some(11)).unwrap();
        let target = LayerTarget::new("predictions");
        let input = pattern(model.input_shape());

        let (_, grad) = model.score_and_gradient(&target, &input).unwrap();

        let h = 1e-3;
        for idx in [[0, 0, 0, 0], [0, 3, 5, 1], [0, 7, 2, 2]] {
            let mut plus = input.clone();
            plus[idx] += h;
            let mut minus = input.clone();
            minus[idx] -= h;

            let (up, _) = model.score_and_gradient(&target, &plus).unwrap();
            let (down, _) = model.score_and_gradient(&target, &minus).unwrap();
            let numeric = (up - down) / (2.0 * h);

            assert!(
                (grad[idx] - numeric).abs() < 1e-3,
                "gradient mismatch at {idx:?}: {} vs {numeric}",
                grad[idx]
            );
        }
    }

    #[test]
    fn test_unknown_layer_is_invalid_target() {
        let model = Sequential::vgg_like(8, 8, Some(0)).unwrap();
        let result = model.score_and_gradient(
            &FilterTarget::new("block9_conv1", 0),
            &pattern(model.input_shape()),
        );

        assert!(matches!(result, Err(Error::InvalidTarget { .. })));
    }
}
