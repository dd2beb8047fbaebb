//! Scalar targets built from a layer's activation.

use std::ops::Range;

use ndarray::{Dimension, IxDyn};

use super::Tensor;
use crate::error::{Error, Result};

/// A scalar derived from the output of one model layer.
///
/// The target only sees that layer's activation: it reports the scalar and its
/// gradient with respect to the activation, and the model carries that
/// gradient the rest of the way back to the input.
pub trait Target {
    /// Name of the layer whose output the target reads.
    fn layer(&self) -> &str;

    /// The value to maximize.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTarget`] if the activation cannot be reduced.
    fn score(&self, activation: &Tensor) -> Result<f32>;

    /// Gradient of [`Target::score`] with respect to `activation`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTarget`] if the activation cannot be reduced.
    fn gradient(&self, activation: &Tensor) -> Result<Tensor>;
}

/// Spatial window of an NHWC activation, in activation coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

/// Mean activation of one filter (last axis) of a layer, optionally restricted
/// to a spatial region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTarget {
    layer: String,
    filter: usize,
    region: Option<Region>,
}

impl FilterTarget {
    #[must_use]
    pub fn new(layer: impl Into<String>, filter: usize) -> Self {
        Self {
            layer: layer.into(),
            filter,
            region: None,
        }
    }

    /// Only average the filter over `rows` x `cols`.
    #[must_use]
    pub fn with_region(mut self, rows: Range<usize>, cols: Range<usize>) -> Self {
        self.region = Some(Region { rows, cols });
        self
    }

    #[must_use]
    pub const fn filter(&self) -> usize {
        self.filter
    }

    /// Check the activation can hold this target and count the selected elements.
    fn selected_count(&self, shape: &[usize]) -> Result<usize> {
        let Some((&channels, rest)) = shape.split_last() else {
            return Err(self.invalid("activation is a scalar"));
        };

        if self.filter >= channels {
            return Err(self.invalid(format!(
                "filter {} out of range for {channels} channels",
                self.filter
            )));
        }

        let Some(region) = &self.region else {
            return Ok(rest.iter().product());
        };

        let &[n, h, w] = rest else {
            return Err(self.invalid(format!(
                "a spatial region needs an NHWC activation, got shape {shape:?}"
            )));
        };

        if region.rows.is_empty()
            || region.cols.is_empty()
            || region.rows.end > h
            || region.cols.end > w
        {
            return Err(self.invalid(format!(
                "region {:?}x{:?} does not fit a {h}x{w} activation",
                region.rows, region.cols
            )));
        }

        Ok(n * region.rows.len() * region.cols.len())
    }

    fn selects(&self, idx: &IxDyn) -> bool {
        let ndim = idx.ndim();
        if idx[ndim - 1] != self.filter {
            return false;
        }

        self.region
            .as_ref()
            .is_none_or(|region| region.rows.contains(&idx[1]) && region.cols.contains(&idx[2]))
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::invalid_target(&self.layer, reason)
    }
}

impl Target for FilterTarget {
    fn layer(&self) -> &str {
        &self.layer
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, activation: &Tensor) -> Result<f32> {
        let count = self.selected_count(activation.shape())?;

        let sum: f32 = activation
            .indexed_iter()
            .filter(|(idx, _)| self.selects(idx))
            .map(|(_, &v)| v)
            .sum();

        Ok(sum / count as f32)
    }

    #[allow(clippy::cast_precision_loss)]
    fn gradient(&self, activation: &Tensor) -> Result<Tensor> {
        let weight = 1.0 / self.selected_count(activation.shape())? as f32;

        Ok(Tensor::from_shape_fn(activation.raw_dim(), |idx| {
            if self.selects(&idx) {
                weight
            } else {
                0.0
            }
        }))
    }
}

/// Mean of a whole layer's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTarget {
    layer: String,
}

impl LayerTarget {
    #[must_use]
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
        }
    }
}

impl Target for LayerTarget {
    fn layer(&self) -> &str {
        &self.layer
    }

    fn score(&self, activation: &Tensor) -> Result<f32> {
        activation
            .mean()
            .ok_or_else(|| Error::invalid_target(&self.layer, "activation is empty"))
    }

    #[allow(clippy::cast_precision_loss)]
    fn gradient(&self, activation: &Tensor) -> Result<Tensor> {
        if activation.is_empty() {
            return Err(Error::invalid_target(&self.layer, "activation is empty"));
        }

        Ok(Tensor::from_elem(
            activation.raw_dim(),
            1.0 / activation.len() as f32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;

    fn activation() -> Tensor {
        // [1, 2, 2, 2]: channel 0 holds 0..4, channel 1 holds 10..14.
        Array::from_shape_vec(
            vec![1, 2, 2, 2],
            vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0, 3.0, 13.0],
        )
        .unwrap()
    }

    #[test]
    fn test_filter_score_is_channel_mean() {
        let target = FilterTarget::new("conv", 1);
        assert!((target.score(&activation()).unwrap() - 11.5).abs() < 1e-6);
    }

    #[test]
    fn test_filter_region_score() {
        let target = FilterTarget::new("conv", 0).with_region(1..2, 0..2);
        assert!((target.score(&activation()).unwrap() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_filter_gradient_selects_channel() {
        let target = FilterTarget::new("conv", 0).with_region(0..1, 1..2);
        let grad = target.gradient(&activation()).unwrap();

        assert!((grad[[0, 0, 1, 0]] - 1.0).abs() < 1e-6);
        assert!((grad.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_filter_out_of_range() {
        let target = FilterTarget::new("conv", 2);
        assert!(matches!(
            target.score(&activation()),
            Err(Error::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_region_out_of_range() {
        let target = FilterTarget::new("conv", 0).with_region(0..3, 0..1);
        assert!(matches!(
            target.gradient(&activation()),
            Err(Error::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_region_needs_spatial_activation() {
        let dense = Tensor::zeros(vec![1, 4]);
        let target = FilterTarget::new("dense", 0).with_region(0..1, 0..1);
        assert!(target.score(&dense).is_err());
    }

    #[test]
    fn test_layer_target() {
        let target = LayerTarget::new("conv");
        assert!((target.score(&activation()).unwrap() - 6.5).abs() < 1e-6);
        assert!((target.gradient(&activation()).unwrap().sum() - 1.0).abs() < 1e-6);
    }
}
