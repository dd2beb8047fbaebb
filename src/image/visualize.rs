//! Conversion of inceptions into displayable bytes.

use ndarray::{Array, ArrayBase, ArrayD, ArrayViewD, Data, Dimension, IxDyn};

use crate::error::{Error, Result};

/// Colorfulness used when the caller has no preference.
pub const DEFAULT_COLORFULNESS: f32 = 0.2;

/// Convert an inception into image bytes.
///
/// The array is centered on its mean, scaled by twice its largest absolute
/// value, rescaled so its standard deviation equals `colorfulness`, shifted by
/// 0.5, clipped to [0, 1] and mapped to [0, 255]. Higher colorfulness gives
/// higher contrast. A constant array maps to uniform bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if `colorfulness` is outside [0, 1] and
/// [`Error::InvalidInput`] if the array is empty or holds non-finite values.
#[allow(clippy::float_cmp)]
pub fn inception_to_bytes<S, D>(
    inception: &ArrayBase<S, D>,
    colorfulness: f32,
) -> Result<Array<u8, D>>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    validate_colorfulness(colorfulness)?;

    if inception.is_empty() {
        return Err(Error::InvalidInput {
            reason: "inception is empty".to_string(),
        });
    }

    if inception.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput {
            reason: "inception contains non-finite values".to_string(),
        });
    }

    let a = inception.mapv(f64::from);
    let mean = a.mean().unwrap_or(0.0);
    let max = a.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let min = a.fold(f64::INFINITY, |m, &v| m.min(v));

    let k = 2.0 * max.abs().max(min.abs());
    let normalized = if k == 0.0 {
        Array::zeros(a.raw_dim())
    } else {
        (a - mean) / k
    };

    let std = normalized.std(0.0);
    let colorfulness = f64::from(colorfulness);

    Ok(normalized.mapv(|v| to_byte(v / (std + f64::EPSILON) * colorfulness)))
}

/// Convert a flat buffer laid out in row-major `shape` into image bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `data` does not form an array of `shape`,
/// plus every error of [`inception_to_bytes`].
pub fn raw_inception_to_bytes(
    data: &[f32],
    shape: &[usize],
    colorfulness: f32,
) -> Result<ArrayD<u8>> {
    validate_colorfulness(colorfulness)?;

    let inception =
        ArrayViewD::from_shape(IxDyn(shape), data).map_err(|_| Error::InvalidInput {
            reason: format!(
                "{} values do not form an array of shape {shape:?}",
                data.len()
            ),
        })?;

    inception_to_bytes(&inception, colorfulness)
}

fn validate_colorfulness(colorfulness: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&colorfulness) {
        return Err(Error::InvalidParameter {
            name: "colorfulness".to_string(),
            reason: "must be between 0.0 and 1.0".to_string(),
        });
    }

    Ok(())
}

/// Shift a standardized value into [0, 1] and truncate it to a byte.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_byte(value: f64) -> u8 {
    // Safe: clamped to [0, 255] range before casting
    ((value + 0.5).clamp(0.0, 1.0) * 255.0) as u8
}
