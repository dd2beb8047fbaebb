//! Seed image loading.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::model::Tensor;

use super::RGB_CHANNELS;

/// Load an image from disk as a seed tensor for an inception.
///
/// The image is:
/// 1. Loaded from the specified path
/// 2. Resized to `height` x `width`
/// 3. Converted to RGB if necessary
/// 4. Centered to the [-0.5, 0.5] range
/// 5. Returned as an NHWC tensor (1, height, width, 3)
///
/// # Errors
///
/// Returns an error if the image cannot be loaded or the size is zero.
pub fn load_seed_image<P: AsRef<Path>>(path: P, height: u32, width: u32) -> Result<Tensor> {
    let path = path.as_ref();

    if height == 0 || width == 0 {
        return Err(Error::InvalidParameter {
            name: "seed image size".to_string(),
            reason: format!("must be positive, got {width}x{height}"),
        });
    }

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Loaded seed image {} ({}x{})", path.display(), img.width(), img.height());

    Ok(image_to_tensor(&img, height, width))
}

/// Convert a `DynamicImage` to a centered NHWC tensor.
fn image_to_tensor(img: &DynamicImage, height: u32, width: u32) -> Tensor {
    let rgb = img
        .resize_exact(width, height, FilterType::Lanczos3)
        .to_rgb8();

    let tensor = Array4::from_shape_fn(
        (1, height as usize, width as usize, RGB_CHANNELS),
        |(_, y, x, c)| {
            // Safe: x and y are bounded by the requested u32 size
            #[allow(clippy::cast_possible_truncation)]
            let pixel = rgb.get_pixel(x as u32, y as u32);
            f32::from(pixel[c]) / 255.0 - 0.5
        },
    );

    tensor.into_dyn()
}
