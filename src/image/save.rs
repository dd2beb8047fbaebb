//! Image saving utilities.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgb};
use ndarray::{ArrayBase, ArrayView3, Axis, Data, Dimension, Ix3};

use crate::error::{Error, Result};

use super::RGB_CHANNELS;

/// Save image bytes to disk.
///
/// The bytes are:
/// 1. Read as (height, width, channels), with an optional leading batch of 1
/// 2. Expanded to RGB if they hold a single channel
/// 3. Resized to `size` with bicubic filtering if provided
/// 4. Saved to the specified path (format inferred from extension)
///
/// # Arguments
///
/// * `bytes` - HWC or NHWC byte array, typically from `inception_to_bytes`
/// * `path` - Output file path
/// * `size` - Optional (width, height) to resize to
/// * `quality` - JPEG quality (1-100), ignored for other formats
///
/// # Errors
///
/// Returns an error if the bytes are not an image or the image cannot be saved.
pub fn save_image<S, D, P>(
    bytes: &ArrayBase<S, D>,
    path: P,
    size: Option<(u32, u32)>,
    quality: u8,
) -> Result<()>
where
    S: Data<Elem = u8>,
    D: Dimension,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !(1..=100).contains(&quality) {
        return Err(Error::InvalidParameter {
            name: "quality".to_string(),
            reason: "must be between 1 and 100".to_string(),
        });
    }

    let img = DynamicImage::ImageRgb8(bytes_to_image(&bytes.view().into_dyn())?);

    // Resize to the display size if specified
    let final_img = if let Some((width, height)) = size {
        img.resize_exact(width, height, FilterType::CatmullRom)
    } else {
        img
    };

    // Determine format and save
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let mut output = std::fs::File::create(path)?;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            final_img
                .write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            final_img.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    tracing::info!("Saved image to {}", path.display());
    Ok(())
}

/// Convert an HWC or NHWC byte array to an RGB image.
fn bytes_to_image(bytes: &ndarray::ArrayViewD<'_, u8>) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    let hwc: ArrayView3<'_, u8> = match bytes.shape() {
        [1, _, _, _] => bytes.index_axis(Axis(0), 0),
        _ => bytes.view(),
    }
    .into_dimensionality::<Ix3>()
    .map_err(|_| Error::ShapeMismatch {
        expected: "[H, W, C] or [1, H, W, C] bytes".to_string(),
        actual: format!("{:?}", bytes.shape()),
    })?;

    let (height, width, channels) = hwc.dim();
    if channels != 1 && channels != RGB_CHANNELS {
        return Err(Error::ShapeMismatch {
            expected: "1 or 3 channels".to_string(),
            actual: format!("{channels} channels"),
        });
    }

    let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(Error::InvalidInput {
            reason: format!("image of {width}x{height} is too large"),
        });
    };

    Ok(ImageBuffer::from_fn(w, h, |x, y| {
        let pixel = hwc.slice(ndarray::s![y as usize, x as usize, ..]);
        match channels {
            1 => Rgb([pixel[0]; 3]),
            _ => Rgb([pixel[0], pixel[1], pixel[2]]),
        }
    }))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, Array4};

    use super::*;

    #[test]
    fn test_rgb_bytes() {
        let mut bytes = Array4::<u8>::zeros((1, 2, 3, 3));
        bytes[[0, 1, 2, 0]] = 200;
        bytes[[0, 1, 2, 2]] = 50;

        let img = bytes_to_image(&bytes.view().into_dyn()).unwrap();

        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(2, 1), &Rgb([200, 0, 50]));
    }

    #[test]
    fn test_grayscale_bytes() {
        let bytes = Array3::<u8>::from_elem((2, 2, 1), 90);

        let img = bytes_to_image(&bytes.view().into_dyn()).unwrap();

        assert_eq!(img.get_pixel(1, 1), &Rgb([90, 90, 90]));
    }

    #[test]
    fn test_rejects_non_image_shapes() {
        let two_channels = Array3::<u8>::zeros((2, 2, 2));
        let batch_of_two = Array4::<u8>::zeros((2, 2, 2, 3));

        assert!(bytes_to_image(&two_channels.view().into_dyn()).is_err());
        assert!(bytes_to_image(&batch_of_two.view().into_dyn()).is_err());
    }

    #[test]
    fn test_rejects_bad_quality() {
        let bytes = Array3::<u8>::zeros((2, 2, 3));
        assert!(matches!(
            save_image(&bytes, "out.jpg", None, 0),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
