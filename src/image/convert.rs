//! Conversion of stored images into model-ready pixel tensors.

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array3;

use crate::error::{Error, Result};

use super::RGB_CHANNELS;

/// Spatial downsampling factor between pixel space and latent space. Model
/// inputs must have both dimensions aligned to this grid.
pub const LATENT_SCALE_FACTOR: u32 = 8;

/// Convert an image to a normalized CHW pixel tensor on the latent grid.
///
/// The image is:
/// 1. Converted to RGB if necessary
/// 2. Snapped down to the nearest multiple of [`LATENT_SCALE_FACTOR`] in
///    each spatial dimension (Lanczos3 when resizing is needed)
/// 3. Normalized from [0, 255] to [-1, 1]
///
/// The result is rank-3 (channel, height, width); batching is the caller's
/// concern.
///
/// # Errors
///
/// Returns an error if either dimension is smaller than one grid cell.
pub fn image_to_grid_tensor(img: &DynamicImage) -> Result<Array3<f32>> {
    let (width, height) = img.dimensions();
    let grid_w = snap_to_grid(width);
    let grid_h = snap_to_grid(height);

    if grid_w == 0 || grid_h == 0 {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: format!("both dimensions must be at least {LATENT_SCALE_FACTOR} pixels"),
        });
    }

    let rgb = if (grid_w, grid_h) == (width, height) {
        img.to_rgb8()
    } else {
        img.resize_exact(grid_w, grid_h, FilterType::Lanczos3).to_rgb8()
    };

    let (w, h) = (grid_w as usize, grid_h as usize);
    let mut tensor = Array3::<f32>::zeros((RGB_CHANNELS, h, w));

    for y in 0..h {
        for x in 0..w {
            // Safe: x and y are bounded by the image dimensions which fit in u32
            #[allow(clippy::cast_possible_truncation)]
            let pixel = rgb.get_pixel(x as u32, y as u32);
            // Normalize from [0, 255] to [-1, 1]
            tensor[[0, y, x]] = (f32::from(pixel[0]) / 127.5) - 1.0;
            tensor[[1, y, x]] = (f32::from(pixel[1]) / 127.5) - 1.0;
            tensor[[2, y, x]] = (f32::from(pixel[2]) / 127.5) - 1.0;
        }
    }

    Ok(tensor)
}

/// Largest multiple of the latent grid not exceeding `dim`.
const fn snap_to_grid(dim: u32) -> u32 {
    dim - dim % LATENT_SCALE_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_image_keeps_dimensions() {
        let img = DynamicImage::new_rgb8(64, 64);
        let tensor = image_to_grid_tensor(&img).unwrap();
        assert_eq!(tensor.shape(), &[3, 64, 64]);
    }

    #[test]
    fn test_unaligned_image_snaps_down() {
        let img = DynamicImage::new_rgb8(65, 63);
        let tensor = image_to_grid_tensor(&img).unwrap();
        assert_eq!(tensor.shape(), &[3, 56, 64]);
    }

    #[test]
    fn test_too_small_image_rejected() {
        let img = DynamicImage::new_rgb8(7, 20);
        assert!(matches!(
            image_to_grid_tensor(&img),
            Err(Error::UnsupportedDimensions { .. })
        ));
    }

    #[test]
    fn test_normalization_range() {
        let img = DynamicImage::new_rgb8(16, 16);
        let tensor = image_to_grid_tensor(&img).unwrap();

        let min = tensor.iter().copied().fold(f32::INFINITY, f32::min);
        let max = tensor.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        // Black image should be all -1.0
        assert!((min - (-1.0)).abs() < 0.01);
        assert!((max - (-1.0)).abs() < 0.01);
    }
}
