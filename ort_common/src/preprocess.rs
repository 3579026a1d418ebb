//! Frame to tensor conversion shared by the classifier and the detectors.

use anyhow::Context;
use fast_image_resize::images::{Image, ImageRef};
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::RgbImage;
use ndarray::ArrayViewMut3;

/// Per channel mean and std used by models trained on ImageNet.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Plain `[0, 1]` scaling, as expected by YOLO exports.
pub const UNIT_MEAN: [f32; 3] = [0.0, 0.0, 0.0];
pub const UNIT_STD: [f32; 3] = [1.0, 1.0, 1.0];

/// Stretches `image` to `width`x`height` with a bilinear filter.
pub fn resize(
    resizer: &mut Resizer,
    image: &RgbImage,
    width: u32,
    height: u32,
) -> anyhow::Result<RgbImage> {
    if image.dimensions() == (width, height) {
        return Ok(image.clone());
    }
    let src = ImageRef::new(image.width(), image.height(), image.as_raw(), PixelType::U8x3)
        .context("Frame buffer does not match its dimensions")?;
    let mut dst = Image::new(width, height, PixelType::U8x3);
    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
    resizer
        .resize(&src, &mut dst, &options)
        .context("Failed to resize frame")?;
    RgbImage::from_raw(width, height, dst.into_vec())
        .context("Resized buffer does not match its dimensions")
}

/// Writes `image` into a `[3, H, W]` view as `(pixel / 255 - mean) / std`.
pub fn fill_chw(mut out: ArrayViewMut3<'_, f32>, image: &RgbImage, mean: [f32; 3], std: [f32; 3]) {
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            out[[c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array3;

    #[test]
    fn test_resize_dimensions() {
        let mut resizer = Resizer::new();
        let img = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
        let out = resize(&mut resizer, &img, 32, 32).unwrap();
        assert_eq!(out.dimensions(), (32, 32));
        // flat colour survives resampling
        assert_eq!(*out.get_pixel(16, 16), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_fill_chw_normalizes() {
        let img = RgbImage::from_pixel(2, 1, Rgb([255, 0, 51]));
        let mut arr = Array3::<f32>::zeros((3, 1, 2));
        fill_chw(arr.view_mut(), &img, UNIT_MEAN, UNIT_STD);
        assert_eq!(arr[[0, 0, 1]], 1.0);
        assert_eq!(arr[[1, 0, 0]], 0.0);
        assert!((arr[[2, 0, 0]] - 0.2).abs() < 1e-6);

        fill_chw(arr.view_mut(), &img, IMAGENET_MEAN, IMAGENET_STD);
        assert!((arr[[0, 0, 0]] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
    }
}
