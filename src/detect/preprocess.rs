//! Image preparation for the model inputs.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::result::BoundingBox;
use crate::error::PipelineError;

/// Crop `bbox` out of `image`, clipping the box to the image bounds first.
///
/// Out-of-bounds boxes are clipped, not rejected. Only a box with no overlap
/// at all is an error.
pub fn crop_clamped(image: &RgbImage, bbox: &BoundingBox) -> Result<RgbImage> {
    let clipped = bbox
        .clamp_to(image.width(), image.height())
        .ok_or(PipelineError::EmptyCrop)?;
    let view = imageops::crop_imm(
        image,
        clipped.left as u32,
        clipped.top as u32,
        clipped.width() as u32,
        clipped.height() as u32,
    );
    Ok(view.to_image())
}

/// Stretch `image` to `size x size`. Aspect ratio is not preserved; the
/// tensor decoder scales each axis independently to match.
pub fn resize_square(image: &RgbImage, size: u32) -> RgbImage {
    if image.width() == size && image.height() == size {
        return image.clone();
    }
    imageops::resize(image, size, size, FilterType::Triangle)
}

/// Crop a face and resize it to the embedder input edge.
pub fn prepare_face(image: &RgbImage, bbox: &BoundingBox, input_size: u32) -> Result<RgbImage> {
    let face = crop_clamped(image, bbox)?;
    Ok(resize_square(&face, input_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]))
    }

    #[test]
    fn crop_inside_bounds_keeps_pixels() -> Result<()> {
        let image = gradient(64, 48);
        let crop = crop_clamped(&image, &BoundingBox::new(10, 5, 20, 15))?;
        assert_eq!(crop.dimensions(), (10, 10));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([10, 5, 0]));
        Ok(())
    }

    #[test]
    fn crop_clips_out_of_bounds_box() -> Result<()> {
        let image = gradient(64, 48);
        let crop = crop_clamped(&image, &BoundingBox::new(-10, 40, 20, 100))?;
        assert_eq!(crop.dimensions(), (20, 8));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([0, 40, 0]));
        Ok(())
    }

    #[test]
    fn crop_without_overlap_is_empty_crop_error() {
        let image = gradient(64, 48);
        let err = crop_clamped(&image, &BoundingBox::new(100, 100, 120, 120)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::EmptyCrop)
        );
    }

    #[test]
    fn prepare_face_produces_embedder_input() -> Result<()> {
        let image = gradient(640, 480);
        let face = prepare_face(&image, &BoundingBox::new(100, 100, 300, 260), 112)?;
        assert_eq!(face.dimensions(), (112, 112));
        Ok(())
    }
}
