use crate::utils::error::SegError;
use crate::Result;
use image::{imageops, imageops::FilterType, GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Mask value for foreground pixels.
pub const MASK_ON: u8 = 255;

/// Mask value for background pixels.
pub const MASK_OFF: u8 = 0;

/// Color channel the mask is painted into (RGB order, so green).
pub const OVERLAY_CHANNEL: usize = 1;

pub struct MaskPostprocessor;

impl MaskPostprocessor {
    /// Full postprocessing: logits of shape (1, H, W) to an overlay at the
    /// original image resolution.
    pub fn postprocess(
        logits: Array3<f32>,
        original: &RgbImage,
        threshold: f32,
        alpha: f32,
    ) -> Result<RgbImage> {
        let logits = Self::squeeze(logits)?;
        let mask = Self::binarize(logits.view(), threshold);
        let mask = Self::resize_mask(&mask, original.width(), original.height());
        Self::blend_overlay(original, &mask, alpha)
    }

    /// Drop the singleton channel axis.
    pub fn squeeze(logits: Array3<f32>) -> Result<Array2<f32>> {
        if logits.len_of(Axis(0)) != 1 {
            return Err(SegError::ImageProcessing(format!(
                "expected a single-channel mask, got shape {:?}",
                logits.shape()
            )));
        }
        Ok(logits.index_axis_move(Axis(0), 0))
    }

    /// 二值化: strictly above `threshold` becomes 255, everything else 0.
    ///
    /// `threshold` is compared against raw logits, not probabilities.
    pub fn binarize(logits: ArrayView2<f32>, threshold: f32) -> Array2<u8> {
        logits.mapv(|v| if v > threshold { MASK_ON } else { MASK_OFF })
    }

    /// Resize a binary mask to the original image size. Nearest neighbour
    /// keeps the mask two-valued.
    pub fn resize_mask(mask: &Array2<u8>, width: u32, height: u32) -> GrayImage {
        let (rows, cols) = mask.dim();
        let mask_image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([mask[[y as usize, x as usize]]])
        });
        imageops::resize(&mask_image, width, height, FilterType::Nearest)
    }

    /// Tint the masked region green: `original * 1.0 + layer * alpha`,
    /// saturated to u8, where `layer` is zero outside the green channel.
    pub fn blend_overlay(original: &RgbImage, mask: &GrayImage, alpha: f32) -> Result<RgbImage> {
        if original.dimensions() != mask.dimensions() {
            return Err(SegError::ImageProcessing(format!(
                "mask is {:?}, image is {:?}",
                mask.dimensions(),
                original.dimensions()
            )));
        }

        let mut overlay = original.clone();
        for (pixel, Luma([m])) in overlay.pixels_mut().zip(mask.pixels()) {
            let Rgb(channels) = pixel;
            channels[OVERLAY_CHANNEL] = Self::add_weighted(channels[OVERLAY_CHANNEL], *m, alpha);
        }

        Ok(overlay)
    }

    #[inline]
    fn add_weighted(base: u8, layer: u8, alpha: f32) -> u8 {
        (f32::from(base) + f32::from(layer) * alpha)
            .round()
            .clamp(0.0, 255.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MASK_THRESHOLD, DEFAULT_OVERLAY_ALPHA};
    use ndarray::Array3;

    #[test]
    fn binarize_uses_strict_comparison() {
        let logits = ndarray::arr2(&[[-2.5_f32, -2.4999], [-10.0, 3.0]]);
        let mask = MaskPostprocessor::binarize(logits.view(), DEFAULT_MASK_THRESHOLD);
        assert_eq!(mask, ndarray::arr2(&[[0_u8, 255], [0, 255]]));
    }

    #[test]
    fn binary_mask_only_contains_two_values() {
        let logits = Array3::from_shape_fn((1, 32, 32), |(_, y, x)| (x as f32 - y as f32) / 4.0);
        let mask = MaskPostprocessor::binarize(
            MaskPostprocessor::squeeze(logits).unwrap().view(),
            DEFAULT_MASK_THRESHOLD,
        );
        assert!(mask.iter().all(|&v| v == MASK_ON || v == MASK_OFF));
    }

    #[test]
    fn resized_mask_matches_original_size_and_stays_binary() {
        let mask = Array2::from_shape_fn((256, 256), |(y, _)| if y < 128 { 255 } else { 0 });
        let resized = MaskPostprocessor::resize_mask(&mask, 613, 97);

        assert_eq!(resized.dimensions(), (613, 97));
        assert!(resized.pixels().all(|Luma([v])| *v == 0 || *v == 255));
    }

    #[test]
    fn background_mask_leaves_image_untouched() {
        let original = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 7]));
        let logits = Array3::from_elem((1, 256, 256), -5.0_f32);

        let overlay = MaskPostprocessor::postprocess(
            logits,
            &original,
            DEFAULT_MASK_THRESHOLD,
            DEFAULT_OVERLAY_ALPHA,
        )
        .unwrap();

        assert_eq!(overlay, original);
    }

    #[test]
    fn full_mask_boosts_green_uniformly() {
        let original = RgbImage::from_fn(50, 20, |x, _| Rgb([10, (x * 5) as u8, 200]));
        let logits = Array3::from_elem((1, 256, 256), 1.0_f32);

        let overlay = MaskPostprocessor::postprocess(
            logits,
            &original,
            DEFAULT_MASK_THRESHOLD,
            DEFAULT_OVERLAY_ALPHA,
        )
        .unwrap();

        for (before, after) in original.pixels().zip(overlay.pixels()) {
            assert_eq!(after[0], before[0]);
            assert_eq!(after[2], before[2]);
            assert_eq!(after[1], (u16::from(before[1]) + 102).min(255) as u8);
        }
    }

    #[test]
    fn green_channel_saturates() {
        let original = RgbImage::from_pixel(4, 4, Rgb([0, 250, 0]));
        let mask = GrayImage::from_pixel(4, 4, Luma([255]));
        let overlay = MaskPostprocessor::blend_overlay(&original, &mask, 0.4).unwrap();
        assert_eq!(overlay.get_pixel(0, 0), &Rgb([0, 255, 0]));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let original = RgbImage::new(4, 4);
        let mask = GrayImage::new(5, 4);
        assert!(MaskPostprocessor::blend_overlay(&original, &mask, 0.4).is_err());
    }

    #[test]
    fn multi_channel_logits_are_rejected() {
        let logits = Array3::<f32>::zeros((2, 8, 8));
        assert!(MaskPostprocessor::squeeze(logits).is_err());
    }
}
