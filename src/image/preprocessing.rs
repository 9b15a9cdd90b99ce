use crate::image::ImageLoader;
use crate::Result;
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array3;

/// ImageNet channel means the checkpoint was trained with.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations the checkpoint was trained with.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Turn an RGB image into the (3, height, width) tensor the network expects.
    ///
    /// Order matters: resize, normalize with the ImageNet statistics, rescale
    /// by 1/255 once more, then move channels first. The extra rescale matches
    /// how the training inputs were produced.
    pub fn preprocess(image: &RgbImage, width: u32, height: u32) -> Result<Array3<f32>> {
        ImageLoader::validate_dimensions(image.dimensions())?;

        let resized = imageops::resize(image, width, height, FilterType::Triangle);

        let tensor = Array3::from_shape_fn(
            (3, height as usize, width as usize),
            |(c, y, x)| {
                let value = resized.get_pixel(x as u32, y as u32).0[c];
                Self::normalize(value, c) / 255.0
            },
        );

        tracing::debug!(
            "Preprocessed {}x{} image into tensor {:?}",
            image.width(),
            image.height(),
            tensor.shape()
        );

        Ok(tensor)
    }

    /// 单通道归一化
    #[inline]
    fn normalize(value: u8, channel: usize) -> f32 {
        (f32::from(value) / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::SegError;
    use image::Rgb;

    #[test]
    fn output_is_channel_first_at_model_resolution() {
        let image = RgbImage::from_pixel(640, 480, Rgb([120, 60, 30]));
        let tensor = ImagePreprocessor::preprocess(&image, 256, 256).unwrap();
        assert_eq!(tensor.shape(), &[3, 256, 256]);

        let non_square = ImagePreprocessor::preprocess(&image, 128, 64).unwrap();
        assert_eq!(non_square.shape(), &[3, 64, 128]);
    }

    #[test]
    fn black_image_maps_to_negative_mean_over_std() {
        let image = RgbImage::new(100, 37);
        let tensor = ImagePreprocessor::preprocess(&image, 256, 256).unwrap();

        for c in 0..3 {
            let expected = (-IMAGENET_MEAN[c] / IMAGENET_STD[c]) / 255.0;
            for value in tensor.index_axis(ndarray::Axis(0), c).iter() {
                assert!((value - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn channels_keep_rgb_order() {
        let image = RgbImage::from_pixel(16, 16, Rgb([255, 0, 0]));
        let tensor = ImagePreprocessor::preprocess(&image, 8, 8).unwrap();

        let red = tensor[[0, 4, 4]];
        let green = tensor[[1, 4, 4]];
        assert!(red > 0.0);
        assert!(green < 0.0);
        assert!((red - ((1.0 - 0.485) / 0.229) / 255.0).abs() < 1e-6);
    }

    #[test]
    fn zero_size_image_is_invalid() {
        let image = RgbImage::new(0, 10);
        assert!(matches!(
            ImagePreprocessor::preprocess(&image, 256, 256),
            Err(SegError::InvalidImage(_))
        ));
    }
}
