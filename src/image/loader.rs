use crate::utils::error::SegError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use ndarray::Array3;
use std::io::Cursor;

/// 最大上传大小
pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

/// Largest edge length accepted when decoding an upload, in pixels.
pub const MAX_DECODE_DIMENSION: u32 = 8192;

pub struct ImageLoader;

impl ImageLoader {
    /// 从base64字符串加载图像
    pub fn from_base64(base64_data: &str) -> Result<RgbImage> {
        let image_bytes = Self::decode_base64(base64_data)?;
        Self::from_bytes(&image_bytes)
    }

    /// Decode a base64 payload, with or without a `data:` URL prefix.
    pub fn decode_base64(base64_data: &str) -> Result<Vec<u8>> {
        // 检测并移除可能的数据URL前缀 (data:image/xxx;base64,)
        let base64_clean = match base64_data.trim().strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
            None => base64_data.trim(),
        };

        Ok(base64::engine::general_purpose::STANDARD.decode(base64_clean)?)
    }

    /// 从字节流加载图像
    pub fn from_bytes(bytes: &[u8]) -> Result<RgbImage> {
        if bytes.is_empty() {
            return Err(SegError::InvalidImage("empty image data".to_string()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(SegError::InvalidImage(format!(
                "image is {} bytes, max allowed is {} bytes",
                bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }

        if let Some(format) = Self::detect_format(bytes) {
            if !Self::is_supported_format(format) {
                return Err(SegError::InvalidImage(format!(
                    "unsupported image format: {:?}",
                    format
                )));
            }
        }

        let image = image::load_from_memory(bytes)?;
        let (width, height) = image.dimensions();
        if width > MAX_DECODE_DIMENSION || height > MAX_DECODE_DIMENSION {
            return Err(SegError::InvalidImage(format!(
                "image too large: {}x{}, maximum {}x{}",
                width, height, MAX_DECODE_DIMENSION, MAX_DECODE_DIMENSION
            )));
        }
        Self::to_rgb(image)
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 验证图像格式是否支持
    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::Bmp
                | ImageFormat::Tiff
                | ImageFormat::WebP
        )
    }

    /// Convert any decoded image to 8-bit RGB after checking its size.
    pub fn to_rgb(image: DynamicImage) -> Result<RgbImage> {
        Self::validate_dimensions(image.dimensions())?;
        Ok(image.to_rgb8())
    }

    /// Build an RGB image from an (height, width, channels) u8 array.
    pub fn from_array(array: &Array3<u8>) -> Result<RgbImage> {
        let (height, width, channels) = array.dim();
        if channels != 3 {
            return Err(SegError::InvalidImage(format!(
                "expected 3 color channels, got {}",
                channels
            )));
        }
        Self::validate_dimensions((width as u32, height as u32))?;

        Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            image::Rgb([array[[y, x, 0]], array[[y, x, 1]], array[[y, x, 2]]])
        }))
    }

    /// 验证图像尺寸: any non-empty image is accepted.
    pub fn validate_dimensions((width, height): (u32, u32)) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(SegError::InvalidImage(format!(
                "zero-size image: {}x{}",
                width, height
            )));
        }
        Ok(())
    }

    /// Encode an RGB image as PNG bytes.
    pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Encode an RGB image as a `data:image/png;base64,...` URL for the browser.
    pub fn to_png_data_url(image: &RgbImage) -> Result<String> {
        let png = Self::encode_png(image)?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}
