//! Raster images decoded with the `image` crate into `[height, width, channels]` arrays.

use image::{DynamicImage, ImageError, ImageReader};

use crate::error::{LoadError, LoadResult};
use crate::types::{ElementType, NativeValue, NumericArray};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};

fn image_err(e: ImageError) -> LoadError {
    match e {
        ImageError::IoError(io) => io.into(),
        other => LoadError::corrupt_with("image", other.to_string(), other),
    }
}

fn widen<T: Copy + Into<f64>>(raw: &[T]) -> Vec<f64> {
    raw.iter().map(|&v| v.into()).collect()
}

/// Element type, channel count and samples of a decoded image.
fn pixel_data(img: &DynamicImage) -> (ElementType, usize, Vec<f64>) {
    match img {
        DynamicImage::ImageLuma8(b) => (ElementType::UInt8, 1, widen(b.as_raw())),
        DynamicImage::ImageLumaA8(b) => (ElementType::UInt8, 2, widen(b.as_raw())),
        DynamicImage::ImageRgb8(b) => (ElementType::UInt8, 3, widen(b.as_raw())),
        DynamicImage::ImageRgba8(b) => (ElementType::UInt8, 4, widen(b.as_raw())),
        DynamicImage::ImageLuma16(b) => (ElementType::UInt16, 1, widen(b.as_raw())),
        DynamicImage::ImageLumaA16(b) => (ElementType::UInt16, 2, widen(b.as_raw())),
        DynamicImage::ImageRgb16(b) => (ElementType::UInt16, 3, widen(b.as_raw())),
        DynamicImage::ImageRgba16(b) => (ElementType::UInt16, 4, widen(b.as_raw())),
        DynamicImage::ImageRgb32F(b) => (ElementType::Float32, 3, widen(b.as_raw())),
        DynamicImage::ImageRgba32F(b) => (ElementType::Float32, 4, widen(b.as_raw())),
        other => (ElementType::UInt8, 4, widen(other.to_rgba8().as_raw())),
    }
}

/// Loader for PNG, JPEG, TIFF, BMP, GIF and WebP images.
#[derive(Debug, Clone, Copy)]
pub struct ImagePlugin;

impl LoaderPlugin for ImagePlugin {
    fn format_tag(&self) -> &'static str {
        "image"
    }

    fn description(&self) -> &'static str {
        "Raster image (PNG, JPEG, TIFF, BMP, GIF, WebP)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif", "webp"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        peeked.len() >= 8 && image::guess_format(peeked).is_ok()
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let reader = ImageReader::open(ctx.path)?.with_guessed_format()?;
        let format = reader.format();
        let img = reader.decode().map_err(image_err)?;
        ctx.check_cancelled()?;

        let (height, width) = (img.height() as usize, img.width() as usize);
        let color = img.color();
        let (element_type, channels, values) = pixel_data(&img);
        drop(img);
        let arr = NumericArray::from_shape_vec(element_type, &[height, width, channels], values)
            .ok_or_else(|| {
                LoadError::corrupt("image", "decoded pixel buffer does not match image size")
            })?;

        let mut loaded = Loaded::new(NativeValue::Array(arr))
            .attr("width", width)
            .attr("height", height)
            .attr("channels", channels)
            .attr("color_type", format!("{color:?}"));
        if let Some(format) = format {
            loaded = loaded.attr("image_format", format!("{format:?}"));
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn rgb_images_have_three_channels() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 3, Rgb([10, 20, 30])));
        let (et, channels, values) = pixel_data(&img);
        assert_eq!(et, ElementType::UInt8);
        assert_eq!(channels, 3);
        assert_eq!(values.len(), 2 * 3 * 3);
        assert_eq!(&values[..3], &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn sniffs_png_and_rejects_text() {
        assert!(ImagePlugin.sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]));
        assert!(!ImagePlugin.sniff(b"a,b,c\n1,2,3\n"));
    }
}
