use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use tracing::{debug, warn};

pub const MAX_IMAGE_DIMENSION: u32 = 1024;
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const GRID_CELL_SIZE: u32 = 512;
pub const GRID_MAX_COLUMNS: usize = 3;
const GRID_JPEG_QUALITY: u8 = 95;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("not a decodable image: {0}")]
    Decode(String),
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to encode image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_dimension: u32,
    pub max_bytes: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_dimension: MAX_IMAGE_DIMENSION,
            max_bytes: MAX_IMAGE_BYTES,
        }
    }
}

fn is_accepted_format(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Jpeg | ImageFormat::Png)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| ImageError::Encode(err.to_string()))?;
    Ok(buffer.into_inner())
}

/// Target size when either side exceeds `max`; `None` means no resize.
pub fn scaled_dimensions(width: u32, height: u32, max: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || (width <= max && height <= max) {
        return None;
    }
    let ratio = f64::min(
        f64::from(max) / f64::from(width),
        f64::from(max) / f64::from(height),
    );
    let new_width = ((f64::from(width) * ratio).round() as u32).clamp(1, max);
    let new_height = ((f64::from(height) * ratio).round() as u32).clamp(1, max);
    Some((new_width, new_height))
}

pub fn normalize_image(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    normalize_image_with(bytes, ImageLimits::default())
}

/// Brings an uploaded photo within the provider's format, dimension and size
/// constraints. Accepted input that needs no change is returned as-is.
pub fn normalize_image_with(bytes: &[u8], limits: ImageLimits) -> Result<Vec<u8>, ImageError> {
    let format = image::guess_format(bytes).map_err(|err| ImageError::Decode(err.to_string()))?;
    let mut image = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| ImageError::Decode(err.to_string()))?;

    let mut output: Option<Vec<u8>> = None;
    if !is_accepted_format(format) {
        debug!("Transcoding {:?} input to PNG", format);
        output = Some(encode_png(&image)?);
    }

    let (width, height) = image.dimensions();
    if let Some((new_width, new_height)) = scaled_dimensions(width, height, limits.max_dimension)
    {
        debug!(
            "Downscaling image from {}x{} to {}x{}",
            width, height, new_width, new_height
        );
        image = image.resize_exact(new_width, new_height, FilterType::Lanczos3);
        output = Some(encode_png(&image)?);
    }

    let output = output.unwrap_or_else(|| bytes.to_vec());
    if output.len() > limits.max_bytes {
        return Err(ImageError::TooLarge {
            size: output.len(),
            limit: limits.max_bytes,
        });
    }
    Ok(output)
}

/// Grid shape for `count` images: at most three columns, rows as needed.
pub fn grid_shape(count: usize) -> Option<(usize, usize)> {
    if count == 0 {
        return None;
    }
    let cols = count.min(GRID_MAX_COLUMNS);
    let rows = count.div_ceil(cols);
    Some((cols, rows))
}

/// Lays the decodable images out row-major into fixed-size cells and returns
/// the grid as JPEG. Undecodable entries are skipped.
pub fn compose_grid<'a, I>(images: I, cell_size: u32) -> Result<Option<Vec<u8>>, ImageError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let decoded: Vec<DynamicImage> = images
        .into_iter()
        .enumerate()
        .filter_map(|(index, bytes)| match image::load_from_memory(bytes) {
            Ok(image) => Some(image),
            Err(err) => {
                warn!("Skipping variant {} in comparison grid: {err}", index);
                None
            }
        })
        .collect();

    let Some((cols, rows)) = grid_shape(decoded.len()) else {
        return Ok(None);
    };

    let mut grid = RgbImage::new(cols as u32 * cell_size, rows as u32 * cell_size);
    for (index, image) in decoded.iter().enumerate() {
        let x = (index % cols) as u32 * cell_size;
        let y = (index / cols) as u32 * cell_size;
        let cell = image
            .resize_exact(cell_size, cell_size, FilterType::Lanczos3)
            .to_rgb8();
        image::imageops::overlay(&mut grid, &cell, i64::from(x), i64::from(y));
    }

    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, GRID_JPEG_QUALITY)
        .encode_image(&grid)
        .map_err(|err| ImageError::Encode(err.to_string()))?;
    Ok(Some(output))
}

/// RMS contrast of the grayscale image: standard deviation of pixel
/// intensities, 0 for a flat image. `None` when the bytes do not decode.
pub fn contrast_score(bytes: &[u8]) -> Option<f64> {
    let gray = image::load_from_memory(bytes).ok()?.to_luma8();
    let count = u64::from(gray.width()) * u64::from(gray.height());
    if count == 0 {
        return Some(0.0);
    }
    let (sum, sum_sq) = gray.pixels().fold((0.0f64, 0.0f64), |(sum, sum_sq), pixel| {
        let value = f64::from(pixel.0[0]);
        (sum + value, sum_sq + value * value)
    });
    let mean = sum / count as f64;
    let variance = sum_sq / count as f64 - mean * mean;
    Some(variance.max(0.0).sqrt())
}

#[cfg(test)]
pub(crate) mod test_images {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    pub fn solid(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        encode(DynamicImage::ImageRgb8(image), format)
    }

    /// High-entropy pixels so PNG compression cannot shrink the payload much.
    pub fn noisy(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x9e37_79b9;
        let image = RgbImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            };
            Rgb([next(), next(), next()])
        });
        encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)
    }

    pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::test_images::{noisy, solid};
    use super::*;

    #[test]
    fn small_jpeg_passes_through_untouched() {
        let input = solid(64, 48, [200, 10, 10], ImageFormat::Jpeg);
        let output = normalize_image(&input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn oversized_image_is_downscaled_preserving_aspect_ratio() {
        let input = solid(2048, 1024, [0, 120, 0], ImageFormat::Png);
        let output = normalize_image(&input).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (1024, 512));
    }

    #[test]
    fn portrait_image_scales_by_its_height() {
        assert_eq!(scaled_dimensions(1500, 3000, 1024), Some((512, 1024)));
        assert_eq!(scaled_dimensions(1024, 1024, 1024), None);
        assert_eq!(scaled_dimensions(300, 200, 1024), None);
    }

    #[test]
    fn webp_is_transcoded_to_png() {
        let input = solid(32, 32, [10, 20, 30], ImageFormat::WebP);
        let output = normalize_image(&input).unwrap();
        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = normalize_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[test]
    fn output_over_the_byte_ceiling_is_rejected() {
        let input = noisy(256, 256);
        let limits = ImageLimits {
            max_dimension: 1024,
            max_bytes: 16 * 1024,
        };
        let err = normalize_image_with(&input, limits).unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { limit, .. } if limit == 16 * 1024));
    }

    #[test]
    fn grid_shape_caps_columns_at_three() {
        assert_eq!(grid_shape(0), None);
        assert_eq!(grid_shape(1), Some((1, 1)));
        assert_eq!(grid_shape(2), Some((2, 1)));
        assert_eq!(grid_shape(4), Some((3, 2)));
        assert_eq!(grid_shape(7), Some((3, 3)));
    }

    #[test]
    fn grid_skips_undecodable_entries() {
        let red = solid(8, 8, [255, 0, 0], ImageFormat::Png);
        let blue = solid(8, 8, [0, 0, 255], ImageFormat::Png);
        let broken = b"broken".to_vec();
        let inputs = [red.as_slice(), broken.as_slice(), blue.as_slice()];

        let grid = compose_grid(inputs, 16).unwrap().unwrap();
        let decoded = image::load_from_memory(&grid).unwrap();
        assert_eq!(decoded.dimensions(), (32, 16));
    }

    #[test]
    fn grid_of_nothing_decodable_is_none() {
        let inputs = [b"a".as_slice(), b"b".as_slice()];
        assert!(compose_grid(inputs, 16).unwrap().is_none());
    }

    #[test]
    fn contrast_is_zero_for_flat_images() {
        assert_eq!(contrast_score(&solid(6, 6, [120, 40, 200], ImageFormat::Png)), Some(0.0));
        assert!(contrast_score(&noisy(6, 6)).unwrap() > 10.0);
        assert_eq!(contrast_score(b"not an image"), None);
    }
}
