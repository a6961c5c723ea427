//! In-memory thumbnail generation.
//!
//! Decoding is bounded by [`DecodeLimits`]. Every source is normalized to
//! RGBA8 so transparency survives into both output formats, then shrunk with
//! Lanczos3 so neither side exceeds the requested bound. Sources with any
//! transparency are resampled premultiplied. Images that already fit are left
//! at their original size.

use crate::models::thumbnail::{ThumbnailFormat, UnsupportedFormat};
use image::{
    DynamicImage, ImageError, ImageReader, Limits,
    codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder},
    imageops::FilterType,
};
use std::{borrow::Cow, io::Cursor};
use thiserror::Error;
use webp::WebPConfig;

/// Fixed lossy quality for WebP output.
pub const WEBP_QUALITY: f32 = 90.0;

/// libwebp effort level; 6 is the slowest and smallest.
pub const WEBP_METHOD: i32 = 6;

const DEFAULT_MAX_IMAGE_SIDE: u32 = 16_384;
const DEFAULT_MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormat),
    #[error("max dimension must be greater than zero")]
    InvalidDimension,
    #[error("cannot decode image: {0}")]
    Decode(#[source] ImageError),
    #[error("cannot encode {format}: {reason}")]
    Encode {
        format: ThumbnailFormat,
        reason: String,
    },
}

pub type ThumbnailResult<T> = Result<T, ThumbnailError>;

/// Upper bounds applied while decoding untrusted input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Maximum width and height of the source image in pixels.
    pub max_side: u32,

    /// Maximum bytes the decoder may allocate.
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_IMAGE_SIDE,
            max_alloc: DEFAULT_MAX_DECODE_ALLOC,
        }
    }
}

impl DecodeLimits {
    fn to_image_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_side);
        limits.max_image_height = Some(self.max_side);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Decode `raw`, shrink it to fit `max_dimension` and encode it as `format`.
pub fn generate(
    raw: &[u8],
    max_dimension: u32,
    format: ThumbnailFormat,
    limits: &DecodeLimits,
) -> ThumbnailResult<Vec<u8>> {
    if max_dimension == 0 {
        return Err(ThumbnailError::InvalidDimension);
    }
    let image = decode(raw, limits)?;
    render(&image, max_dimension, format)
}

/// Same as [`generate`], with the target format given by name.
///
/// The name is resolved before the bytes are looked at, so an unsupported
/// format never costs a decode.
pub fn generate_named(
    raw: &[u8],
    max_dimension: u32,
    format: &str,
    limits: &DecodeLimits,
) -> ThumbnailResult<Vec<u8>> {
    let format: ThumbnailFormat = format.parse()?;
    generate(raw, max_dimension, format, limits)
}

/// Decode any supported raster format into an RGBA8 image.
pub fn decode(raw: &[u8], limits: &DecodeLimits) -> ThumbnailResult<DynamicImage> {
    let mut reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|err| ThumbnailError::Decode(ImageError::IoError(err)))?;
    reader.limits(limits.to_image_limits());

    let image = reader.decode().map_err(ThumbnailError::Decode)?;
    Ok(DynamicImage::ImageRgba8(image.into_rgba8()))
}

/// Shrink an already decoded image to fit `max_dimension` and encode it.
pub fn render(
    image: &DynamicImage,
    max_dimension: u32,
    format: ThumbnailFormat,
) -> ThumbnailResult<Vec<u8>> {
    if max_dimension == 0 {
        return Err(ThumbnailError::InvalidDimension);
    }
    let resized = shrink_to_fit(image, max_dimension);
    encode(&resized, format)
}

fn shrink_to_fit(image: &DynamicImage, max_dimension: u32) -> Cow<'_, DynamicImage> {
    if image.width() <= max_dimension && image.height() <= max_dimension {
        return Cow::Borrowed(image);
    }
    if is_opaque(image) {
        // `resize` keeps the aspect ratio and fits both sides inside the box.
        return Cow::Owned(image.resize(max_dimension, max_dimension, FilterType::Lanczos3));
    }
    Cow::Owned(resize_premultiplied(image, max_dimension))
}

fn is_opaque(image: &DynamicImage) -> bool {
    match image.as_rgba8() {
        Some(rgba) => rgba.pixels().all(|pixel| pixel[3] == u8::MAX),
        None => !image.color().has_alpha(),
    }
}

/// Resample with color weighted by alpha so hidden RGB under fully
/// transparent pixels cannot bleed into visible edges.
fn resize_premultiplied(image: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let mut premultiplied = image.to_rgba32f();
    for pixel in premultiplied.pixels_mut() {
        let alpha = pixel.0[3];
        for channel in &mut pixel.0[..3] {
            *channel *= alpha;
        }
    }

    let mut resized = DynamicImage::ImageRgba32F(premultiplied)
        .resize(max_dimension, max_dimension, FilterType::Lanczos3)
        .into_rgba32f();
    for pixel in resized.pixels_mut() {
        let alpha = pixel.0[3];
        for channel in &mut pixel.0[..3] {
            *channel = if alpha > 0.0 {
                (*channel / alpha).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
    }

    DynamicImage::ImageRgba8(DynamicImage::ImageRgba32F(resized).into_rgba8())
}

fn encode(image: &DynamicImage, format: ThumbnailFormat) -> ThumbnailResult<Vec<u8>> {
    match format {
        ThumbnailFormat::Png => encode_png(image),
        ThumbnailFormat::WebP => encode_webp(image),
    }
}

fn encode_png(image: &DynamicImage) -> ThumbnailResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilter::Adaptive);
    image
        .write_with_encoder(encoder)
        .map_err(|err| ThumbnailError::Encode {
            format: ThumbnailFormat::Png,
            reason: err.to_string(),
        })?;
    Ok(buffer)
}

fn webp_config() -> ThumbnailResult<WebPConfig> {
    let mut config = WebPConfig::new().map_err(|_| ThumbnailError::Encode {
        format: ThumbnailFormat::WebP,
        reason: "cannot initialize encoder config".into(),
    })?;
    config.lossless = 0;
    config.quality = WEBP_QUALITY;
    config.method = WEBP_METHOD;
    Ok(config)
}

fn encode_webp(image: &DynamicImage) -> ThumbnailResult<Vec<u8>> {
    let config = webp_config()?;
    let rgba = image.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder
        .encode_advanced(&config)
        .map_err(|err| ThumbnailError::Encode {
            format: ThumbnailFormat::WebP,
            reason: format!("{:?}", err),
        })?;
    Ok(memory.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode_fixture(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), format)
            .unwrap();
        buffer
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
        encode_fixture(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
    }

    fn translucent_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 120, 220, 128]));
        encode_fixture(DynamicImage::ImageRgba8(img), ImageFormat::Png)
    }

    fn decoded(bytes: &[u8], expected: ImageFormat) -> DynamicImage {
        assert_eq!(image::guess_format(bytes).unwrap(), expected);
        image::load_from_memory_with_format(bytes, expected).unwrap()
    }

    #[test]
    fn png_output_fits_bound_and_keeps_aspect_ratio() {
        let out = generate(&jpeg(1000, 500), 80, ThumbnailFormat::Png, &DecodeLimits::default())
            .unwrap();
        let thumb = decoded(&out, ImageFormat::Png);
        assert_eq!(thumb.dimensions(), (80, 40));
    }

    #[test]
    fn webp_output_fits_bound() {
        let out = generate(
            &jpeg(300, 900),
            180,
            ThumbnailFormat::WebP,
            &DecodeLimits::default(),
        )
        .unwrap();
        let thumb = decoded(&out, ImageFormat::WebP);
        assert_eq!(thumb.dimensions(), (60, 180));
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let raw = jpeg(1000, 500);
        for format in ThumbnailFormat::ALL {
            let out = generate(&raw, 1024, format, &DecodeLimits::default()).unwrap();
            let expected = match format {
                ThumbnailFormat::Png => ImageFormat::Png,
                ThumbnailFormat::WebP => ImageFormat::WebP,
            };
            assert_eq!(decoded(&out, expected).dimensions(), (1000, 500));
        }
    }

    #[test]
    fn png_output_preserves_transparency() {
        let out = generate(
            &translucent_png(64, 64),
            32,
            ThumbnailFormat::Png,
            &DecodeLimits::default(),
        )
        .unwrap();
        let thumb = decoded(&out, ImageFormat::Png).to_rgba8();
        assert_eq!(thumb.dimensions(), (32, 32));
        let alpha = thumb.get_pixel(16, 16)[3];
        assert!((120..=136).contains(&alpha), "alpha was {}", alpha);
    }

    #[test]
    fn transparent_color_does_not_bleed_into_edges() {
        let img = RgbaImage::from_fn(200, 100, |x, _| {
            if x < 100 {
                Rgba([255, 0, 0, 0])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let out = generate(
            &encode_fixture(DynamicImage::ImageRgba8(img), ImageFormat::Png),
            20,
            ThumbnailFormat::Png,
            &DecodeLimits::default(),
        )
        .unwrap();
        let thumb = decoded(&out, ImageFormat::Png).to_rgba8();
        assert_eq!(thumb.dimensions(), (20, 10));

        for (x, y, pixel) in thumb.enumerate_pixels() {
            if pixel[3] > 0 {
                assert!(pixel[0] <= 2, "red fringe at ({}, {}): {:?}", x, y, pixel);
                assert!(pixel[2] >= 240, "blue lost at ({}, {}): {:?}", x, y, pixel);
            }
        }
    }

    #[test]
    fn opaque_images_take_the_straight_path() {
        let opaque = decode(&jpeg(4, 4), &DecodeLimits::default()).unwrap();
        assert!(is_opaque(&opaque));
        let translucent = decode(&translucent_png(4, 4), &DecodeLimits::default()).unwrap();
        assert!(!is_opaque(&translucent));
    }

    #[test]
    fn webp_uses_fixed_quality_at_maximum_effort() {
        let config = webp_config().unwrap();
        assert_eq!(config.method, 6);
        assert_eq!(config.quality, WEBP_QUALITY);
        assert_eq!(config.lossless, 0);
    }

    #[test]
    fn opaque_sources_gain_an_alpha_channel() {
        let image = decode(&jpeg(10, 10), &DecodeLimits::default()).unwrap();
        assert!(image.color().has_alpha());
    }

    #[test]
    fn unsupported_format_fails_before_decoding() {
        // Garbage bytes would fail to decode; the format check must win.
        let err = generate_named(b"not an image", 80, "gif", &DecodeLimits::default())
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::UnsupportedFormat(_)));
    }

    #[test]
    fn named_format_is_case_insensitive() {
        let out = generate_named(&jpeg(40, 20), 80, "PNG", &DecodeLimits::default()).unwrap();
        assert_eq!(decoded(&out, ImageFormat::Png).dimensions(), (40, 20));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = generate(
            b"definitely not pixels",
            80,
            ThumbnailFormat::Png,
            &DecodeLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode(_)));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let err = generate(&jpeg(10, 10), 0, ThumbnailFormat::Png, &DecodeLimits::default())
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::InvalidDimension));
    }

    #[test]
    fn oversized_sources_hit_decode_limits() {
        let limits = DecodeLimits {
            max_side: 100,
            ..DecodeLimits::default()
        };
        let err = generate(&jpeg(200, 50), 80, ThumbnailFormat::Png, &limits).unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode(_)));
    }
}
