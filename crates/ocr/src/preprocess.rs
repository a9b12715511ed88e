use boleta_core::EnhanceConfig;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::filters::{clahe, non_local_means};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// Decode uploaded bytes (JPEG / PNG / TIFF / WEBP / …).
pub fn decode(data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    image::load_from_memory(data).map_err(PreprocessError::Decode)
}

/// Decode, enhance and re-encode as PNG ready for an OCR engine.
pub fn prepare_for_ocr_from_bytes(
    data: &[u8],
    config: &EnhanceConfig,
) -> Result<Vec<u8>, PreprocessError> {
    let img = decode(data)?;
    encode_png(&enhance(&img, config))
}

/// Turn a receipt photo into a clean single-channel image for OCR.
///
/// Steps, always in this order: RGB normalization, bicubic upscale to
/// `target_height`, grayscale, non-local-means denoise, CLAHE, light
/// Gaussian blur, Otsu binarization, opening + closing, unsharp mask.
/// No rotation or deskew is attempted.
#[instrument(skip_all, fields(width = img.width(), height = img.height()))]
pub fn enhance(img: &DynamicImage, config: &EnhanceConfig) -> GrayImage {
    let rgb = upscale_to_height(img.to_rgb8(), config.target_height);
    debug!(width = rgb.width(), height = rgb.height(), "upscaled");

    let gray = DynamicImage::ImageRgb8(rgb).to_luma8();
    let gray = non_local_means(
        &gray,
        config.denoise_strength,
        config.template_window,
        config.search_window,
    );
    debug!("denoised");

    let gray = clahe(&gray, config.clahe_clip_limit, config.clahe_tiles);
    let gray = blur(&gray, config.preblur_sigma);

    let binary = binarize_otsu(&gray);
    let binary = open(&binary, Norm::LInf, config.morph_radius);
    let binary = close(&binary, Norm::LInf, config.morph_radius);

    unsharp_mask(&binary, config.unsharp_sigma, config.unsharp_strength)
}

/// Bicubic upscale so the height reaches `target_height`, keeping the aspect
/// ratio. Images that are already tall enough are returned untouched.
fn upscale_to_height(rgb: RgbImage, target_height: u32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    if h == 0 || h >= target_height {
        return rgb;
    }
    let scale = target_height as f64 / h as f64;
    let new_w = ((w as f64 * scale) as u32).max(1);
    image::imageops::resize(&rgb, new_w, target_height, FilterType::CatmullRom)
}

fn blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma > 0.0 {
        gaussian_blur_f32(gray, sigma)
    } else {
        gray.clone()
    }
}

/// Global threshold at the Otsu level: pixels above it become 255, the rest 0.
fn binarize_otsu(gray: &GrayImage) -> GrayImage {
    let level = imageproc::contrast::otsu_level(gray);
    debug!(level, "otsu threshold");
    let mut binary = gray.clone();
    for p in binary.pixels_mut() {
        p[0] = if p[0] > level { 255 } else { 0 };
    }
    binary
}

/// `(1 + strength) · image − strength · blur(image)`, saturated to `0..=255`.
fn unsharp_mask(gray: &GrayImage, sigma: f32, strength: f32) -> GrayImage {
    if strength == 0.0 {
        return gray.clone();
    }
    let blurred = blur(gray, sigma);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let orig = gray.get_pixel(x, y)[0] as f32;
        let soft = blurred.get_pixel(x, y)[0] as f32;
        let v = (1.0 + strength) * orig - strength * soft;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small_config(target_height: u32) -> EnhanceConfig {
        EnhanceConfig {
            target_height,
            ..EnhanceConfig::default()
        }
    }

    /// Dark "text" strokes on a light, unevenly lit background.
    fn receipt_like(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let stroke = y % 6 < 2 && x % 5 != 0;
            let base = 170 + (x * 60 / width.max(1)) as u8;
            if stroke {
                Rgb([30, 30, 35])
            } else {
                Rgb([base, base, base - 10])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn short_images_are_upscaled_to_target() {
        let out = enhance(&receipt_like(40, 16), &small_config(64));
        assert_eq!(out.height(), 64);
        assert_eq!(out.width(), 160);
    }

    #[test]
    fn tall_images_keep_their_size() {
        let out = enhance(&receipt_like(30, 100), &small_config(50));
        assert_eq!(out.dimensions(), (30, 100));
    }

    #[test]
    fn output_covers_input_and_target() {
        for (w, h, target) in [(17, 9, 40), (25, 60, 40), (8, 40, 40)] {
            let out = enhance(&receipt_like(w, h), &small_config(target));
            assert!(out.height() >= h.max(target), "{w}x{h} -> {:?}", out.dimensions());
            assert!(out.width() >= w);
        }
    }

    #[test]
    fn accepts_any_color_mode() {
        let rgba = image::RgbaImage::from_pixel(10, 10, image::Rgba([9, 9, 9, 0]));
        let luma16 = image::ImageBuffer::from_pixel(10, 10, Luma([40000u16]));
        let rgba = DynamicImage::ImageRgba8(rgba);
        let luma16 = DynamicImage::ImageLuma16(luma16);
        for img in [rgba, luma16] {
            let out = enhance(&img, &small_config(24));
            assert_eq!(out.height(), 24);
        }
    }

    #[test]
    fn otsu_output_is_strictly_two_valued() {
        let gray = GrayImage::from_fn(32, 32, |x, y| Luma([((x * 5 + y * 3) % 256) as u8]));
        let binary = binarize_otsu(&gray);
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn otsu_separates_bimodal_image() {
        let gray = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 40 } else { 210 }]));
        let binary = binarize_otsu(&gray);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(19, 0)[0], 255);
    }

    #[test]
    fn minimal_morphology_is_identity() {
        let binary = GrayImage::from_fn(16, 16, |x, y| {
            Luma([if (x + y) % 3 == 0 { 255 } else { 0 }])
        });
        let opened = open(&binary, Norm::LInf, 0);
        assert_eq!(close(&opened, Norm::LInf, 0), binary);
    }

    #[test]
    fn unsharp_saturates_instead_of_wrapping() {
        let step = GrayImage::from_fn(16, 4, |x, _| Luma([if x < 8 { 0 } else { 255 }]));
        let out = unsharp_mask(&step, 1.0, 1.0);
        // Overshoot on both sides of the edge must clamp, not wrap around.
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert_eq!(out.get_pixel(7, 0)[0], 0);
        assert_eq!(out.get_pixel(8, 0)[0], 255);
    }

    #[test]
    fn unsharp_keeps_flat_regions() {
        let flat = GrayImage::from_pixel(10, 10, Luma([120]));
        let out = unsharp_mask(&flat, 1.0, 1.5);
        assert!(out.pixels().all(|p| p[0].abs_diff(120) <= 2));
    }

    #[test]
    fn enhancement_is_deterministic() {
        let img = receipt_like(30, 12);
        let config = small_config(36);
        assert_eq!(enhance(&img, &config), enhance(&img, &config));
    }

    #[test]
    fn decode_rejects_non_images() {
        assert!(matches!(
            decode(b"definitely not an image"),
            Err(PreprocessError::Decode(_))
        ));
        assert!(matches!(decode(&[]), Err(PreprocessError::Decode(_))));
    }

    #[test]
    fn prepare_from_bytes_produces_png_header() {
        let bytes = png_bytes(&receipt_like(12, 8));
        let result = prepare_for_ocr_from_bytes(&bytes, &small_config(16)).unwrap();
        // PNG magic bytes: 0x89 0x50 0x4E 0x47
        assert_eq!(&result[..4], b"\x89PNG");
        let round_trip = decode(&result).unwrap();
        assert_eq!(round_trip.height(), 16);
    }
}
