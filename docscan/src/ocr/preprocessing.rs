use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Rgba, RgbaImage};
use tracing::{debug, warn};

use super::types::{NormalizedImage, ProcessingOptions, RawImage};
use crate::error::{Result, ScanError};

/// Result of running the preprocessing pipeline.
///
/// `degraded` carries the reason when the pipeline could not run and the
/// original image was passed through instead.
#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    pub image: NormalizedImage,
    pub original_dimensions: Option<(u32, u32)>,
    pub degraded: Option<String>,
}

/// Preprocess raw image bytes for recognition.
///
/// Steps run in a fixed order, each toggled by `options`:
/// 1. Resize down to fit `max_width` x `max_height` (never upscales)
/// 2. Grayscale (ITU-R 601 luma, alpha untouched)
/// 3. Linear contrast around mid-gray
/// 4. Otsu binarization
/// 5. 3x3 sharpen on interior pixels
///
/// Never fails. If the pipeline errors the original image is re-encoded as
/// PNG; if it cannot even be decoded the original bytes are returned as-is.
pub fn preprocess_image(raw: &RawImage, options: &ProcessingOptions) -> PreprocessOutput {
    let decoded = match decode(raw) {
        Ok(img) => img,
        Err(e) => return passthrough(raw, e),
    };

    let original_dimensions = decoded.dimensions();
    let rgba = decoded.to_rgba8();

    let processed = run_pipeline(&rgba, options)
        .and_then(|out| encode_png(&out, options.grayscale).map(|bytes| (bytes, out.dimensions())));

    match processed {
        Ok((bytes, (width, height))) => {
            debug!(
                from = ?original_dimensions,
                to = ?(width, height),
                "Image preprocessed"
            );
            PreprocessOutput {
                image: NormalizedImage::new(bytes, width, height),
                original_dimensions: Some(original_dimensions),
                degraded: None,
            }
        }
        Err(e) => {
            warn!("Preprocessing failed, using original image: {}", e);
            reencoded_original(raw, &rgba, original_dimensions, e)
        }
    }
}

/// Decode and re-encode without applying any transform.
///
/// Used when the orchestration pipeline is switched off.
pub fn reencode_image(raw: &RawImage) -> PreprocessOutput {
    let decoded = match decode(raw) {
        Ok(img) => img,
        Err(e) => return passthrough(raw, e),
    };

    let dimensions = decoded.dimensions();
    let rgba = decoded.to_rgba8();
    match encode_png(&rgba, false) {
        Ok(bytes) => PreprocessOutput {
            image: NormalizedImage::new(bytes, dimensions.0, dimensions.1),
            original_dimensions: Some(dimensions),
            degraded: None,
        },
        Err(e) => passthrough(raw, e),
    }
}

fn run_pipeline(img: &RgbaImage, options: &ProcessingOptions) -> Result<RgbaImage> {
    if options.max_width == 0 || options.max_height == 0 {
        return Err(ScanError::PreprocessingDegraded(format!(
            "Invalid size bound {}x{}",
            options.max_width, options.max_height
        )));
    }
    if !options.contrast.is_finite() || options.contrast < 0.0 {
        return Err(ScanError::PreprocessingDegraded(format!(
            "Invalid contrast factor {}",
            options.contrast
        )));
    }

    let mut out = resize_to_fit(img, options.max_width, options.max_height);
    if options.grayscale {
        out = grayscale(&out);
    }
    if (options.contrast - 1.0).abs() > f32::EPSILON {
        out = adjust_contrast(&out, options.contrast);
    }
    if options.binarize {
        out = binarize(&out);
    }
    if options.sharpen {
        out = sharpen(&out);
    }
    Ok(out)
}

fn decode(raw: &RawImage) -> Result<DynamicImage> {
    if raw.bytes.is_empty() {
        return Err(ScanError::PreprocessingDegraded("Empty image buffer".to_string()));
    }

    let mut reader = ImageReader::new(Cursor::new(&raw.bytes));
    if let Some(format) = raw.mime_type.as_deref().and_then(ImageFormat::from_mime_type) {
        reader.set_format(format);
    }

    // Content sniffing wins over a wrong declared MIME type.
    let reader = reader
        .with_guessed_format()
        .map_err(|e| ScanError::PreprocessingDegraded(format!("Failed to read image: {e}")))?;

    reader
        .decode()
        .map_err(|e| ScanError::PreprocessingDegraded(format!("Failed to decode image: {e}")))
}

fn passthrough(raw: &RawImage, cause: ScanError) -> PreprocessOutput {
    warn!("Image could not be decoded, passing original bytes through: {}", cause);
    let (width, height) = raw.declared_dimensions.unwrap_or((0, 0));
    PreprocessOutput {
        image: NormalizedImage::new(raw.bytes.clone(), width, height),
        original_dimensions: raw.declared_dimensions,
        degraded: Some(cause.to_string()),
    }
}

fn reencoded_original(
    raw: &RawImage,
    rgba: &RgbaImage,
    dimensions: (u32, u32),
    cause: ScanError,
) -> PreprocessOutput {
    match encode_png(rgba, false) {
        Ok(bytes) => PreprocessOutput {
            image: NormalizedImage::new(bytes, dimensions.0, dimensions.1),
            original_dimensions: Some(dimensions),
            degraded: Some(cause.to_string()),
        },
        Err(e) => passthrough(raw, e),
    }
}

/// Encode losslessly, dropping channels the image does not need.
fn encode_png(img: &RgbaImage, grayscale: bool) -> Result<Vec<u8>> {
    let opaque = img.pixels().all(|p| p[3] == u8::MAX);
    let dynamic = DynamicImage::ImageRgba8(img.clone());
    let dynamic = match (opaque, grayscale) {
        (true, true) => DynamicImage::ImageLuma8(dynamic.to_luma8()),
        (true, false) => DynamicImage::ImageRgb8(dynamic.to_rgb8()),
        (false, _) => dynamic,
    };

    let mut output = Vec::new();
    dynamic
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| ScanError::PreprocessingDegraded(format!("Failed to encode image: {e}")))?;
    Ok(output)
}

/// Target size for fitting `width` x `height` inside the bound, aspect preserved.
pub(crate) fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let ratio = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_width = ((width as f64 * ratio).round() as u32).clamp(1, max_width);
    let new_height = ((height as f64 * ratio).round() as u32).clamp(1, max_height);
    (new_width, new_height)
}

pub fn resize_to_fit(img: &RgbaImage, max_width: u32, max_height: u32) -> RgbaImage {
    let (width, height) = img.dimensions();
    let (new_width, new_height) = fit_within(width, height, max_width, max_height);
    if (new_width, new_height) == (width, height) {
        return img.clone();
    }

    // Lanczos3 keeps thin strokes legible when shrinking
    image::imageops::resize(img, new_width, new_height, FilterType::Lanczos3)
}

fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

fn map_pixels(img: &RgbaImage, f: impl Fn(Rgba<u8>) -> Rgba<u8>) -> RgbaImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        *pixel = f(*pixel);
    }
    out
}

pub fn grayscale(img: &RgbaImage) -> RgbaImage {
    map_pixels(img, |Rgba([r, g, b, a])| {
        let l = luminance(r, g, b);
        Rgba([l, l, l, a])
    })
}

pub fn adjust_contrast(img: &RgbaImage, factor: f32) -> RgbaImage {
    let offset = 128.0 * (1.0 - factor);
    let adjust = |c: u8| (c as f32 * factor + offset).round().clamp(0.0, 255.0) as u8;
    map_pixels(img, |Rgba([r, g, b, a])| Rgba([adjust(r), adjust(g), adjust(b), a]))
}

/// Otsu threshold: the level maximizing between-class variance.
pub fn otsu_threshold(histogram: &[u64; 256]) -> u8 {
    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0.0f64;
    let mut best_threshold = 0u8;
    let mut best_variance = -1.0f64;

    for (level, &count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += level as f64 * count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight as f64;
        let variance = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best_threshold = level as u8;
        }
    }

    best_threshold
}

pub fn binarize(img: &RgbaImage) -> RgbaImage {
    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[luminance(pixel[0], pixel[1], pixel[2]) as usize] += 1;
    }
    let threshold = otsu_threshold(&histogram);

    map_pixels(img, |Rgba([r, g, b, a])| {
        let v = if luminance(r, g, b) > threshold { 255 } else { 0 };
        Rgba([v, v, v, a])
    })
}

/// Sharpen with `[[0,-1,0],[-1,5,-1],[0,-1,0]]`; border pixels are copied.
pub fn sharpen(img: &RgbaImage) -> RgbaImage {
    let (width, height) = img.dimensions();
    let mut out = img.clone();
    if width < 3 || height < 3 {
        return out;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = img.get_pixel(x, y);
            let left = img.get_pixel(x - 1, y);
            let right = img.get_pixel(x + 1, y);
            let up = img.get_pixel(x, y - 1);
            let down = img.get_pixel(x, y + 1);

            let mut sharpened = *center;
            for c in 0..3 {
                let v = 5 * center[c] as i32
                    - left[c] as i32
                    - right[c] as i32
                    - up[c] as i32
                    - down[c] as i32;
                sharpened[c] = v.clamp(0, 255) as u8;
            }
            out.put_pixel(x, y, sharpened);
        }
    }
    out
}
