use crate::models::ImageQualityMetrics;
use crate::utils::IdRiskError;
use image::{GrayImage, Luma, RgbImage};
use log::debug;

/// Laplacian variance at or above this maps to full sharpness.
const SHARPNESS_VARIANCE_CEILING: f64 = 1000.0;

/// Luminance at or above this counts as a glare pixel.
const GLARE_LUMA: u8 = 250;

/// Computes blur and glare signals from raw document image bytes.
pub struct ImageQualityAnalyzer;

impl ImageQualityAnalyzer {
    /// Decode once and compute both metrics.
    pub fn analyze(image_bytes: &[u8]) -> Result<ImageQualityMetrics, IdRiskError> {
        let gray = Self::decode_luma(image_bytes)?;
        let metrics = ImageQualityMetrics {
            blur: Self::sharpness_of(&gray),
            glare: Self::glare_of(&gray),
        };
        debug!(
            "Image {}x{}: sharpness={:.4} glare={:.4}",
            gray.width(),
            gray.height(),
            metrics.blur,
            metrics.glare
        );
        Ok(metrics)
    }

    /// Sharpness in [0, 1]: variance of the Laplacian scaled from [0, 1000].
    pub fn blur(image_bytes: &[u8]) -> Result<f64, IdRiskError> {
        Ok(Self::sharpness_of(&Self::decode_luma(image_bytes)?))
    }

    /// Fraction of near-saturated pixels, in [0, 1].
    pub fn glare(image_bytes: &[u8]) -> Result<f64, IdRiskError> {
        Ok(Self::glare_of(&Self::decode_luma(image_bytes)?))
    }

    fn decode_luma(image_bytes: &[u8]) -> Result<GrayImage, IdRiskError> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| IdRiskError::ImageDecodeError(format!("Failed to load image: {}", e)))?;
        Ok(Self::luma_of(&img.to_rgb8()))
    }

    /// ITU-R 601 luma (`0.299 R + 0.587 G + 0.114 B`), rounded.
    pub fn luma_of(rgb: &RgbImage) -> GrayImage {
        GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            let weighted = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
            Luma([((weighted + 500) / 1000) as u8])
        })
    }

    pub fn sharpness_of(gray: &GrayImage) -> f64 {
        let variance = Self::laplacian_variance(gray);
        (variance / SHARPNESS_VARIANCE_CEILING).clamp(0.0, 1.0)
    }

    pub fn glare_of(gray: &GrayImage) -> f64 {
        let total = gray.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let bright = gray.as_raw().iter().filter(|v| **v >= GLARE_LUMA).count();
        bright as f64 / total as f64
    }

    /// Population variance of the image convolved with the 4-neighbour
    /// Laplacian `[[0,1,0],[1,-4,1],[0,1,0]]`, reflect-padded at the borders.
    fn laplacian_variance(gray: &GrayImage) -> f64 {
        let (width, height) = gray.dimensions();
        let (w, h) = (width as i64, height as i64);
        if w == 0 || h == 0 {
            return 0.0;
        }

        let px = |x: i64, y: i64| -> f64 {
            let x = reflect(x, w);
            let y = reflect(y, h);
            f64::from(gray.get_pixel(x as u32, y as u32).0[0])
        };

        let count = (w * h) as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for y in 0..h {
            for x in 0..w {
                let lap = px(x, y - 1) + px(x - 1, y) + px(x + 1, y) + px(x, y + 1) - 4.0 * px(x, y);
                sum += lap;
                sum_sq += lap * lap;
            }
        }
        let mean = sum / count;
        (sum_sq / count - mean * mean).max(0.0)
    }
}

/// Mirror an index into `0..len` without repeating the edge sample
/// (`-1 -> 1`, `len -> len - 2`).
fn reflect(i: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let mut i = i.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i
}
