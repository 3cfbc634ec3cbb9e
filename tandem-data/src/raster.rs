//! Image datasets.
//!
//! Pixels are sampled on a regular grid; each sample sits at its normalized
//! pixel coordinate with luminance as height.

use crate::error::DataError;
use crate::types::Point;
use glam::Vec3;
use image::RgbImage;
use std::path::Path;
use tracing::debug;

/// Upper bound on samples taken from one image.
pub const MAX_IMAGE_SAMPLES: usize = 16_384;

/// Load grid-sampled pixels from an image file.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_points_from_image(path: &Path) -> Result<Vec<Point>, DataError> {
    let image = image::open(path)?.to_rgb8();
    let points = sample_image(&image, MAX_IMAGE_SAMPLES);
    debug!(
        "Sampled {} pixels from {}x{} image",
        points.len(),
        image.width(),
        image.height()
    );
    Ok(points)
}

/// Sample at most roughly `max_samples` pixels on a uniform grid.
pub fn sample_image(image: &RgbImage, max_samples: usize) -> Vec<Point> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let pixels = width as usize * height as usize;
    let stride = ((pixels as f64 / max_samples.max(1) as f64).sqrt().ceil() as u32).max(1);

    let mut points = Vec::new();
    for y in (0..height).step_by(stride as usize) {
        for x in (0..width).step_by(stride as usize) {
            let [r, g, b] = image.get_pixel(x, y).0;
            let color = Vec3::new(r as f32, g as f32, b as f32) / 255.0;
            let luminance = color.dot(Vec3::new(0.2126, 0.7152, 0.0722));
            let u = x as f32 / width as f32;
            let v = y as f32 / height as f32;
            points.push(Point::new(Vec3::new(u, v, luminance), color));
        }
    }
    points
}
