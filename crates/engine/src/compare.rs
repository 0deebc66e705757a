//! Pixel difference engine

use image::{Pixel, Rgba, RgbaImage};
use tracing::debug;

const HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Pixels sampled by [`quick_equal`] along each axis
const QUICK_SAMPLES_PER_AXIS: u32 = 32;

/// Outcome of comparing two images
#[derive(Debug, Clone)]
pub struct ImageComparison {
    /// Fraction of differing pixels over all compared pixels, in `[0, 1]`
    pub difference: f64,

    /// Largest channel distance seen on any pixel
    pub max_single_color_difference: u32,

    /// Highlighted differences on top of the dimmed after-image, present
    /// only when at least one pixel differs
    pub diff_image: Option<RgbaImage>,
}

impl ImageComparison {
    /// "No comparison possible"
    pub fn sentinel() -> Self {
        Self {
            difference: 1.0,
            max_single_color_difference: 0,
            diff_image: None,
        }
    }

    pub fn identical() -> Self {
        Self {
            difference: 0.0,
            max_single_color_difference: 0,
            diff_image: None,
        }
    }
}

/// Largest absolute difference over the RGBA channels
pub fn color_distance(a: &Rgba<u8>, b: &Rgba<u8>) -> u32 {
    a.channels()
        .iter()
        .zip(b.channels())
        .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs())
        .max()
        .unwrap_or(0)
}

/// Compare two images.
///
/// A pixel differs when its color distance exceeds `max_color_diff_per_pixel`.
/// Images of different size are compared on a canvas spanning both; pixels
/// covered by only one of them always count as different. Never fails.
pub fn compare_images(
    before: Option<&RgbaImage>,
    after: Option<&RgbaImage>,
    max_color_diff_per_pixel: u32,
) -> ImageComparison {
    let (before, after) = match (before, after) {
        (Some(b), Some(a)) => (b, a),
        _ => return ImageComparison::sentinel(),
    };

    let width = before.width().max(after.width());
    let height = before.height().max(after.height());
    let total_pixels = width as u64 * height as u64;
    if total_pixels == 0 {
        return ImageComparison::identical();
    }

    if before.dimensions() != after.dimensions() {
        debug!(
            "Comparing images of different size: before {:?} vs after {:?}",
            before.dimensions(),
            after.dimensions()
        );
    }

    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;
    let mut max_single_color_difference = 0u32;

    for y in 0..height {
        for x in 0..width {
            let b = pixel_at(before, x, y);
            let a = pixel_at(after, x, y);

            let distance = match (b, a) {
                (Some(b), Some(a)) => color_distance(b, a),
                _ => 255,
            };
            max_single_color_difference = max_single_color_difference.max(distance);

            if distance > max_color_diff_per_pixel {
                diff_pixels += 1;
                diff_img.put_pixel(x, y, HIGHLIGHT);
            } else if let Some(a) = a {
                let c = a.channels();
                diff_img.put_pixel(x, y, Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
            }
        }
    }

    ImageComparison {
        difference: diff_pixels as f64 / total_pixels as f64,
        max_single_color_difference,
        diff_image: (diff_pixels > 0).then_some(diff_img),
    }
}

fn pixel_at(img: &RgbaImage, x: u32, y: u32) -> Option<&Rgba<u8>> {
    (x < img.width() && y < img.height()).then(|| img.get_pixel(x, y))
}

/// Cheap equality check on a sparse grid of pixels, used while waiting for
/// animations to stop
pub fn quick_equal(a: &RgbaImage, b: &RgbaImage) -> bool {
    if a.dimensions() != b.dimensions() {
        return false;
    }
    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        return true;
    }

    let step_x = (width / QUICK_SAMPLES_PER_AXIS).max(1);
    let step_y = (height / QUICK_SAMPLES_PER_AXIS).max(1);

    (0..height)
        .step_by(step_y as usize)
        .all(|y| (0..width).step_by(step_x as usize).all(|x| a.get_pixel(x, y) == b.get_pixel(x, y)))
}
