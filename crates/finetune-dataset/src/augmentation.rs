//! Random photometric and geometric augmentation.
//!
//! Applied while loading training images, in a fixed order: horizontal flip,
//! brightness shift, contrast scaling. Every operation saturates to the
//! 8-bit range.

use finetune_core::AugmentationConfig;
use image::{ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Image augmenter that applies random transformations
#[derive(Clone, Debug, Default)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Apply flip, brightness and contrast with freshly sampled parameters.
    pub fn augment(&self, img: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut result = img;

        if rng.gen::<f32>() < self.config.flip_prob {
            result = flip_horizontal(&result);
        }

        let max_delta = self.config.brightness_max_delta;
        if max_delta > 0.0 {
            let delta = rng.gen_range(-max_delta..=max_delta);
            result = adjust_brightness(&result, delta);
        }

        let (lower, upper) = self.config.contrast_range;
        if lower < upper {
            let factor = rng.gen_range(lower..=upper);
            result = adjust_contrast(&result, factor);
        }

        result
    }
}

/// Mirror the image left to right
pub fn flip_horizontal(img: &RgbImage) -> RgbImage {
    image::imageops::flip_horizontal(img)
}

/// Shift every channel by `delta` on the [0, 1] scale
pub fn adjust_brightness(img: &RgbImage, delta: f32) -> RgbImage {
    let shift = delta * 255.0;
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([
            saturate(p[0] as f32 + shift),
            saturate(p[1] as f32 + shift),
            saturate(p[2] as f32 + shift),
        ])
    })
}

/// Scale each channel's distance from that channel's mean by `factor`
pub fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() as f64 * img.height() as f64).max(1.0);
    let mut sums = [0.0f64; 3];
    for pixel in img.pixels() {
        for (sum, value) in sums.iter_mut().zip(pixel.0) {
            *sum += value as f64;
        }
    }
    let means = sums.map(|sum| (sum / count) as f32);

    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([
            saturate((p[0] as f32 - means[0]) * factor + means[0]),
            saturate((p[1] as f32 - means[1]) * factor + means[1]),
            saturate((p[2] as f32 - means[2]) * factor + means[2]),
        ])
    })
}

fn saturate(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image() -> RgbImage {
        ImageBuffer::from_fn(16, 8, |x, y| Rgb([(x * 16) as u8, (y * 32) as u8, 128]))
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let img = create_test_image();
        let flipped = flip_horizontal(&img);
        assert_eq!(flipped.get_pixel(0, 3), img.get_pixel(15, 3));
        assert_eq!(flipped.get_pixel(15, 0), img.get_pixel(0, 0));
    }

    #[test]
    fn test_brightness_saturates() {
        let img = ImageBuffer::from_pixel(4, 4, Rgb([250u8, 10, 128]));

        let brighter = adjust_brightness(&img, 0.2);
        assert_eq!(brighter.get_pixel(0, 0), &Rgb([255, 61, 179]));

        let darker = adjust_brightness(&img, -0.2);
        assert_eq!(darker.get_pixel(0, 0), &Rgb([199, 0, 77]));
    }

    #[test]
    fn test_contrast_keeps_channel_mean() {
        let mut img = ImageBuffer::from_pixel(2, 1, Rgb([100u8, 100, 100]));
        img.put_pixel(1, 0, Rgb([200, 100, 0]));

        let stretched = adjust_contrast(&img, 1.5);
        // means are (150, 100, 50)
        assert_eq!(stretched.get_pixel(0, 0), &Rgb([75, 100, 125]));
        assert_eq!(stretched.get_pixel(1, 0), &Rgb([225, 100, 0]));

        let flat = adjust_contrast(&img, 0.0);
        assert_eq!(flat.get_pixel(0, 0), &Rgb([150, 100, 50]));
    }

    #[test]
    fn test_augment_preserves_size_and_is_seeded() {
        let aug = Augmenter::default();
        let img = create_test_image();

        let mut rng_a = ChaCha8Rng::seed_from_u64(7);
        let mut rng_b = ChaCha8Rng::seed_from_u64(7);
        let a = aug.augment(img.clone(), &mut rng_a);
        let b = aug.augment(img, &mut rng_b);

        assert_eq!(a.dimensions(), (16, 8));
        assert_eq!(a, b);
    }

    #[test]
    fn test_disabled_augmentation_is_identity() {
        let aug = Augmenter::new(AugmentationConfig {
            flip_prob: 0.0,
            brightness_max_delta: 0.0,
            contrast_range: (1.0, 1.0),
        });
        let img = create_test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(aug.augment(img.clone(), &mut rng), img);
    }
}
