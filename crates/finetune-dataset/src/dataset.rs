//! Labeled examples built from one class directory.
//!
//! A [`ClassDataset`] keeps the decoded 8-bit images and computes each
//! normalized example on first access, caching it so later epochs reuse it.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use burn::data::dataset::{transform::ComposedDataset, Dataset};
use finetune_core::{AugmentationConfig, Error, Result, IMAGE_SIZE, NUM_CLASSES};
use image::RgbImage;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::augmentation::Augmenter;
use crate::loader::ImageLoader;

/// A normalized image with its class label
#[derive(Clone)]
pub struct LabeledExample {
    /// Pixels in [-1, 1], channel-first `[3, H, W]`
    pub image: Vec<f32>,
    /// Class index
    pub label: usize,
    /// One-hot encoding of `label`
    pub one_hot: Vec<f32>,
    /// Side length of the image
    pub image_size: usize,
}

impl fmt::Debug for LabeledExample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabeledExample")
            .field("image", &format!("[{} floats]", self.image.len()))
            .field("label", &self.label)
            .field("one_hot", &self.one_hot)
            .finish()
    }
}

impl LabeledExample {
    /// Normalizes an 8-bit image and one-hot encodes its label.
    pub fn from_image(img: &RgbImage, label: usize, num_classes: usize) -> Result<Self> {
        let (width, height) = img.dimensions();
        if width != height {
            return Err(Error::Shape(format!(
                "expected a square image, got {width}x{height}"
            )));
        }
        Ok(Self::with_one_hot(img, label, one_hot(label, num_classes)?))
    }

    /// Normalizes `img` and attaches an already-encoded label.
    fn with_one_hot(img: &RgbImage, label: usize, one_hot: Vec<f32>) -> Self {
        Self {
            image: normalize_chw(img),
            label,
            one_hot,
            image_size: img.width() as usize,
        }
    }
}

/// Maps `[0, 255]` to `[-1, 1)` with `v / 128 - 1`.
pub fn normalize_pixel(value: u8) -> f32 {
    value as f32 / 128.0 - 1.0
}

/// Converts an HWC RGB image into normalized channel-first floats.
pub fn normalize_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = normalize_pixel(pixel[c]);
        }
    }

    data
}

/// A vector of `num_classes` zeros with a single 1 at `label`.
pub fn one_hot(label: usize, num_classes: usize) -> Result<Vec<f32>> {
    if label >= num_classes {
        return Err(Error::InvalidArgument(format!(
            "label {label} out of range for {num_classes} classes"
        )));
    }
    let mut encoded = vec![0.0; num_classes];
    encoded[label] = 1.0;
    Ok(encoded)
}

/// Settings shared by every class directory of a run
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub image_size: usize,
    pub num_classes: usize,
    pub augmentation: AugmentationConfig,
    /// Seed of the augmentation RNG
    pub seed: u64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            num_classes: NUM_CLASSES,
            augmentation: AugmentationConfig::default(),
            seed: 42,
        }
    }
}

/// All images of one directory, sharing one label
pub struct ClassDataset {
    images: Vec<RgbImage>,
    label: usize,
    one_hot: Vec<f32>,
    cache: Vec<OnceLock<LabeledExample>>,
}

impl fmt::Debug for ClassDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDataset")
            .field("len", &self.images.len())
            .field("label", &self.label)
            .field("num_classes", &self.one_hot.len())
            .finish()
    }
}

impl ClassDataset {
    /// Wraps already-loaded images. Fails if `label` is not a valid class.
    pub fn new(images: Vec<RgbImage>, label: usize, num_classes: usize) -> Result<Self> {
        let one_hot = one_hot(label, num_classes)?;
        let cache = (0..images.len()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            images,
            label,
            one_hot,
            cache,
        })
    }

    pub fn label(&self) -> usize {
        self.label
    }

    /// Number of examples whose normalized form has been computed
    pub fn cached(&self) -> usize {
        self.cache.iter().filter(|slot| slot.get().is_some()).count()
    }
}

impl Dataset<LabeledExample> for ClassDataset {
    fn get(&self, index: usize) -> Option<LabeledExample> {
        let img = self.images.get(index)?;
        let example = self.cache[index]
            .get_or_init(|| LabeledExample::with_one_hot(img, self.label, self.one_hot.clone()));
        Some(example.clone())
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// Several class datasets concatenated into one training or evaluation set
pub type ExampleDataset = ComposedDataset<ClassDataset>;

/// Concatenates class datasets in the given order.
pub fn merge_classes(classes: Vec<ClassDataset>) -> ExampleDataset {
    ComposedDataset::new(classes)
}

/// Per-directory augmentation seed, stable across runs.
///
/// FNV-1a over the directory path, so two sources sharing a label still
/// draw different augmentation sequences.
fn source_seed(seed: u64, dir: &Path, label: usize) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = dir
        .as_os_str()
        .as_encoded_bytes()
        .iter()
        .fold(FNV_OFFSET, |hash, &byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME));
    seed ^ hash.wrapping_add(label as u64)
}

/// Loads `dir` and labels every image with `label`.
///
/// No shuffling or batching happens here; that is left to the data loader.
pub fn build_dataset(
    dir: &Path,
    label: usize,
    augment: bool,
    options: &BuildOptions,
) -> Result<ClassDataset> {
    // reject a bad label before decoding the whole directory
    one_hot(label, options.num_classes)?;

    let loader = ImageLoader::new(options.image_size as u32);
    let augmenter = augment.then(|| Augmenter::new(options.augmentation.clone()));
    let mut rng = ChaCha8Rng::seed_from_u64(source_seed(options.seed, dir, label));

    let mut images = Vec::new();
    loader.load_into(dir, &mut images, augmenter.as_ref(), &mut rng)?;

    info!(
        "Built dataset from {}: {} images, label {}{}",
        dir.display(),
        images.len(),
        label,
        if augment { " (augmented)" } else { "" }
    );

    ClassDataset::new(images, label, options.num_classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(path: &Path) {
        let img = ImageBuffer::from_fn(256, 256, |x, y| {
            Rgb([x as u8, y as u8, ((x + y) % 256) as u8])
        });
        img.save(path).unwrap();
    }

    fn class_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("leaf_1.png"));
        create_test_image(&temp_dir.path().join("leaf_2.png"));
        temp_dir
    }

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_pixel(0), -1.0);
        assert_eq!(normalize_pixel(128), 0.0);
        assert!((normalize_pixel(255) - 0.9921875).abs() < 1e-7);
    }

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(2, 4).unwrap(), vec![0.0, 0.0, 1.0, 0.0]);
        assert!(matches!(one_hot(4, 4), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_normalize_chw_layout() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0, 128, 255]));
        img.put_pixel(1, 0, Rgb([64, 192, 32]));

        let data = normalize_chw(&img);
        assert_eq!(data.len(), 6);
        // red plane, then green, then blue
        assert_eq!(&data[0..2], &[-1.0, -0.5]);
        assert_eq!(&data[2..4], &[0.0, 0.5]);
        assert_eq!(data[5], -0.75);
    }

    #[test]
    fn test_class_directory_scenario() {
        let dir = class_dir();
        let dataset = build_dataset(dir.path(), 0, false, &BuildOptions::default()).unwrap();

        assert_eq!(dataset.len(), 2);
        for i in 0..2 {
            let example = dataset.get(i).unwrap();
            assert_eq!(example.image.len(), 3 * 224 * 224);
            assert_eq!(example.image_size, 224);
            assert!(example.image.iter().all(|v| (-1.0..=1.0).contains(v)));
            assert_eq!(example.one_hot, vec![1.0, 0.0, 0.0, 0.0]);
            assert_eq!(example.one_hot.iter().sum::<f32>(), 1.0);
        }
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn test_build_is_idempotent_without_augmentation() {
        let dir = class_dir();
        let options = BuildOptions::default();
        let first = build_dataset(dir.path(), 1, false, &options).unwrap();
        let second = build_dataset(dir.path(), 1, false, &options).unwrap();

        for i in 0..first.len() {
            assert_eq!(first.get(i).unwrap().image, second.get(i).unwrap().image);
        }
    }

    #[test]
    fn test_examples_are_cached() {
        let dir = class_dir();
        let dataset = build_dataset(dir.path(), 3, true, &BuildOptions::default()).unwrap();
        assert_eq!(dataset.cached(), 0);

        let first = dataset.get(1).unwrap();
        assert_eq!(dataset.cached(), 1);
        let again = dataset.get(1).unwrap();
        assert_eq!(first.image, again.image);
        assert_eq!(first.one_hot, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_sources_with_same_label_augment_differently() {
        let first = class_dir();
        let second = class_dir();
        let options = BuildOptions::default();

        let a = build_dataset(first.path(), 2, true, &options).unwrap();
        let b = build_dataset(second.path(), 2, true, &options).unwrap();
        assert_ne!(a.get(0).unwrap().image, b.get(0).unwrap().image);

        // same directory and seed reproduce the same augmentation
        let again = build_dataset(first.path(), 2, true, &options).unwrap();
        assert_eq!(a.get(0).unwrap().image, again.get(0).unwrap().image);
    }

    #[test]
    fn test_source_seed_depends_on_directory_and_label() {
        let seed = source_seed(42, Path::new("data/train/rust"), 2);
        assert_eq!(seed, source_seed(42, Path::new("data/train/rust"), 2));
        assert_ne!(seed, source_seed(42, Path::new("data/train/scab"), 2));
        assert_ne!(seed, source_seed(42, Path::new("data/train/rust"), 3));
        assert_ne!(seed, source_seed(7, Path::new("data/train/rust"), 2));
    }

    #[test]
    fn test_invalid_label_rejected() {
        let dir = class_dir();
        let result = build_dataset(dir.path(), 4, false, &BuildOptions::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_cached_example_matches_from_image() {
        let img = ImageBuffer::from_fn(16, 16, |x, y| Rgb([x as u8 * 16, y as u8 * 16, 7]));
        let dataset = ClassDataset::new(vec![img.clone()], 1, 3).unwrap();

        let cached = dataset.get(0).unwrap();
        let direct = LabeledExample::from_image(&img, 1, 3).unwrap();
        assert_eq!(cached.image, direct.image);
        assert_eq!(cached.one_hot, vec![0.0, 1.0, 0.0]);
        assert_eq!(cached.one_hot, direct.one_hot);
        assert_eq!(cached.image_size, 16);

        assert!(matches!(
            ClassDataset::new(vec![img], 3, 3),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_merge_classes() {
        let healthy = ClassDataset::new(vec![RgbImage::new(8, 8); 2], 0, 4).unwrap();
        let rust = ClassDataset::new(vec![RgbImage::new(8, 8); 3], 2, 4).unwrap();

        let merged = merge_classes(vec![healthy, rust]);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.get(1).unwrap().label, 0);
        assert_eq!(merged.get(4).unwrap().label, 2);
        assert!(merged.get(5).is_none());
    }
}
