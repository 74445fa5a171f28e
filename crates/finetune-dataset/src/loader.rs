//! Image loading for one class directory.
//!
//! Every file directly inside the directory (following symlinks) is treated
//! as an image. Sub-directories are skipped and nothing is filtered by
//! extension; the decoder sniffs the format from the file contents.

use std::path::{Path, PathBuf};

use finetune_core::{Error, Result, IMAGE_SIZE};
use image::{imageops::FilterType, ImageReader, RgbImage};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::augmentation::Augmenter;

/// Decodes images and resizes them to a fixed square size
#[derive(Debug, Clone)]
pub struct ImageLoader {
    image_size: u32,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(IMAGE_SIZE as u32)
    }
}

impl ImageLoader {
    pub fn new(image_size: u32) -> Self {
        Self { image_size }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Lists the files directly inside `dir`, sorted by file name.
    ///
    /// Symlinks are followed, so a link to an image counts as an image.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Decodes one file to RGB8 and resizes it (bicubic) to the target size.
    pub fn load_image(&self, path: &Path) -> Result<RgbImage> {
        let img = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| Error::Image(format!("Failed to decode {}: {e}", path.display())))?;

        let img = if img.width() == self.image_size && img.height() == self.image_size {
            img
        } else {
            img.resize_exact(self.image_size, self.image_size, FilterType::CatmullRom)
        };

        Ok(img.to_rgb8())
    }

    /// Loads every image in `dir` and appends it to `images` in listing order.
    ///
    /// With an augmenter, each image is augmented right after decoding. The
    /// first undecodable file aborts the load; images appended before it
    /// stay in `images`.
    pub fn load_into(
        &self,
        dir: &Path,
        images: &mut Vec<RgbImage>,
        augmenter: Option<&Augmenter>,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        let files = self.list_files(dir)?;
        debug!("Loading {} images from {}", files.len(), dir.display());

        images.reserve(files.len());
        for path in files {
            let img = self.load_image(&path)?;
            let img = match augmenter {
                Some(augmenter) => augmenter.augment(img, rng),
                None => img,
            };
            images.push(img);
        }

        Ok(())
    }
}

/// Loads a class directory at the default 224x224 resolution.
pub fn load_images(
    dir: &Path,
    images: &mut Vec<RgbImage>,
    augmenter: Option<&Augmenter>,
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    ImageLoader::default().load_into(dir, images, augmenter, rng)
}
