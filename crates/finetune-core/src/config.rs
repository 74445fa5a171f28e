//! Configuration structures for the fine-tuning pipeline.
//!
//! Every section is defaulted, so a TOML file only needs to list the class
//! directories and whatever it wants to override.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    Error, Result, DEFAULT_DROPOUT_RATE, DEFAULT_LEARNING_RATE, IMAGE_SIZE, NUM_CLASSES,
};

/// Top-level configuration of a fine-tuning run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Data sources and loader settings
    pub data: DataConfig,
    /// Model architecture and pretrained weights
    pub model: ModelConfig,
    /// Optimization settings
    pub training: TrainingParams,
    /// Summary and console logging
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.data.train.is_empty() {
            return Err(Error::Config("no training class directories configured".into()));
        }
        if self.data.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        if self.training.epochs == 0 {
            return Err(Error::Config("epochs must be greater than zero".into()));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.model.dropout_rate) {
            return Err(Error::Config(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.model.dropout_rate
            )));
        }
        for source in self.data.train.iter().chain(self.data.eval.iter()) {
            if source.label >= self.data.num_classes {
                return Err(Error::Config(format!(
                    "label {} of {} is out of range for {} classes",
                    source.label,
                    source.path.display(),
                    self.data.num_classes
                )));
            }
        }
        Ok(())
    }
}

/// One directory of images sharing a single class label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSource {
    /// Directory holding the images (not searched recursively)
    pub path: PathBuf,
    /// Class index assigned to every image in the directory
    pub label: usize,
    /// Apply random augmentation while loading
    #[serde(default)]
    pub augment: bool,
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Side length images are resized to
    pub image_size: usize,
    /// Width of the one-hot label vectors
    pub num_classes: usize,
    /// Examples per training/evaluation step
    pub batch_size: usize,
    /// Seed for the loader shuffle and augmentation RNG
    pub seed: u64,
    /// Data loader worker threads
    pub num_workers: usize,
    /// Augmentation parameters used by sources with `augment = true`
    pub augmentation: AugmentationConfig,
    /// Training class directories
    pub train: Vec<ClassSource>,
    /// Evaluation class directories
    pub eval: Vec<ClassSource>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            num_classes: NUM_CLASSES,
            batch_size: 32,
            seed: 42,
            num_workers: 2,
            augmentation: AugmentationConfig::default(),
            train: Vec::new(),
            eval: Vec::new(),
        }
    }
}

/// Random augmentation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Horizontal flip probability
    pub flip_prob: f32,
    /// Maximum brightness delta on the [0, 1] scale
    pub brightness_max_delta: f32,
    /// Contrast factor range (min, max)
    pub contrast_range: (f32, f32),
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            flip_prob: 0.5,
            brightness_max_delta: 0.2,
            contrast_range: (0.5, 1.5),
        }
    }
}

/// Where the backbone's initial weights come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum WeightSource {
    /// Keep the random initialization
    Random,
    /// Load a record from a local file
    File {
        /// Path to the `.mpk` record
        path: PathBuf,
    },
    /// Download a record from a model registry, keyed by identifier
    Registry {
        /// Well-known model identifier
        identifier: String,
        /// Registry base URL; falls back to `TRANSFER_WEIGHTS_URL`
        #[serde(default)]
        base_url: Option<String>,
        /// Local cache for downloaded records
        #[serde(default = "default_cache_dir")]
        cache_dir: PathBuf,
    },
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/weights")
}

impl Default for WeightSource {
    fn default() -> Self {
        WeightSource::Registry {
            identifier: "resnet50-imagenet".to_string(),
            base_url: None,
            cache_dir: default_cache_dir(),
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Bottleneck blocks per backbone stage
    pub stage_blocks: Vec<usize>,
    /// Width of the backbone stem
    pub base_channels: usize,
    /// Hidden dense widths of the classification head
    pub hidden_units: Vec<usize>,
    /// Dropout probability in the head
    pub dropout_rate: f64,
    /// L2 penalty on the head's dense kernels (0 disables it)
    pub kernel_l2: f64,
    /// Backbone layers left trainable; every other backbone layer is frozen
    pub trainable_layers: Vec<String>,
    /// Backbone weight source
    pub weights: WeightSource,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            stage_blocks: vec![3, 4, 6, 3],
            base_channels: 64,
            hidden_units: vec![512, 256],
            dropout_rate: DEFAULT_DROPOUT_RATE,
            kernel_l2: 0.0,
            trainable_layers: vec!["conv5_block3".to_string()],
            weights: WeightSource::default(),
        }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of epochs
    pub epochs: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Show a progress bar during the training phase
    pub show_progress: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: DEFAULT_LEARNING_RATE,
            show_progress: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Root directory for scalar summaries; each run gets a timestamped child
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
        }
    }
}
