//! Model and training loop for ResNet fine-tuning.
//!
//! The [`model::ClassifierModel`] is a ResNet bottleneck backbone, frozen
//! except for an explicit list of layers, followed by a dense classification
//! head. [`classifier::Classifier`] wraps it with Adam and running metrics,
//! and [`trainer::TrainingLoop`] drives the train/evaluate epochs.

pub mod backbone;
pub mod backend;
pub mod classifier;
pub mod freeze;
pub mod head;
pub mod layers;
pub mod loss;
pub mod model;
pub mod summary;
pub mod trainer;
pub mod weights;

pub use backbone::{Backbone, BackboneConfig};
pub use backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
pub use classifier::{adam_classifier, adam_optimizer, Classifier};
pub use freeze::FreezePlan;
pub use head::{Head, HeadConfig, HeadLayer};
pub use layers::Mode;
pub use model::{ClassifierConfig, ClassifierModel};
pub use summary::{CsvSummaryWriter, MemorySummaryWriter, SummaryWriter};
pub use trainer::{EpochRecord, LoopConfig, TrainingHistory, TrainingLoop};
pub use weights::{load_backbone_weights, resolve_weights, save_backbone_weights};
