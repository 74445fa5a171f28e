//! Image loading and dataset construction.
//!
//! One directory holds the images of one class. The [`loader`] decodes and
//! resizes them (optionally augmenting), [`dataset`] turns them into
//! normalized, one-hot labeled examples and [`batcher`] stacks examples into
//! tensors for burn's data loader.

pub mod augmentation;
pub mod batcher;
pub mod dataset;
pub mod loader;

pub use augmentation::Augmenter;
pub use batcher::{ClassifierBatch, ExampleBatcher};
pub use dataset::{
    build_dataset, merge_classes, BuildOptions, ClassDataset, ExampleDataset, LabeledExample,
};
pub use loader::{load_images, ImageLoader};
