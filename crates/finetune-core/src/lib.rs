//! Core types and utilities for ResNet fine-tuning.
//!
//! This crate holds the pieces shared by the dataset, training and tool
//! crates: the error type, the TOML configuration model, the running metric
//! accumulators and the CLI helpers.

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;

pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use metrics::*;

/// Side length of the square images fed to the backbone.
pub const IMAGE_SIZE: usize = 224;

/// Number of color channels (RGB).
pub const CHANNELS: usize = 3;

/// Number of target classes.
pub const NUM_CLASSES: usize = 4;

/// Adam learning rate used for fine-tuning.
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;

/// Dropout probability of the classification head.
pub const DEFAULT_DROPOUT_RATE: f64 = 0.2;
