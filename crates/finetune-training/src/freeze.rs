//! Which backbone layers stay trainable.
//!
//! The plan names the trainable layers explicitly; every other backbone
//! layer is frozen. Names are checked against the backbone, so a layout
//! change cannot silently freeze or unfreeze the wrong layers.

use std::cell::Cell;
use std::collections::BTreeSet;

use burn::prelude::*;
use finetune_core::{Error, Result};
use tracing::{debug, info};

use crate::backbone::Backbone;

/// Explicit per-layer trainable list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezePlan {
    trainable: BTreeSet<String>,
}

impl Default for FreezePlan {
    /// Only the last ResNet-50 block (its ten final layers) is trainable.
    fn default() -> Self {
        Self::trainable(["conv5_block3"])
    }
}

impl FreezePlan {
    pub fn trainable<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trainable: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Freezes every layer
    pub fn all_frozen() -> Self {
        Self {
            trainable: BTreeSet::new(),
        }
    }

    pub fn is_trainable(&self, name: &str) -> bool {
        self.trainable.contains(name)
    }

    /// Errors if the plan names a layer the backbone does not have
    pub fn validate(&self, layer_names: &[String]) -> Result<()> {
        let unknown: Vec<&str> = self
            .trainable
            .iter()
            .filter(|name| !layer_names.contains(name))
            .map(String::as_str)
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "unknown backbone layers in freeze plan: {} (available: {})",
                unknown.join(", "),
                layer_names.join(", ")
            )))
        }
    }

    /// Disables gradients for every layer not listed as trainable
    pub fn apply<B: Backend>(&self, backbone: Backbone<B>) -> Result<Backbone<B>> {
        self.validate(&backbone.layer_names())?;

        let frozen = Cell::new(0usize);
        let trainable = Cell::new(0usize);
        let keep = |name: &str| {
            let keep = self.is_trainable(name);
            debug!("{:<14} {}", name, if keep { "trainable" } else { "frozen" });
            let counter = if keep { &trainable } else { &frozen };
            counter.set(counter.get() + 1);
            keep
        };

        let backbone = backbone.map_units(
            |name, stem| if keep(name) { stem } else { stem.no_grad() },
            |name, block| if keep(name) { block } else { block.no_grad() },
        );

        info!(
            "Backbone layers: {} trainable, {} frozen",
            trainable.get(),
            frozen.get()
        );
        Ok(backbone)
    }
}
