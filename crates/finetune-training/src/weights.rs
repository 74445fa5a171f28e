//! Pretrained backbone weights.
//!
//! Registry sources are downloaded once into a local cache and reused on
//! later runs. Records use burn's named MessagePack format.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use finetune_core::{Error, Result, WeightSource};
use tracing::{info, warn};

use crate::backbone::Backbone;

/// Environment variable consulted when a registry source has no base URL
pub const WEIGHTS_URL_ENV: &str = "TRANSFER_WEIGHTS_URL";

const RECORD_EXTENSION: &str = "mpk";

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Local record path for `source`, downloading it first if needed.
/// `None` means the backbone keeps its random initialization.
pub fn resolve_weights(source: &WeightSource) -> Result<Option<PathBuf>> {
    match source {
        WeightSource::Random => Ok(None),
        WeightSource::File { path } => {
            if path.is_file() {
                Ok(Some(path.clone()))
            } else {
                Err(Error::Model(format!(
                    "weight file not found: {}",
                    path.display()
                )))
            }
        }
        WeightSource::Registry {
            identifier,
            base_url,
            cache_dir,
        } => {
            let cached = cache_dir.join(format!("{identifier}.{RECORD_EXTENSION}"));
            if cached.is_file() {
                info!("Using cached weights {}", cached.display());
                return Ok(Some(cached));
            }

            let base_url = match base_url {
                Some(url) => url.clone(),
                None => std::env::var(WEIGHTS_URL_ENV).map_err(|_| {
                    Error::Config(format!(
                        "no registry URL for '{identifier}': set base_url or {WEIGHTS_URL_ENV}"
                    ))
                })?,
            };
            let url = format!(
                "{}/{identifier}.{RECORD_EXTENSION}",
                base_url.trim_end_matches('/')
            );
            download(&url, &cached)?;
            Ok(Some(cached))
        }
    }
}

/// Fetches `url` into `target`, writing to a sibling temp file first.
fn download(url: &str, target: &Path) -> Result<()> {
    info!("Downloading pretrained weights from {url}");

    let response = reqwest::blocking::get(url)
        .map_err(|e| Error::Network(format!("GET {url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Network(format!("HTTP {status} for {url}")));
    }
    let bytes = response
        .bytes()
        .map_err(|e| Error::Network(format!("reading body of {url}: {e}")))?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = target.with_extension("part");
    let mut file = fs::File::create(&partial)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&partial, target)?;

    info!("Saved {} bytes to {}", bytes.len(), target.display());
    Ok(())
}

/// Loads the weights named by `source` into `backbone`.
pub fn load_backbone_weights<B: Backend>(
    backbone: Backbone<B>,
    source: &WeightSource,
    device: &B::Device,
) -> Result<Backbone<B>> {
    let Some(path) = resolve_weights(source)? else {
        warn!("No pretrained weights configured; backbone starts from random initialization");
        return Ok(backbone);
    };

    let backbone = backbone
        .load_file(path.clone(), &recorder(), device)
        .map_err(|e| Error::Model(format!("failed to load {}: {e}", path.display())))?;
    info!("Loaded backbone weights from {}", path.display());
    Ok(backbone)
}

/// Writes the backbone in the format [`load_backbone_weights`] reads.
pub fn save_backbone_weights<B: Backend>(backbone: &Backbone<B>, path: &Path) -> Result<()> {
    backbone
        .clone()
        .save_file(path.to_path_buf(), &recorder())
        .map_err(|e| Error::Model(format!("failed to save {}: {e}", path.display())))
}
