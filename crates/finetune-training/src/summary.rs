//! Scalar summary sinks.
//!
//! The training loop writes every tracked metric once per phase to a
//! [`SummaryWriter`]: one writer for training, another for validation.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use finetune_core::Result;
use tracing::{debug, warn};

/// Accepts named scalar values tagged with a step index
pub trait SummaryWriter {
    fn write_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()>;

    /// Makes everything written so far durable
    fn flush(&mut self) -> Result<()>;
}

/// Appends `step,name,value` rows to `<dir>/scalars.csv`
pub struct CsvSummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl CsvSummaryWriter {
    pub const FILE_NAME: &'static str = "scalars.csv";

    /// Creates `dir` if needed and starts a fresh CSV file in it.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        let mut out = BufWriter::new(File::create(&path)?);
        writeln!(out, "step,name,value")?;
        debug!("Writing summaries to {}", path.display());
        Ok(Self { path, out })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SummaryWriter for CsvSummaryWriter {
    fn write_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        writeln!(self.out, "{step},{name},{value}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for CsvSummaryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!("Failed to flush {}: {e}", self.path.display());
        }
    }
}

/// One recorded scalar
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarRecord {
    pub name: String,
    pub value: f64,
    pub step: usize,
}

/// Keeps scalars in memory
#[derive(Debug, Default)]
pub struct MemorySummaryWriter {
    records: Vec<ScalarRecord>,
    flushes: usize,
}

impl MemorySummaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ScalarRecord] {
        &self.records
    }

    /// `(step, value)` pairs recorded under `name`
    pub fn series(&self, name: &str) -> Vec<(usize, f64)> {
        self.records
            .iter()
            .filter(|r| r.name == name)
            .map(|r| (r.step, r.value))
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl SummaryWriter for MemorySummaryWriter {
    fn write_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        self.records.push(ScalarRecord {
            name: name.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}
