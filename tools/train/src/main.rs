//! Training CLI Tool
//!
//! Fine-tunes a pretrained ResNet on one directory of images per class.
//! Every run writes its train and validation scalars to
//! `<log_dir>/<timestamp>/{train,val}/scalars.csv` and the per-epoch history
//! to `<log_dir>/<timestamp>/history.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::data::{dataloader::DataLoaderBuilder, dataset::Dataset};
use clap::Parser;
use colored::Colorize;
use finetune_core::{load_toml_config, setup_cli_logging, ClassSource, PipelineConfig};
use finetune_dataset::{build_dataset, merge_classes, BuildOptions, ExampleBatcher, ExampleDataset};
use finetune_training::{
    adam_optimizer, backend_name, default_device, Classifier, ClassifierConfig,
    CsvSummaryWriter, DefaultBackend, LoopConfig, TrainingBackend, TrainingHistory, TrainingLoop,
};
use tracing::{info, warn};

/// ResNet fine-tuning tool
#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Fine-tune a pretrained ResNet on class directories",
    long_about = "Fine-tune a pretrained ResNet-50 backbone with a dense classification head. \
                  Class directories, model and training settings come from a TOML file; \
                  the flags below override individual values."
)]
struct Args {
    /// Path to the run configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Override the summary root directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Override the shuffle/augmentation seed
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let mut config: PipelineConfig = load_toml_config(&args.config)?;
    apply_overrides(&mut config, &args);
    validate_config(&config)?;
    print_config_summary(&config);

    if args.dry_run {
        info!("Configuration validated successfully (dry run)");
        return Ok(());
    }

    let history = run_training(&config)?;
    print_history(&history);
    Ok(())
}

fn apply_overrides(config: &mut PipelineConfig, args: &Args) {
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.training.learning_rate = lr;
    }
    if let Some(batch_size) = args.batch_size {
        config.data.batch_size = batch_size;
    }
    if let Some(log_dir) = &args.log_dir {
        config.logging.log_dir = log_dir.clone();
    }
    if let Some(seed) = args.seed {
        config.data.seed = seed;
    }
}

fn validate_config(config: &PipelineConfig) -> Result<()> {
    config.validate()?;

    for source in config.data.train.iter().chain(config.data.eval.iter()) {
        if !source.path.is_dir() {
            anyhow::bail!("Class directory does not exist: {}", source.path.display());
        }
    }
    if config.data.eval.is_empty() {
        warn!("No evaluation directories configured; validation metrics will stay at zero");
    }
    if config.data.eval.iter().any(|source| source.augment) {
        warn!("Augmentation is ignored for evaluation directories");
    }

    Ok(())
}

fn print_config_summary(config: &PipelineConfig) {
    info!("");
    info!("Configuration Summary:");
    info!("  Backend: {}", backend_name());
    info!("  Image size: {}", config.data.image_size);
    info!("  Classes: {}", config.data.num_classes);
    info!("  Backbone stages: {:?}", config.model.stage_blocks);
    info!("  Trainable layers: {}", config.model.trainable_layers.join(", "));
    info!("  Head: {:?}, dropout {}", config.model.hidden_units, config.model.dropout_rate);
    info!("  Epochs: {}", config.training.epochs);
    info!("  Batch size: {}", config.data.batch_size);
    info!("  Learning rate: {}", config.training.learning_rate);
    info!("  Train dirs: {}", config.data.train.len());
    info!("  Eval dirs: {}", config.data.eval.len());
    info!("  Log dir: {}", config.logging.log_dir.display());
    info!("");
}

/// Builds one dataset per class directory and concatenates them.
fn load_split(sources: &[ClassSource], options: &BuildOptions, training: bool) -> Result<ExampleDataset> {
    let classes = sources
        .iter()
        .map(|source| {
            build_dataset(&source.path, source.label, training && source.augment, options)
                .with_context(|| format!("Failed to load {}", source.path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(merge_classes(classes))
}

fn run_training(config: &PipelineConfig) -> Result<TrainingHistory> {
    println!("{}", "Loading Dataset...".cyan());
    let options = BuildOptions {
        image_size: config.data.image_size,
        num_classes: config.data.num_classes,
        augmentation: config.data.augmentation.clone(),
        seed: config.data.seed,
    };
    let train_set = load_split(&config.data.train, &options, true)?;
    let eval_set = load_split(&config.data.eval, &options, false)?;
    info!("Loaded {} training and {} evaluation examples", train_set.len(), eval_set.len());

    let batch_size = config.data.batch_size;
    let train_batches = train_set.len().div_ceil(batch_size);
    let eval_batches = eval_set.len().div_ceil(batch_size);
    let batcher = ExampleBatcher::new(config.data.image_size, config.data.num_classes);

    let mut train_builder = DataLoaderBuilder::<TrainingBackend, _, _>::new(batcher.clone())
        .batch_size(batch_size)
        .shuffle(config.data.seed);
    let mut eval_builder = DataLoaderBuilder::<DefaultBackend, _, _>::new(batcher).batch_size(batch_size);
    // zero workers means batching on the calling thread
    if config.data.num_workers > 0 {
        train_builder = train_builder.num_workers(config.data.num_workers);
        eval_builder = eval_builder.num_workers(config.data.num_workers);
    }
    let train_loader = train_builder.build(train_set);
    let eval_loader = eval_builder.build(eval_set);

    println!("{}", "Creating Model...".cyan());
    let device = default_device();
    let model = ClassifierConfig::from_pipeline(config)
        .init::<TrainingBackend>(&config.model.weights, &device)
        .context("Failed to build the classifier")?;
    let mut classifier = Classifier::new(model, adam_optimizer(), config.training.learning_rate);

    let run_dir = config
        .logging
        .log_dir
        .join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());

    println!("{}", "Starting Training...".green().bold());
    let history = {
        let mut train_writer = CsvSummaryWriter::create(&run_dir.join("train"))?;
        let mut val_writer = CsvSummaryWriter::create(&run_dir.join("val"))?;

        TrainingLoop::new(LoopConfig {
            epochs: config.training.epochs,
            show_progress: config.training.show_progress,
        })
        .run(
            &mut classifier,
            |_| train_loader.iter().take(train_batches),
            |_| eval_loader.iter().take(eval_batches),
            &mut train_writer,
            &mut val_writer,
        )?
    };

    save_history(&history, &run_dir)?;
    info!("Summaries written to {}", run_dir.display());
    Ok(history)
}

fn save_history(history: &TrainingHistory, run_dir: &Path) -> Result<()> {
    let path = run_dir.join("history.json");
    let json = serde_json::to_string_pretty(history)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn print_history(history: &TrainingHistory) {
    println!();
    println!("{}", "Training Complete!".green().bold());
    for record in &history.epochs {
        println!(
            "  {} {}  {}",
            format!("epoch {:>3}", record.epoch).yellow(),
            record.train.summary(""),
            record.eval.summary("val_")
        );
    }
    if let Some(best) = history.best_eval() {
        println!(
            "  {} epoch {} with val_accuracy {:.4}",
            "best:".cyan().bold(),
            best.epoch,
            best.eval.accuracy
        );
    }
}
