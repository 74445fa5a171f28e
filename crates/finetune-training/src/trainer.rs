//! Epoch loop: a training phase then an evaluation phase per epoch.
//!
//! Each phase starts and ends with a metric reset. After a phase, every
//! tracked metric is written to that phase's summary writer with the epoch
//! index as the step, and a one-line summary is printed. Any error aborts
//! the run.

use burn::{optim::Optimizer, tensor::backend::AutodiffBackend};
use finetune_core::{MetricsSnapshot, Result};
use finetune_dataset::ClassifierBatch;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classifier::Classifier;
use crate::model::ClassifierModel;
use crate::summary::SummaryWriter;

/// Settings for [`TrainingLoop`]
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub epochs: usize,
    /// Draw a progress bar over the training batches
    pub show_progress: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            show_progress: true,
        }
    }
}

/// Metrics of one finished epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: MetricsSnapshot,
    pub eval: MetricsSnapshot,
}

/// Per-epoch metrics of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// The epoch with the highest evaluation accuracy
    pub fn best_eval(&self) -> Option<&EpochRecord> {
        self.epochs
            .iter()
            .max_by(|a, b| a.eval.accuracy.total_cmp(&b.eval.accuracy))
    }
}

pub struct TrainingLoop {
    config: LoopConfig,
}

impl TrainingLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    /// Runs every epoch.
    ///
    /// `train_batches(epoch)` and `eval_batches(epoch)` produce the batches of
    /// one pass; they are called once per epoch so a data loader can
    /// reshuffle between epochs.
    pub fn run<B, O, T, E>(
        &self,
        classifier: &mut Classifier<B, O>,
        mut train_batches: impl FnMut(usize) -> T,
        mut eval_batches: impl FnMut(usize) -> E,
        train_writer: &mut dyn SummaryWriter,
        eval_writer: &mut dyn SummaryWriter,
    ) -> Result<TrainingHistory>
    where
        B: AutodiffBackend,
        O: Optimizer<ClassifierModel<B>, B>,
        T: IntoIterator<Item = ClassifierBatch<B>>,
        E: IntoIterator<Item = ClassifierBatch<B::InnerBackend>>,
    {
        let mut history = TrainingHistory::default();

        for epoch in 0..self.config.epochs {
            info!("Epoch {}/{}", epoch + 1, self.config.epochs);

            classifier.reset_metrics();
            let batches = train_batches(epoch).into_iter();
            let progress = self.progress_bar(epoch, batches.size_hint());
            for batch in batches {
                let metrics = classifier.train_step(&batch)?;
                progress.set_message(metrics.summary(""));
                progress.inc(1);
            }
            progress.finish_and_clear();

            let train = classifier.metrics().snapshot();
            write_snapshot(train_writer, &train, epoch)?;
            println!("epoch {epoch}: {}", train.summary(""));
            classifier.reset_metrics();

            for batch in eval_batches(epoch) {
                classifier.test_step(&batch)?;
            }
            let eval = classifier.metrics().snapshot();
            write_snapshot(eval_writer, &eval, epoch)?;
            println!("epoch {epoch}: {}", eval.summary("val_"));
            classifier.reset_metrics();

            history.epochs.push(EpochRecord { epoch, train, eval });
        }

        Ok(history)
    }

    fn progress_bar(&self, epoch: usize, size_hint: (usize, Option<usize>)) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = match size_hint {
            (_, Some(len)) => ProgressBar::new(len as u64).with_style(
                ProgressStyle::default_bar()
                    .template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            ),
            (_, None) => ProgressBar::new_spinner(),
        };
        bar.set_message(format!("epoch {epoch}"));
        bar
    }
}

fn write_snapshot(
    writer: &mut dyn SummaryWriter,
    snapshot: &MetricsSnapshot,
    step: usize,
) -> Result<()> {
    for (name, value) in snapshot.entries() {
        writer.write_scalar(name, value, step)?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::BackboneConfig;
    use crate::classifier::adam_classifier;
    use crate::model::ClassifierConfig;
    use crate::summary::{MemorySummaryWriter, ScalarRecord};
    use burn::backend::{Autodiff, NdArray};
    use burn::prelude::*;
    use burn::tensor::{Distribution, TensorData};
    use finetune_core::{Error, WeightSource};

    type InnerBackend = NdArray;
    type TestBackend = Autodiff<InnerBackend>;

    fn tiny_model(device: &<TestBackend as Backend>::Device) -> ClassifierModel<TestBackend> {
        ClassifierConfig::new(
            BackboneConfig::new()
                .with_stage_blocks(vec![1, 1])
                .with_base_channels(4),
        )
        .with_input_size(32)
        .with_hidden_units(vec![8, 8])
        .with_trainable_layers(vec!["conv3_block1".to_string()])
        .init(&WeightSource::Random, device)
        .unwrap()
    }

    fn batch<B: Backend>(device: &B::Device) -> ClassifierBatch<B> {
        let images = Tensor::random([2, 3, 32, 32], Distribution::Uniform(-1.0, 1.0), device);
        let targets = Tensor::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0], [2, 4]),
            device,
        );
        ClassifierBatch::new(images, targets)
    }

    fn quiet_loop(epochs: usize) -> TrainingLoop {
        TrainingLoop::new(LoopConfig {
            epochs,
            show_progress: false,
        })
    }

    #[test]
    fn test_writes_each_metric_per_epoch() {
        let device = Default::default();
        let mut classifier = adam_classifier(tiny_model(&device));
        let mut train_writer = MemorySummaryWriter::new();
        let mut eval_writer = MemorySummaryWriter::new();

        let history = quiet_loop(2)
            .run(
                &mut classifier,
                |_| vec![batch::<TestBackend>(&device), batch::<TestBackend>(&device)],
                |_| vec![batch::<InnerBackend>(&device)],
                &mut train_writer,
                &mut eval_writer,
            )
            .unwrap();

        assert_eq!(history.epochs.len(), 2);
        for writer in [&train_writer, &eval_writer] {
            let names: Vec<_> = writer.records().iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["loss", "accuracy", "loss", "accuracy"]);
            let steps: Vec<_> = writer.series("loss").iter().map(|(step, _)| *step).collect();
            assert_eq!(steps, vec![0, 1]);
            assert_eq!(writer.flushes(), 2);
        }

        let first = history.epochs[0];
        assert_eq!(
            train_writer.records()[0],
            ScalarRecord {
                name: "loss".to_string(),
                value: first.train.loss,
                step: 0
            }
        );
        assert_eq!(eval_writer.series("accuracy")[1].1, history.epochs[1].eval.accuracy);
        assert!(classifier.metrics().is_empty());
    }

    #[test]
    fn test_phases_do_not_share_metrics() {
        let device = Default::default();
        let mut classifier = adam_classifier(tiny_model(&device));
        let mut train_writer = MemorySummaryWriter::new();
        let mut eval_writer = MemorySummaryWriter::new();

        let history = quiet_loop(1)
            .run(
                &mut classifier,
                |_| vec![batch::<TestBackend>(&device)],
                |_| Vec::<ClassifierBatch<InnerBackend>>::new(),
                &mut train_writer,
                &mut eval_writer,
            )
            .unwrap();

        // nothing evaluated, so validation reports the identity values
        assert_eq!(history.epochs[0].eval, MetricsSnapshot::default());
        assert!(history.epochs[0].train.loss > 0.0);
    }

    #[test]
    fn test_step_error_aborts_run() {
        let device = Default::default();
        let mut classifier = adam_classifier(tiny_model(&device));
        let mut train_writer = MemorySummaryWriter::new();
        let mut eval_writer = MemorySummaryWriter::new();

        let bad_batch = || {
            ClassifierBatch::<TestBackend>::new(
                Tensor::zeros([1, 3, 16, 16], &device),
                Tensor::zeros([1, 4], &device),
            )
        };
        let result = quiet_loop(3).run(
            &mut classifier,
            |_| vec![bad_batch()],
            |_| Vec::<ClassifierBatch<InnerBackend>>::new(),
            &mut train_writer,
            &mut eval_writer,
        );

        assert!(matches!(result, Err(Error::Shape(_))));
        assert!(train_writer.records().is_empty());
    }

    #[test]
    fn test_best_eval() {
        let snapshot = |accuracy| MetricsSnapshot {
            loss: 1.0,
            accuracy,
        };
        let history = TrainingHistory {
            epochs: (0..3)
                .map(|epoch| EpochRecord {
                    epoch,
                    train: snapshot(0.5),
                    eval: snapshot([0.4, 0.7, 0.6][epoch]),
                })
                .collect(),
        };
        assert_eq!(history.best_eval().unwrap().epoch, 1);
        assert_eq!(history.last().unwrap().epoch, 2);
    }
}
