//! Training driver: epochs, learning-rate decay, checkpoints.
//!
//! A [`Trainer`] owns the run configuration and drives the model through
//! shuffled epoch batches with [`ClippedAdam`](crate::optimizer::ClippedAdam),
//! decaying the learning rate once per epoch. Checkpoints are directories
//! holding the model weights, the run configuration, and a small JSON
//! training state, written every `save_every` steps and once at the end.

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::PoseMdnConfig;
use crate::data::PoseDataset;
use crate::error::{PoseMdnError, PoseMdnResult};
use crate::model::PoseMdn;
use crate::optimizer::{ClippedAdam, OptimizerConfig};

/// Per-step training metrics.
#[derive(Debug, Clone, Serialize)]
pub struct StepMetrics {
    /// Global optimizer step, 1-based.
    pub step: usize,
    /// Epoch the step ran in, 0-based.
    pub epoch: usize,
    /// Scalar loss for the batch.
    pub loss: f64,
    /// Learning rate used for the step.
    pub learning_rate: f64,
    /// Pre-clip global gradient norm.
    pub grad_norm: f64,
}

/// Outcome of a completed training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// Global step count at the end of the run.
    pub steps: usize,
    /// Loss of the last batch, `None` when the run executed no steps.
    pub final_loss: Option<f64>,
}

/// Counters persisted alongside checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainingState {
    step: usize,
    epoch: usize,
    learning_rate: f64,
    dim: usize,
}

/// Drives training of a [`PoseMdn`] from a [`PoseMdnConfig`].
pub struct Trainer {
    config: PoseMdnConfig,
    device: Device,
    step: usize,
    epoch: usize,
    resume_checkpoint: Option<PathBuf>,
    metrics: Vec<StepMetrics>,
}

impl Trainer {
    /// Create a trainer after validating the configuration.
    pub fn new(config: PoseMdnConfig) -> PoseMdnResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device: Device::Cpu,
            step: 0,
            epoch: 0,
            resume_checkpoint: None,
            metrics: Vec::new(),
        })
    }

    /// Resume the next [`train`](Self::train) call from a checkpoint
    /// directory.
    pub fn resume_from<P: AsRef<Path>>(&mut self, dir: P) -> PoseMdnResult<()> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.join("model.safetensors").is_file() {
            return Err(PoseMdnError::training(format!(
                "no checkpoint found at {}",
                dir.display()
            )));
        }
        self.resume_checkpoint = Some(dir);
        Ok(())
    }

    /// Run the full training loop.
    pub fn train(&mut self) -> PoseMdnResult<TrainingSummary> {
        let dataset = PoseDataset::load(&self.config.dataset.path)?;
        let dim = dataset.dim();
        tracing::info!(
            "Loaded {} poses of dimension {} from {}",
            dataset.len(),
            dim,
            self.config.dataset.path
        );

        let mut model = PoseMdn::new(&self.config, dim, &self.device)?;
        tracing::info!(
            "Built {} model: {} layers of width {}, {} mixture components, {} parameters",
            self.config.model,
            self.config.num_layers,
            self.config.rnn_size,
            self.config.num_mixture,
            model.parameter_count()
        );

        let mut optimizer = ClippedAdam::new(OptimizerConfig {
            learning_rate: self.config.training.learning_rate,
            grad_clip: self.config.grad_clip,
            ..OptimizerConfig::default()
        });

        let mut start_epoch = 0;
        if let Some(dir) = self.resume_checkpoint.clone() {
            let state = read_training_state(&dir)?;
            if state.dim != dim {
                return Err(PoseMdnError::training(format!(
                    "checkpoint was trained on {}-dimensional poses, corpus has {dim}",
                    state.dim
                )));
            }
            model.load(dir.join("model.safetensors"))?;
            self.step = state.step;
            start_epoch = state.epoch;
            tracing::info!(
                "Resumed from {} at step {}, epoch {}",
                dir.display(),
                state.step,
                state.epoch
            );
        }

        let num_epochs = self.config.training.num_epochs;
        if start_epoch >= num_epochs {
            tracing::warn!(
                "checkpoint already covers epoch {}, nothing left to train",
                start_epoch
            );
            return Ok(TrainingSummary {
                steps: self.step,
                final_loss: None,
            });
        }

        fs::create_dir_all(&self.config.output_dir)?;

        let windows = dataset.num_windows(self.config.seq_length);
        let steps_per_epoch = windows / self.config.batch_size;
        if steps_per_epoch == 0 {
            return Err(PoseMdnError::training(format!(
                "corpus yields {windows} windows, need at least {} for one batch",
                self.config.batch_size
            )));
        }

        let total_steps = steps_per_epoch * (num_epochs - start_epoch);
        let pb = ProgressBar::new(total_steps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let base_lr = self.config.training.learning_rate;
        let mut final_loss = None;

        for epoch in start_epoch..num_epochs {
            self.epoch = epoch;
            let lr = base_lr * self.config.training.decay_rate.powi(epoch as i32);
            optimizer.set_learning_rate(lr);

            let batches = dataset.epoch_batches(
                self.config.batch_size,
                self.config.seq_length,
                &self.device,
                &mut rng,
            )?;
            for batch in batches {
                let loss = model.loss(&batch.inputs, &batch.targets, true)?;
                let grads = loss.backward()?;
                let grad_norm = optimizer.step(model.var_map(), &grads)?;

                let loss_value = f64::from(loss.to_scalar::<f32>()?);
                if !loss_value.is_finite() {
                    return Err(PoseMdnError::training(format!(
                        "loss became non-finite at step {}",
                        self.step + 1
                    )));
                }

                self.step += 1;
                final_loss = Some(loss_value);
                self.metrics.push(StepMetrics {
                    step: self.step,
                    epoch,
                    loss: loss_value,
                    learning_rate: lr,
                    grad_norm,
                });

                pb.set_message(format!("loss {loss_value:.4}"));
                pb.inc(1);

                if self.step % self.config.training.log_every == 0 {
                    tracing::info!(
                        "Step {}, Epoch {}, Loss: {:.4}, GradNorm: {:.4}, LR: {:.2e}",
                        self.step,
                        epoch,
                        loss_value,
                        grad_norm,
                        lr
                    );
                }
                if self.step % self.config.training.save_every == 0 {
                    let dir = Path::new(&self.config.output_dir)
                        .join(format!("checkpoint-{}", self.step));
                    self.save_checkpoint(&model, &dir, dim)?;
                }
            }
        }

        pb.finish_with_message("training complete");

        self.epoch = num_epochs;
        let final_dir = Path::new(&self.config.output_dir).join("checkpoint-final");
        self.save_checkpoint(&model, &final_dir, dim)?;

        Ok(TrainingSummary {
            steps: self.step,
            final_loss,
        })
    }

    fn save_checkpoint(&self, model: &PoseMdn, dir: &Path, dim: usize) -> PoseMdnResult<()> {
        fs::create_dir_all(dir)?;
        model.save(dir.join("model.safetensors"))?;
        // Save the configuration for reproducibility.
        self.config.to_file(dir.join("config.yaml"))?;
        let state = TrainingState {
            step: self.step,
            epoch: self.epoch,
            learning_rate: self.config.training.learning_rate
                * self.config.training.decay_rate.powi(self.epoch as i32),
            dim,
        };
        fs::write(
            dir.join("training_state.json"),
            serde_json::to_string_pretty(&state)?,
        )?;
        tracing::debug!("Wrote checkpoint to {}", dir.display());
        Ok(())
    }

    /// Metrics recorded by this trainer's own steps, resumed steps excluded.
    pub fn metrics(&self) -> &[StepMetrics] {
        &self.metrics
    }

    /// Global step counter, including steps restored from a checkpoint.
    pub fn global_step(&self) -> usize {
        self.step
    }
}

fn read_training_state(dir: &Path) -> PoseMdnResult<TrainingState> {
    let contents = fs::read_to_string(dir.join("training_state.json"))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Load a model and its configuration from a checkpoint directory.
pub fn load_checkpoint<P: AsRef<Path>>(
    dir: P,
    device: &Device,
) -> PoseMdnResult<(PoseMdn, PoseMdnConfig)> {
    let dir = dir.as_ref();
    let config = PoseMdnConfig::from_file(dir.join("config.yaml"))?;
    let state = read_training_state(dir)?;
    let mut model = PoseMdn::new(&config, state.dim, device)?;
    model.load(dir.join("model.safetensors"))?;
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::format_pose;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_corpus(path: &Path, lines: usize, dim: usize) {
        let mut file = fs::File::create(path).unwrap();
        for i in 0..lines {
            let pose: Vec<f64> = (0..dim)
                .map(|d| ((i + d) as f64 * 0.7).sin() * 0.5)
                .collect();
            writeln!(file, "{}", format_pose(&pose)).unwrap();
        }
    }

    fn test_config(dir: &Path) -> PoseMdnConfig {
        let corpus = dir.join("train.txt");
        write_corpus(&corpus, 40, 3);
        let mut config = PoseMdnConfig::test();
        config.dataset.path = corpus.to_string_lossy().into_owned();
        config.output_dir = dir.join("outputs").to_string_lossy().into_owned();
        config
    }

    #[test]
    fn test_train_smoke() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let mut trainer = Trainer::new(config).unwrap();
        let summary = trainer.train().unwrap();

        // 40 poses, windows of 9, batches of 2: two steps in one epoch.
        assert_eq!(summary.steps, 2);
        assert_eq!(trainer.metrics().len(), 2);
        assert!(summary.final_loss.unwrap().is_finite());
        for metrics in trainer.metrics() {
            assert!(metrics.loss.is_finite());
            assert!(metrics.grad_norm >= 0.0);
        }

        let final_dir = dir.path().join("outputs").join("checkpoint-final");
        assert!(final_dir.join("model.safetensors").is_file());
        assert!(final_dir.join("config.yaml").is_file());
        assert!(final_dir.join("training_state.json").is_file());
    }

    #[test]
    fn test_resume_continues_counters() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let checkpoint = dir.path().join("outputs").join("checkpoint-final");

        let mut first = Trainer::new(config.clone()).unwrap();
        first.train().unwrap();

        let mut config = config;
        config.training.num_epochs = 2;
        let mut second = Trainer::new(config).unwrap();
        second.resume_from(&checkpoint).unwrap();
        let summary = second.train().unwrap();

        // Two steps from the first run plus one more epoch of two.
        assert_eq!(summary.steps, 4);
        assert_eq!(second.metrics().len(), 2);
    }

    #[test]
    fn test_resume_of_completed_run_executes_no_steps() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let checkpoint = dir.path().join("outputs").join("checkpoint-final");

        let mut first = Trainer::new(config.clone()).unwrap();
        first.train().unwrap();

        // Same epoch budget: the checkpoint already covers it.
        let mut second = Trainer::new(config).unwrap();
        second.resume_from(&checkpoint).unwrap();
        let summary = second.train().unwrap();

        assert_eq!(summary.steps, 2);
        assert_eq!(summary.final_loss, None);
        assert!(second.metrics().is_empty());
    }

    #[test]
    fn test_resume_rejects_missing_checkpoint() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let mut trainer = Trainer::new(config).unwrap();
        let result = trainer.resume_from(dir.path().join("nowhere"));
        assert!(matches!(result, Err(PoseMdnError::Training(_))));
    }

    #[test]
    fn test_load_checkpoint_roundtrip() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let mut trainer = Trainer::new(config).unwrap();
        trainer.train().unwrap();

        let checkpoint = dir.path().join("outputs").join("checkpoint-final");
        let (model, loaded) = load_checkpoint(&checkpoint, &Device::Cpu).unwrap();
        assert_eq!(model.dim(), 3);
        assert_eq!(loaded.num_mixture, 3);
    }

    #[test]
    fn test_train_rejects_undersized_corpus() {
        let dir = tempdir().unwrap();
        let corpus = dir.path().join("tiny.txt");
        write_corpus(&corpus, 10, 3);
        let mut config = PoseMdnConfig::test();
        config.dataset.path = corpus.to_string_lossy().into_owned();
        config.output_dir = dir.path().join("outputs").to_string_lossy().into_owned();

        let mut trainer = Trainer::new(config).unwrap();
        assert!(trainer.train().is_err());
    }
}
