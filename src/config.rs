//! YAML-driven run configuration.
//!
//! A [`PoseMdnConfig`] describes one training/sampling setup: the recurrent
//! cell variant and its sizes, the mixture head, gradient clipping, batching,
//! plus dataset location and training-loop settings. Configs are plain YAML
//! files with defaults for every field, so a minimal file only overrides what
//! it cares about.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PoseMdnError, PoseMdnResult};

/// Recurrent cell variant, resolved once at model construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CellType {
    /// Single tanh gate, hidden state only.
    SimpleRecurrent,
    /// Reset/update gates with a candidate activation.
    GatedRecurrent,
    /// Four gates with a separate carry state and unit forget bias.
    #[default]
    LstmLike,
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CellType::SimpleRecurrent => "simple-recurrent",
            CellType::GatedRecurrent => "gated-recurrent",
            CellType::LstmLike => "lstm-like",
        };
        write!(f, "{name}")
    }
}

/// Dataset location settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to the training corpus: plain text, one pose per line.
    #[serde(default = "default_dataset_path")]
    pub path: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
        }
    }
}

/// Training-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of passes over the corpus.
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    /// Base learning rate (epoch 0).
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Per-epoch exponential decay applied to the learning rate.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Checkpoint every N optimizer steps.
    #[serde(default = "default_save_every")]
    pub save_every: usize,
    /// Emit a log line every N optimizer steps.
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: default_num_epochs(),
            learning_rate: default_learning_rate(),
            decay_rate: default_decay_rate(),
            save_every: default_save_every(),
            log_every: default_log_every(),
        }
    }
}

/// Full configuration for a training or sampling run.
///
/// The top-level fields are the recognized model options; `dataset` and
/// `training` group the driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseMdnConfig {
    /// Recurrent cell variant. An unrecognized name fails at parse time.
    #[serde(default)]
    pub model: CellType,
    /// Hidden width of each recurrent layer.
    #[serde(default = "default_rnn_size")]
    pub rnn_size: usize,
    /// Number of stacked recurrent layers.
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// Dropout retention probability on the encoder output (training only).
    /// `1.0` disables dropout entirely.
    #[serde(default = "default_keep_prob")]
    pub keep_prob: f64,
    /// Number of Gaussian components per output dimension.
    #[serde(default = "default_num_mixture")]
    pub num_mixture: usize,
    /// Floor added to every component scale after exponentiation.
    #[serde(default = "default_sig_epsilon")]
    pub sig_epsilon: f64,
    /// Global gradient-norm clip threshold.
    #[serde(default = "default_grad_clip")]
    pub grad_clip: f64,
    /// Sequences per training batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Time steps per training sequence.
    #[serde(default = "default_seq_length")]
    pub seq_length: usize,
    /// Dataset settings.
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Training-loop settings.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Directory for checkpoints.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// RNG seed for shuffling and sampling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for PoseMdnConfig {
    fn default() -> Self {
        Self {
            model: CellType::default(),
            rnn_size: default_rnn_size(),
            num_layers: default_num_layers(),
            keep_prob: default_keep_prob(),
            num_mixture: default_num_mixture(),
            sig_epsilon: default_sig_epsilon(),
            grad_clip: default_grad_clip(),
            batch_size: default_batch_size(),
            seq_length: default_seq_length(),
            dataset: DatasetConfig::default(),
            training: TrainingConfig::default(),
            output_dir: default_output_dir(),
            seed: default_seed(),
        }
    }
}

fn default_rnn_size() -> usize {
    256
}

fn default_num_layers() -> usize {
    2
}

fn default_keep_prob() -> f64 {
    0.8
}

fn default_num_mixture() -> usize {
    20
}

fn default_sig_epsilon() -> f64 {
    1e-3
}

fn default_grad_clip() -> f64 {
    10.0
}

fn default_batch_size() -> usize {
    50
}

fn default_seq_length() -> usize {
    300
}

fn default_dataset_path() -> String {
    "data/train.txt".to_string()
}

fn default_num_epochs() -> usize {
    30
}

fn default_learning_rate() -> f64 {
    5e-3
}

fn default_decay_rate() -> f64 {
    0.95
}

fn default_save_every() -> usize {
    500
}

fn default_log_every() -> usize {
    50
}

fn default_output_dir() -> String {
    "./outputs".to_string()
}

fn default_seed() -> u64 {
    42
}

impl PoseMdnConfig {
    /// Load a configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PoseMdnResult<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Write this configuration to a YAML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> PoseMdnResult<()> {
        let contents = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Create a configuration from a named preset.
    ///
    /// `dance` is the stock 6-dimensional motion setup; `test` is a tiny
    /// configuration for fast tests.
    pub fn from_preset(preset: &str) -> PoseMdnResult<Self> {
        match preset {
            "dance" => Ok(Self::default()),
            "test" => Ok(Self::test()),
            _ => Err(PoseMdnError::config(format!(
                "unknown preset: {preset} (expected `dance` or `test`)"
            ))),
        }
    }

    /// Tiny configuration for unit and integration tests.
    pub fn test() -> Self {
        Self {
            model: CellType::GatedRecurrent,
            rnn_size: 32,
            num_layers: 1,
            keep_prob: 1.0,
            num_mixture: 3,
            batch_size: 2,
            seq_length: 8,
            training: TrainingConfig {
                num_epochs: 1,
                save_every: 1000,
                log_every: 10,
                ..TrainingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check field ranges. Called before any model or trainer is built.
    pub fn validate(&self) -> PoseMdnResult<()> {
        if self.rnn_size == 0 {
            return Err(PoseMdnError::config("rnn_size must be at least 1"));
        }
        if self.num_layers == 0 {
            return Err(PoseMdnError::config("num_layers must be at least 1"));
        }
        if self.num_mixture == 0 {
            return Err(PoseMdnError::config("num_mixture must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(PoseMdnError::config("batch_size must be at least 1"));
        }
        if self.seq_length == 0 {
            return Err(PoseMdnError::config("seq_length must be at least 1"));
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(PoseMdnError::config(format!(
                "keep_prob must be in (0, 1], got {}",
                self.keep_prob
            )));
        }
        if self.sig_epsilon <= 0.0 {
            return Err(PoseMdnError::config(format!(
                "sig_epsilon must be positive, got {}",
                self.sig_epsilon
            )));
        }
        if self.grad_clip <= 0.0 {
            return Err(PoseMdnError::config(format!(
                "grad_clip must be positive, got {}",
                self.grad_clip
            )));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(PoseMdnError::config(format!(
                "learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }
        if !(self.training.decay_rate > 0.0 && self.training.decay_rate <= 1.0) {
            return Err(PoseMdnError::config(format!(
                "decay_rate must be in (0, 1], got {}",
                self.training.decay_rate
            )));
        }
        if self.training.num_epochs == 0 {
            return Err(PoseMdnError::config("num_epochs must be at least 1"));
        }
        if self.training.save_every == 0 {
            return Err(PoseMdnError::config("save_every must be at least 1"));
        }
        if self.training.log_every == 0 {
            return Err(PoseMdnError::config("log_every must be at least 1"));
        }
        if self.dataset.path.is_empty() {
            return Err(PoseMdnError::config("dataset.path must not be empty"));
        }
        Ok(())
    }
}
