//! Mixture-density recurrent networks for continuous pose trajectories.
//!
//! This crate trains a recurrent encoder over sequences of real-valued pose
//! vectors and models each next pose with a per-dimension Gaussian mixture,
//! providing:
//! - Three recurrent cell variants (simple, gated, LSTM-like) behind one
//!   stack, selected once at construction
//! - A mixture-density head with numerically stable weight normalization and
//!   floor-clamped scales
//! - Adam with global gradient-norm clipping
//! - An autoregressive sampler exposed as a finite pose iterator, decoupled
//!   from its output sink
//!
//! # Example
//!
//! ```no_run
//! use pose_mdn_rs::{PoseMdn, PoseMdnConfig};
//! use candle_core::Device;
//!
//! let config = PoseMdnConfig::default();
//! let device = Device::Cpu;
//! let model = PoseMdn::new(&config, 6, &device).unwrap();
//! ```
//!
//! # Sampling
//!
//! A trained model generates trajectories lazily; consumers drain the
//! iterator and own all I/O:
//!
//! ```no_run
//! use pose_mdn_rs::{PoseMdn, PoseMdnConfig, TrajectorySampler};
//! use pose_mdn_rs::sampler::write_trajectory;
//! use candle_core::Device;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let config = PoseMdnConfig::default();
//! let model = PoseMdn::new(&config, 6, &Device::Cpu).unwrap();
//! let rng = ChaCha8Rng::seed_from_u64(42);
//! let sampler = TrajectorySampler::new(&model, 1200, rng).unwrap();
//! let lines = write_trajectory(std::io::stdout(), sampler).unwrap();
//! assert_eq!(lines, 1201);
//! ```

pub mod cells;
pub mod config;
pub mod data;
pub mod error;
pub mod mdn;
pub mod model;
pub mod optimizer;
pub mod sampler;
pub mod trainer;

pub use cells::{GruCell, LayerState, LstmCell, RecurrentStack, RnnCell};
pub use config::{CellType, DatasetConfig, PoseMdnConfig, TrainingConfig};
pub use data::{PoseBatch, PoseDataset};
pub use error::{PoseMdnError, PoseMdnResult};
pub use mdn::{mixture_nll, MixtureHead, MixtureParams};
pub use model::PoseMdn;
pub use optimizer::{ClippedAdam, OptimizerConfig};
pub use sampler::{
    sample_to_file, TrajectorySampler, UpdatePolicy, DEFAULT_SAMPLE_STEPS, SEED_POSE,
};
pub use trainer::{load_checkpoint, StepMetrics, Trainer, TrainingSummary};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{CellType, PoseMdnConfig};
    pub use crate::data::PoseDataset;
    pub use crate::error::{PoseMdnError, PoseMdnResult};
    pub use crate::model::PoseMdn;
    pub use crate::sampler::{TrajectorySampler, UpdatePolicy};
    pub use crate::trainer::{load_checkpoint, Trainer};
}
