//! Pose corpus loading and batching.
//!
//! A corpus is a plain-text file with one pose per line: `D` decimal numbers
//! separated by whitespace. Every line must have the same dimensionality;
//! blank lines are skipped. Poses are kept as `f64` and narrowed to `f32`
//! only when tensors are built.

use std::fs;
use std::path::Path;

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{PoseMdnError, PoseMdnResult};

/// Format a pose the way the sampler writes it: fixed-point, six decimal
/// digits, single spaces.
pub fn format_pose(pose: &[f64]) -> String {
    pose.iter()
        .map(|v| format!("{v:.6}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse one corpus line into a pose. `line_no` is 1-based and only used in
/// error messages.
pub fn parse_pose_line(line: &str, line_no: usize) -> PoseMdnResult<Vec<f64>> {
    line.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                PoseMdnError::data(format!("line {line_no}: invalid number `{token}`"))
            })
        })
        .collect()
}

/// One training batch: inputs and the same sequences shifted by one step.
#[derive(Debug, Clone)]
pub struct PoseBatch {
    /// Shape `(batch_size, seq_length, dim)`.
    pub inputs: Tensor,
    /// Shape `(batch_size, seq_length, dim)`.
    pub targets: Tensor,
}

/// An in-memory pose corpus.
#[derive(Debug, Clone)]
pub struct PoseDataset {
    poses: Vec<Vec<f64>>,
    dim: usize,
}

impl PoseDataset {
    /// Load a corpus from a text file.
    pub fn load<P: AsRef<Path>>(path: P) -> PoseMdnResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| PoseMdnError::data(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&contents)
    }

    /// Parse a corpus from text.
    pub fn parse(contents: &str) -> PoseMdnResult<Self> {
        let mut poses = Vec::new();
        let mut dim = 0;
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let pose = parse_pose_line(line, idx + 1)?;
            if dim == 0 {
                dim = pose.len();
            } else if pose.len() != dim {
                return Err(PoseMdnError::data(format!(
                    "line {}: expected {dim} values, got {}",
                    idx + 1,
                    pose.len()
                )));
            }
            poses.push(pose);
        }
        if poses.is_empty() {
            return Err(PoseMdnError::data("corpus contains no poses"));
        }
        Ok(Self { poses, dim })
    }

    /// Number of poses in the corpus.
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Whether the corpus is empty. Always false for a parsed corpus.
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Pose dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The pose at `index`.
    pub fn pose(&self, index: usize) -> Option<&[f64]> {
        self.poses.get(index).map(Vec::as_slice)
    }

    /// Number of non-overlapping training windows of `seq_length + 1` poses.
    pub fn num_windows(&self, seq_length: usize) -> usize {
        self.poses.len() / (seq_length + 1)
    }

    /// Build one epoch of shuffled batches.
    ///
    /// The corpus is split into non-overlapping windows of `seq_length + 1`
    /// poses; window order is shuffled with `rng`, and windows that do not
    /// fill a final batch are dropped. Within a window, inputs are poses
    /// `0..seq_length` and targets are poses `1..=seq_length`.
    pub fn epoch_batches<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        seq_length: usize,
        device: &Device,
        rng: &mut R,
    ) -> PoseMdnResult<Vec<PoseBatch>> {
        let window = seq_length + 1;
        let num_windows = self.poses.len() / window;
        if num_windows < batch_size {
            return Err(PoseMdnError::data(format!(
                "corpus yields {num_windows} windows of {window} poses, need at least {batch_size} for one batch"
            )));
        }

        let mut starts: Vec<usize> = (0..num_windows).map(|w| w * window).collect();
        starts.shuffle(rng);

        let mut batches = Vec::with_capacity(num_windows / batch_size);
        for chunk in starts.chunks_exact(batch_size) {
            let mut inputs = Vec::with_capacity(batch_size * seq_length * self.dim);
            let mut targets = Vec::with_capacity(batch_size * seq_length * self.dim);
            for &start in chunk {
                for t in 0..seq_length {
                    inputs.extend(self.poses[start + t].iter().map(|&v| v as f32));
                    targets.extend(self.poses[start + t + 1].iter().map(|&v| v as f32));
                }
            }
            let shape = (batch_size, seq_length, self.dim);
            batches.push(PoseBatch {
                inputs: Tensor::from_vec(inputs, shape, device)?,
                targets: Tensor::from_vec(targets, shape, device)?,
            });
        }
        Ok(batches)
    }
}
