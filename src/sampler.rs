//! Autoregressive trajectory sampling.
//!
//! A [`TrajectorySampler`] drives a trained [`PoseMdn`] one inference step at
//! a time: feed the current pose, pick a mixture component from the mixing
//! weights by inverse-CDF, draw a Gaussian value per dimension from that
//! component, and fold the draw into the pose through an [`UpdatePolicy`].
//! The sampler is a finite iterator yielding the seed pose followed by
//! exactly `num` updated poses; writing to a sink is left to consumers such
//! as [`write_trajectory`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use candle_core::Tensor;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::cells::LayerState;
use crate::data::format_pose;
use crate::error::{PoseMdnError, PoseMdnResult};
use crate::model::PoseMdn;

/// Starting pose for trajectory generation: three absolute position channels
/// at the origin plus three accumulated rate channels.
pub const SEED_POSE: [f64; 6] = [0.0, 0.0, 0.0, 2.095364, 16.073411, -18813.618895];

/// Default number of generated steps per sampling run.
pub const DEFAULT_SAMPLE_STEPS: usize = 1200;

/// How a sampled value folds into the current pose.
///
/// The leading channels are absolute positions: the pose value is replaced by
/// the sampled value divided by its scale. The trailing channels are rates:
/// the pose value is incremented by the sampled value divided by its scale.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePolicy {
    /// Divisors for the replaced leading channels.
    pub replace_scales: Vec<f64>,
    /// Divisors for the incremented trailing channels.
    pub increment_scales: Vec<f64>,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            replace_scales: vec![100.0; 3],
            increment_scales: vec![1.0, 1.0, 0.001],
        }
    }
}

impl UpdatePolicy {
    /// Pose dimensionality this policy applies to.
    pub fn dim(&self) -> usize {
        self.replace_scales.len() + self.increment_scales.len()
    }

    /// Fold a sampled value into `pose` in place.
    pub fn apply(&self, pose: &mut [f64], sample: &[f64]) -> PoseMdnResult<()> {
        if pose.len() != self.dim() || sample.len() != self.dim() {
            return Err(PoseMdnError::sampling(format!(
                "update policy covers {} dimensions, got pose of {} and sample of {}",
                self.dim(),
                pose.len(),
                sample.len()
            )));
        }
        let split = self.replace_scales.len();
        for (i, scale) in self.replace_scales.iter().enumerate() {
            pose[i] = sample[i] / scale;
        }
        for (i, scale) in self.increment_scales.iter().enumerate() {
            pose[split + i] += sample[split + i] / scale;
        }
        Ok(())
    }
}

/// Inverse-CDF categorical selection.
///
/// Walks the cumulative sum of `weights` and returns the first index whose
/// running total reaches `u`. Returns `None` when the total never reaches
/// `u`, which for normalized weights can only happen through floating-point
/// rounding.
pub fn select_component(u: f64, weights: &[f32]) -> Option<usize> {
    let mut acc = 0.0f64;
    for (idx, w) in weights.iter().enumerate() {
        acc += f64::from(*w);
        if acc >= u {
            return Some(idx);
        }
    }
    None
}

/// [`select_component`] with the sampling fall-through applied: an
/// unreachable draw selects the last component and emits a warning.
pub fn select_component_or_last(u: f64, weights: &[f32]) -> usize {
    match select_component(u, weights) {
        Some(idx) => idx,
        None => {
            tracing::warn!(
                "no mixture component reached draw {u:.6}, falling back to the last component"
            );
            weights.len() - 1
        }
    }
}

/// Finite iterator of sampled poses.
///
/// Yields the seed pose first, then exactly `num` generated poses. The
/// iterator is not restartable: hidden state advances with every step. A
/// model error ends the iteration after yielding it once.
pub struct TrajectorySampler<'a, R: Rng> {
    model: &'a PoseMdn,
    rng: R,
    policy: UpdatePolicy,
    state: Vec<LayerState>,
    pose: Vec<f64>,
    remaining: usize,
    seed_pending: bool,
    failed: bool,
}

impl<'a, R: Rng> TrajectorySampler<'a, R> {
    /// Sampler starting from [`SEED_POSE`] with the default update policy.
    pub fn new(model: &'a PoseMdn, num_steps: usize, rng: R) -> PoseMdnResult<Self> {
        Self::with_start(
            model,
            num_steps,
            rng,
            SEED_POSE.to_vec(),
            UpdatePolicy::default(),
        )
    }

    /// Sampler with an explicit starting pose and update policy.
    pub fn with_start(
        model: &'a PoseMdn,
        num_steps: usize,
        rng: R,
        start: Vec<f64>,
        policy: UpdatePolicy,
    ) -> PoseMdnResult<Self> {
        if policy.dim() != model.dim() {
            return Err(PoseMdnError::config(format!(
                "update policy covers {} dimensions, model produces {}",
                policy.dim(),
                model.dim()
            )));
        }
        if start.len() != model.dim() {
            return Err(PoseMdnError::config(format!(
                "starting pose has {} dimensions, model expects {}",
                start.len(),
                model.dim()
            )));
        }
        let state = model.zero_state(1)?;
        Ok(Self {
            model,
            rng,
            policy,
            state,
            pose: start,
            remaining: num_steps,
            seed_pending: true,
            failed: false,
        })
    }

    /// Run one sampling step: feed the current pose, draw, update.
    fn advance(&mut self) -> PoseMdnResult<Vec<f64>> {
        let dim = self.pose.len();
        let input: Vec<f32> = self.pose.iter().map(|&v| v as f32).collect();
        let input = Tensor::from_vec(input, (1, 1, dim), self.model.device())?;

        let state = std::mem::take(&mut self.state);
        let (params, state) = self.model.step(&input, state)?;
        self.state = state;

        let pi = params.pi().squeeze(0)?.to_vec1::<f32>()?;
        let mu = params.mu().squeeze(0)?.to_vec2::<f32>()?;
        let sigma = params.sigma().squeeze(0)?.to_vec2::<f32>()?;

        let u: f64 = self.rng.random();
        let idx = select_component_or_last(u, &pi);

        let mut sample = vec![0.0f64; dim];
        for (d, value) in sample.iter_mut().enumerate() {
            let z: f64 = self.rng.sample(StandardNormal);
            *value = f64::from(mu[d][idx]) + f64::from(sigma[d][idx]) / 3.0 * z;
        }

        self.policy.apply(&mut self.pose, &sample)?;
        Ok(self.pose.clone())
    }
}

impl<R: Rng> Iterator for TrajectorySampler<'_, R> {
    type Item = PoseMdnResult<Vec<f64>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.seed_pending {
            self.seed_pending = false;
            return Some(Ok(self.pose.clone()));
        }
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.advance() {
            Ok(pose) => Some(Ok(pose)),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let len = self.remaining + usize::from(self.seed_pending);
        (len, Some(len))
    }
}

/// Drain a pose iterator into a sink, one formatted line per pose.
///
/// Output is buffered and flushed once the iterator is exhausted. Returns the
/// number of lines written.
pub fn write_trajectory<W, I>(sink: W, poses: I) -> PoseMdnResult<usize>
where
    W: Write,
    I: IntoIterator<Item = PoseMdnResult<Vec<f64>>>,
{
    let mut writer = BufWriter::new(sink);
    let mut count = 0;
    for pose in poses {
        let pose = pose?;
        writeln!(writer, "{}", format_pose(&pose))?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Sample a trajectory from [`SEED_POSE`] and write it to a file.
///
/// Writes `num_steps + 1` lines: the seed pose, then one line per generated
/// step. Returns the number of lines written.
pub fn sample_to_file<R, P>(
    model: &PoseMdn,
    num_steps: usize,
    rng: R,
    path: P,
) -> PoseMdnResult<usize>
where
    R: Rng,
    P: AsRef<Path>,
{
    let sampler = TrajectorySampler::new(model, num_steps, rng)?;
    let file = File::create(path.as_ref())?;
    write_trajectory(file, sampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoseMdnConfig;
    use candle_core::Device;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_model() -> PoseMdn {
        let config = PoseMdnConfig::test();
        PoseMdn::new(&config, 6, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_select_component_even_weights() {
        // Draws 0.3 and 0.7 over [0.5, 0.5] pick components 0 and 1.
        assert_eq!(select_component(0.3, &[0.5, 0.5]), Some(0));
        assert_eq!(select_component(0.7, &[0.5, 0.5]), Some(1));
    }

    #[test]
    fn test_select_component_boundary() {
        assert_eq!(select_component(0.3, &[0.3, 0.7]), Some(0));
        assert_eq!(select_component(0.31, &[0.3, 0.7]), Some(1));
        assert_eq!(select_component(0.0, &[0.3, 0.7]), Some(0));
    }

    #[test]
    fn test_select_component_unreachable_draw() {
        assert_eq!(select_component(0.9, &[0.3, 0.3]), None);
    }

    #[test]
    fn test_unreachable_draw_falls_back_to_last_component() {
        // Rounding can leave the cumulative sum below the draw; the last
        // component stands in.
        assert_eq!(select_component_or_last(0.9, &[0.3, 0.3]), 1);
        assert_eq!(select_component_or_last(0.2, &[0.3, 0.3]), 0);
    }

    #[test]
    fn test_update_policy_split() {
        let policy = UpdatePolicy::default();
        let mut pose = vec![0.0, 0.0, 0.0, 2.0, 16.0, -18000.0];
        let sample = vec![10.0, 20.0, 30.0, 0.5, 0.5, 0.0006];
        policy.apply(&mut pose, &sample).unwrap();

        assert_eq!(pose[0], 0.1);
        assert_eq!(pose[1], 0.2);
        assert_eq!(pose[2], 0.3);
        assert_eq!(pose[3], 2.5);
        assert_eq!(pose[4], 16.5);
        // The last channel accumulates sample / 0.001.
        assert!((pose[5] - (-17999.4)).abs() < 1e-9, "got {}", pose[5]);
    }

    #[test]
    fn test_update_policy_rejects_wrong_dim() {
        let policy = UpdatePolicy::default();
        let mut pose = vec![0.0; 5];
        let sample = vec![0.0; 5];
        assert!(policy.apply(&mut pose, &sample).is_err());
    }

    #[test]
    fn test_sampler_yields_seed_then_num_poses() {
        let model = test_model();
        let rng = ChaCha8Rng::seed_from_u64(1);
        let sampler = TrajectorySampler::new(&model, 3, rng).unwrap();
        assert_eq!(sampler.size_hint(), (4, Some(4)));

        let poses: Vec<_> = sampler.collect::<PoseMdnResult<_>>().unwrap();
        assert_eq!(poses.len(), 4);
        assert_eq!(poses[0], SEED_POSE.to_vec());
        for pose in &poses {
            assert_eq!(pose.len(), 6);
        }
    }

    #[test]
    fn test_sampler_zero_steps_yields_seed_only() {
        let model = test_model();
        let rng = ChaCha8Rng::seed_from_u64(1);
        let poses: Vec<_> = TrajectorySampler::new(&model, 0, rng)
            .unwrap()
            .collect::<PoseMdnResult<_>>()
            .unwrap();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0], SEED_POSE.to_vec());
    }

    #[test]
    fn test_sampler_is_deterministic_per_seed() {
        let model = test_model();
        let run = |seed: u64| -> Vec<Vec<f64>> {
            TrajectorySampler::new(&model, 5, ChaCha8Rng::seed_from_u64(seed))
                .unwrap()
                .collect::<PoseMdnResult<_>>()
                .unwrap()
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn test_sampler_rejects_mismatched_start() {
        let model = test_model();
        let rng = ChaCha8Rng::seed_from_u64(1);
        let result = TrajectorySampler::with_start(
            &model,
            1,
            rng,
            vec![0.0; 4],
            UpdatePolicy::default(),
        );
        assert!(matches!(result, Err(PoseMdnError::Config(_))));
    }

    #[test]
    fn test_sampler_rejects_mismatched_policy() {
        let model = test_model();
        let rng = ChaCha8Rng::seed_from_u64(1);
        let policy = UpdatePolicy {
            replace_scales: vec![100.0; 2],
            increment_scales: vec![1.0, 1.0, 0.001],
        };
        let result =
            TrajectorySampler::with_start(&model, 1, rng, SEED_POSE.to_vec(), policy);
        assert!(matches!(result, Err(PoseMdnError::Config(_))));
    }

    #[test]
    fn test_write_trajectory_formats_lines() {
        let poses = vec![Ok(vec![0.0, 1.5]), Ok(vec![-2.0, 3.25])];
        let mut out = Vec::new();
        let written = write_trajectory(&mut out, poses).unwrap();
        assert_eq!(written, 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "0.000000 1.500000\n-2.000000 3.250000\n");
    }

    #[test]
    fn test_write_trajectory_stops_on_error() {
        let poses = vec![
            Ok(vec![0.0]),
            Err(PoseMdnError::sampling("boom")),
            Ok(vec![1.0]),
        ];
        let mut out = Vec::new();
        let result = write_trajectory(&mut out, poses);
        assert!(result.is_err());
    }
}
