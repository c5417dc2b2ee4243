//! Adam with global gradient-norm clipping.
//!
//! Gradients are rescaled so their global L2 norm never exceeds the
//! configured threshold, then applied with standard bias-corrected Adam
//! moment estimates. Moments are keyed by variable name so the optimizer
//! survives variables being registered in any order.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::Tensor;
use candle_nn::VarMap;

use crate::error::PoseMdnResult;

/// Optimizer hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Base learning rate.
    pub learning_rate: f64,
    /// First-moment decay.
    pub beta1: f64,
    /// Second-moment decay.
    pub beta2: f64,
    /// Denominator stabilizer.
    pub eps: f64,
    /// Global gradient-norm clip threshold.
    pub grad_clip: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            grad_clip: 10.0,
        }
    }
}

/// Global L2 norm of all gradients present in `grads`.
pub fn global_grad_norm(var_map: &VarMap, grads: &GradStore) -> PoseMdnResult<f64> {
    let mut total = 0.0f64;
    for var in var_map.all_vars() {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += f64::from(grad.sqr()?.sum_all()?.to_scalar::<f32>()?);
        }
    }
    Ok(total.sqrt())
}

/// Rescale factor bringing a gradient norm inside the clip threshold.
///
/// `grad_clip / norm` when `norm` exceeds `grad_clip`, `1.0` otherwise, so
/// `norm * clip_scale(norm, grad_clip)` never exceeds `grad_clip`.
pub fn clip_scale(norm: f64, grad_clip: f64) -> f64 {
    if norm > grad_clip {
        grad_clip / norm
    } else {
        1.0
    }
}

/// Adam optimizer with global-norm gradient clipping.
pub struct ClippedAdam {
    config: OptimizerConfig,
    first_moments: HashMap<String, Tensor>,
    second_moments: HashMap<String, Tensor>,
    step_count: usize,
}

impl ClippedAdam {
    /// Create an optimizer with the given hyperparameters.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            first_moments: HashMap::new(),
            second_moments: HashMap::new(),
            step_count: 0,
        }
    }

    /// Apply one update to every variable with a gradient.
    ///
    /// Returns the pre-clip global gradient norm.
    pub fn step(&mut self, var_map: &VarMap, grads: &GradStore) -> PoseMdnResult<f64> {
        let norm = global_grad_norm(var_map, grads)?;
        let scale = clip_scale(norm, self.config.grad_clip);

        self.step_count += 1;
        let t = self.step_count as i32;
        let bias1 = 1.0 - self.config.beta1.powi(t);
        let bias2 = 1.0 - self.config.beta2.powi(t);

        let vars = var_map.data().lock().unwrap();
        for (name, var) in vars.iter() {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let grad = (grad * scale)?;
                let m = match self.first_moments.get(name) {
                    Some(m) => ((m * self.config.beta1)? + (&grad * (1.0 - self.config.beta1))?)?,
                    None => (&grad * (1.0 - self.config.beta1))?,
                };
                let v = match self.second_moments.get(name) {
                    Some(v) => {
                        ((v * self.config.beta2)? + (grad.sqr()? * (1.0 - self.config.beta2))?)?
                    }
                    None => (grad.sqr()? * (1.0 - self.config.beta2))?,
                };

                let m_hat = (&m / bias1)?;
                let v_hat = (&v / bias2)?;
                let update =
                    ((m_hat * self.config.learning_rate)? / (v_hat.sqrt()? + self.config.eps)?)?;
                var.set(&var.as_tensor().sub(&update)?)?;

                self.first_moments.insert(name.clone(), m);
                self.second_moments.insert(name.clone(), v);
            }
        }
        Ok(norm)
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    /// Replace the learning rate, keeping accumulated moments.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.config.learning_rate = learning_rate;
    }

    /// Number of updates applied so far.
    pub fn step_count(&self) -> usize {
        self.step_count
    }
}
