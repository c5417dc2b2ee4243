//! Mixture-density head: projection, parameter recovery, and likelihood.
//!
//! For `M` mixture components over `D` output dimensions, the head projects
//! each hidden vector to `M * (1 + 2 * D)` raw values laid out as `M` mixing
//! logits followed by, per dimension, `M` means and `M` raw log-scales. The
//! mixing weights are shared across dimensions; each dimension is modeled as
//! an independent univariate Gaussian mixture under those weights.

use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

use crate::error::{PoseMdnError, PoseMdnResult};

/// Floor applied to the mixture density before taking the log.
pub const LOSS_FLOOR: f64 = 1e-20;

/// `sqrt(2 * pi)`, the univariate normal normalizing constant.
const SQRT_TWO_PI: f64 = 2.5066282746310002;

/// Affine projection from hidden vectors to raw mixture parameters.
pub struct MixtureHead {
    weight: Tensor,
    bias: Tensor,
    num_mixture: usize,
    dim: usize,
}

impl MixtureHead {
    /// Create a head projecting `hidden`-wide vectors to `M * (1 + 2 * dim)`
    /// raw outputs.
    pub fn new(
        hidden: usize,
        num_mixture: usize,
        dim: usize,
        vb: VarBuilder,
    ) -> PoseMdnResult<Self> {
        let out = num_mixture * (1 + 2 * dim);
        let weight = vb.get_with_hints(
            (hidden, out),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(out, "bias", candle_nn::Init::Const(0.0))?;
        Ok(Self {
            weight,
            bias,
            num_mixture,
            dim,
        })
    }

    /// Project hidden vectors of shape `(rows, hidden)` to raw parameters of
    /// shape `(rows, M * (1 + 2 * dim))`.
    pub fn project(&self, hidden: &Tensor) -> PoseMdnResult<Tensor> {
        Ok(hidden.matmul(&self.weight)?.broadcast_add(&self.bias)?)
    }

    /// Width of the raw output per row.
    pub fn output_width(&self) -> usize {
        self.num_mixture * (1 + 2 * self.dim)
    }
}

/// Recovered mixture parameters for a batch of rows.
///
/// One row corresponds to one time step of one sequence.
#[derive(Debug, Clone)]
pub struct MixtureParams {
    pi: Tensor,
    mu: Tensor,
    sigma: Tensor,
}

impl MixtureParams {
    /// Recover mixture parameters from raw head output.
    ///
    /// `raw` has shape `(rows, M * (1 + 2 * dim))`. Mixing logits are
    /// normalized with a max-subtraction before exponentiation so large
    /// logits cannot overflow; scales are `exp(raw) + sig_epsilon`, strictly
    /// positive.
    pub fn from_raw(
        raw: &Tensor,
        num_mixture: usize,
        dim: usize,
        sig_epsilon: f64,
    ) -> PoseMdnResult<Self> {
        let (rows, width) = raw.dims2()?;
        let expected = num_mixture * (1 + 2 * dim);
        if width != expected {
            return Err(PoseMdnError::shape_mismatch(
                format!("({rows}, {expected}) raw mixture output"),
                format!("({rows}, {width})"),
            ));
        }

        let logits = raw.narrow(1, 0, num_mixture)?;
        let max = logits.max_keepdim(D::Minus1)?;
        let exp = logits.broadcast_sub(&max)?.exp()?;
        let sum = exp.sum_keepdim(D::Minus1)?;
        let pi = exp.broadcast_div(&sum)?;

        // Per-dimension blocks: M means then M raw log-scales.
        let blocks = raw
            .narrow(1, num_mixture, 2 * dim * num_mixture)?
            .reshape((rows, dim, 2, num_mixture))?;
        let mu = blocks.narrow(2, 0, 1)?.squeeze(2)?;
        let sigma = (blocks.narrow(2, 1, 1)?.squeeze(2)?.exp()? + sig_epsilon)?;

        Ok(Self { pi, mu, sigma })
    }

    /// Mixing weights, shape `(rows, M)`.
    pub fn pi(&self) -> &Tensor {
        &self.pi
    }

    /// Component means, shape `(rows, dim, M)`.
    pub fn mu(&self) -> &Tensor {
        &self.mu
    }

    /// Component scales, shape `(rows, dim, M)`.
    pub fn sigma(&self) -> &Tensor {
        &self.sigma
    }

    /// Number of mixture components.
    pub fn num_components(&self) -> PoseMdnResult<usize> {
        let (_, m) = self.pi.dims2()?;
        Ok(m)
    }

    /// Number of output dimensions.
    pub fn dim(&self) -> PoseMdnResult<usize> {
        let (_, dim, _) = self.mu.dims3()?;
        Ok(dim)
    }
}

/// Average negative log-likelihood of `targets` under the mixture.
///
/// `targets` has shape `(rows, dim)`. Each dimension contributes
/// `-log(max(sum_m pi_m * N(x_d; mu_md, sigma_md), floor))`; the result is the
/// sum over rows and dimensions divided by `rows * dim`, so it is invariant to
/// proportional rescaling of batch and sequence length.
pub fn mixture_nll(params: &MixtureParams, targets: &Tensor) -> PoseMdnResult<Tensor> {
    let (rows, dim, _) = params.mu.dims3()?;
    let (t_rows, t_dim) = targets.dims2()?;
    if t_rows != rows || t_dim != dim {
        return Err(PoseMdnError::shape_mismatch(
            format!("({rows}, {dim}) targets"),
            format!("({t_rows}, {t_dim})"),
        ));
    }

    let diff = targets.unsqueeze(2)?.broadcast_sub(&params.mu)?;
    let exponent = (diff.sqr()?.neg()? / (params.sigma.sqr()? * 2.0)?)?;
    let gauss = (exponent.exp()? / (&params.sigma * SQRT_TWO_PI)?)?;
    let weighted = gauss.broadcast_mul(&params.pi.unsqueeze(1)?)?;
    let density = weighted.sum(D::Minus1)?;
    let nll = density.maximum(LOSS_FLOOR)?.log()?.neg()?;
    Ok((nll.sum_all()? / (rows * dim) as f64)?)
}
