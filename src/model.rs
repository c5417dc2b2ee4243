//! The pose mixture-density model.
//!
//! [`PoseMdn`] owns the trainable parameters (a [`VarMap`]), the recurrent
//! stack, and the mixture head. Hidden state is never stored on the model:
//! callers create it with [`PoseMdn::zero_state`] and thread it through
//! [`PoseMdn::forward`] or [`PoseMdn::step`], so independent runs never share
//! state.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::cells::{LayerState, RecurrentStack};
use crate::config::PoseMdnConfig;
use crate::error::{PoseMdnError, PoseMdnResult};
use crate::mdn::{mixture_nll, MixtureHead, MixtureParams};

/// Recurrent mixture-density network over continuous pose vectors.
pub struct PoseMdn {
    stack: RecurrentStack,
    head: MixtureHead,
    var_map: VarMap,
    device: Device,
    dim: usize,
    num_mixture: usize,
    sig_epsilon: f64,
}

impl PoseMdn {
    /// Build a model with freshly initialized parameters.
    ///
    /// `dim` is the pose dimensionality, taken from the corpus rather than
    /// the configuration.
    pub fn new(config: &PoseMdnConfig, dim: usize, device: &Device) -> PoseMdnResult<Self> {
        config.validate()?;
        if dim == 0 {
            return Err(PoseMdnError::config("pose dimension must be at least 1"));
        }

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let stack = RecurrentStack::new(
            config.model,
            dim,
            config.rnn_size,
            config.num_layers,
            config.keep_prob,
            vb.pp("rnn"),
        )?;
        let head = MixtureHead::new(config.rnn_size, config.num_mixture, dim, vb.pp("mdn"))?;

        Ok(Self {
            stack,
            head,
            var_map,
            device: device.clone(),
            dim,
            num_mixture: config.num_mixture,
            sig_epsilon: config.sig_epsilon,
        })
    }

    /// Fresh zero hidden state for a batch of the given size.
    pub fn zero_state(&self, batch: usize) -> PoseMdnResult<Vec<LayerState>> {
        self.stack.zero_state(batch, &self.device)
    }

    /// Run the recurrent encoder and head over a full sequence batch.
    ///
    /// `inputs` has shape `(batch, steps, dim)`. Returns the raw head output
    /// of shape `(batch * steps, M * (1 + 2 * dim))`, rows ordered batch-major,
    /// together with the final hidden state.
    pub fn forward(
        &self,
        inputs: &Tensor,
        mut state: Vec<LayerState>,
        train: bool,
    ) -> PoseMdnResult<(Tensor, Vec<LayerState>)> {
        let (batch, steps, dim) = inputs.dims3()?;
        if dim != self.dim {
            return Err(PoseMdnError::shape_mismatch(
                format!("({batch}, {steps}, {})", self.dim),
                format!("({batch}, {steps}, {dim})"),
            ));
        }

        let mut outputs = Vec::with_capacity(steps);
        for t in 0..steps {
            let x = inputs.narrow(1, t, 1)?.squeeze(1)?;
            outputs.push(self.stack.step(&x, &mut state, train)?);
        }
        let hidden = Tensor::stack(&outputs, 1)?;
        let flat = hidden.reshape((batch * steps, self.stack.hidden_size()))?;
        let raw = self.head.project(&flat)?;
        Ok((raw, state))
    }

    /// Forward pass returning recovered mixture parameters instead of raw
    /// head output.
    pub fn mixture(
        &self,
        inputs: &Tensor,
        state: Vec<LayerState>,
        train: bool,
    ) -> PoseMdnResult<(MixtureParams, Vec<LayerState>)> {
        let (raw, state) = self.forward(inputs, state, train)?;
        let params = MixtureParams::from_raw(&raw, self.num_mixture, self.dim, self.sig_epsilon)?;
        Ok((params, state))
    }

    /// Average negative log-likelihood of `targets` given `inputs`, starting
    /// from a zero hidden state.
    ///
    /// Both tensors have shape `(batch, steps, dim)`; `targets` is the input
    /// sequence shifted by one step.
    pub fn loss(&self, inputs: &Tensor, targets: &Tensor, train: bool) -> PoseMdnResult<Tensor> {
        let (batch, steps, dim) = inputs.dims3()?;
        if targets.dims() != inputs.dims() {
            return Err(PoseMdnError::shape_mismatch(
                format!("({batch}, {steps}, {dim}) targets"),
                format!("{:?}", targets.dims()),
            ));
        }

        let state = self.zero_state(batch)?;
        let (raw, _) = self.forward(inputs, state, train)?;
        let params = MixtureParams::from_raw(&raw, self.num_mixture, self.dim, self.sig_epsilon)?;
        let flat_targets = targets.reshape((batch * steps, dim))?;
        mixture_nll(&params, &flat_targets)
    }

    /// Advance one inference step.
    ///
    /// `pose` must have shape `(1, 1, dim)`: inference runs a single sequence
    /// one step at a time. Dropout is disabled.
    pub fn step(
        &self,
        pose: &Tensor,
        state: Vec<LayerState>,
    ) -> PoseMdnResult<(MixtureParams, Vec<LayerState>)> {
        let (batch, steps, dim) = pose.dims3()?;
        if batch != 1 || steps != 1 || dim != self.dim {
            return Err(PoseMdnError::shape_mismatch(
                format!("(1, 1, {}) inference input", self.dim),
                format!("({batch}, {steps}, {dim})"),
            ));
        }
        self.mixture(pose, state, false)
    }

    /// Save all trainable parameters as a safetensors file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PoseMdnResult<()> {
        self.var_map.save(path.as_ref())?;
        Ok(())
    }

    /// Load trainable parameters from a safetensors file produced by
    /// [`PoseMdn::save`] for an identically configured model.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> PoseMdnResult<()> {
        self.var_map.load(path.as_ref())?;
        Ok(())
    }

    /// Total number of trainable scalar parameters.
    pub fn parameter_count(&self) -> usize {
        self.var_map
            .all_vars()
            .iter()
            .map(|var| var.as_tensor().elem_count())
            .sum()
    }

    /// Pose dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of mixture components.
    pub fn num_mixture(&self) -> usize {
        self.num_mixture
    }

    /// Device holding the parameters.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The underlying variable map, for optimizers.
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }
}
