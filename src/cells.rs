//! Recurrent cells and the layer stack.
//!
//! Three cell variants are supported, selected once at construction via
//! [`CellType`](crate::config::CellType) rather than re-dispatched per step:
//!
//! - [`RnnCell`]: a single tanh activation over the affine input/hidden sum.
//! - [`GruCell`]: reset/update gates plus a candidate activation; the gate
//!   bias starts at 1.0 so both gates begin open.
//! - [`LstmCell`]: input/candidate/forget/output gates with a separate carry
//!   state and a unit forget-gate bias.
//!
//! A [`RecurrentStack`] chains `num_layers` cells of one variant, feeding each
//! layer's output to the next, with optional dropout on the top output during
//! training.

use candle_core::{DType, Device, Tensor};
use candle_nn::{ops, VarBuilder};

use crate::config::CellType;
use crate::error::{PoseMdnError, PoseMdnResult};

/// Recurrent state for one layer.
///
/// `h` always holds the hidden activation of shape `(batch, rnn_size)`; `c`
/// holds the carry state for LSTM-like cells and is `None` for the others.
#[derive(Debug, Clone)]
pub struct LayerState {
    /// Hidden activation, shape `(batch, rnn_size)`.
    pub h: Tensor,
    /// Carry state for LSTM-like cells, same shape as `h`.
    pub c: Option<Tensor>,
}

/// Basic recurrent cell: `h' = tanh(x W + h U + b)`.
#[derive(Debug)]
pub struct RnnCell {
    w_ih: Tensor,
    w_hh: Tensor,
    bias: Tensor,
}

impl RnnCell {
    /// Create a cell mapping `in_dim` inputs to a `hidden`-wide state.
    pub fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> PoseMdnResult<Self> {
        let w_ih = vb.get_with_hints(
            (in_dim, hidden),
            "weight_ih",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let w_hh = vb.get_with_hints(
            (hidden, hidden),
            "weight_hh",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(hidden, "bias", candle_nn::Init::Const(0.0))?;
        Ok(Self { w_ih, w_hh, bias })
    }

    fn step(&self, x: &Tensor, h: &Tensor) -> PoseMdnResult<Tensor> {
        let pre = (x.matmul(&self.w_ih)? + h.matmul(&self.w_hh)?)?.broadcast_add(&self.bias)?;
        Ok(pre.tanh()?)
    }
}

/// Gated recurrent cell.
///
/// Reset and update gates are packed into one `(_, 2 * hidden)` projection;
/// the candidate activation has its own weights. The new state mixes the old
/// state and the candidate through the update gate.
#[derive(Debug)]
pub struct GruCell {
    w_gates_x: Tensor,
    w_gates_h: Tensor,
    b_gates: Tensor,
    w_cand_x: Tensor,
    w_cand_h: Tensor,
    b_cand: Tensor,
    hidden: usize,
}

impl GruCell {
    /// Create a cell mapping `in_dim` inputs to a `hidden`-wide state.
    pub fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> PoseMdnResult<Self> {
        let w_gates_x = vb.get_with_hints(
            (in_dim, 2 * hidden),
            "gates_weight_ih",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let w_gates_h = vb.get_with_hints(
            (hidden, 2 * hidden),
            "gates_weight_hh",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        // Gate bias starts at 1.0 so reset/update gates begin open.
        let b_gates = vb.get_with_hints(2 * hidden, "gates_bias", candle_nn::Init::Const(1.0))?;
        let w_cand_x = vb.get_with_hints(
            (in_dim, hidden),
            "cand_weight_ih",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let w_cand_h = vb.get_with_hints(
            (hidden, hidden),
            "cand_weight_hh",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let b_cand = vb.get_with_hints(hidden, "cand_bias", candle_nn::Init::Const(0.0))?;
        Ok(Self {
            w_gates_x,
            w_gates_h,
            b_gates,
            w_cand_x,
            w_cand_h,
            b_cand,
            hidden,
        })
    }

    fn step(&self, x: &Tensor, h: &Tensor) -> PoseMdnResult<Tensor> {
        let gates = (x.matmul(&self.w_gates_x)? + h.matmul(&self.w_gates_h)?)?
            .broadcast_add(&self.b_gates)?;
        let gates = ops::sigmoid(&gates)?;
        let reset = gates.narrow(1, 0, self.hidden)?;
        let update = gates.narrow(1, self.hidden, self.hidden)?;
        let cand = (x.matmul(&self.w_cand_x)? + (reset * h)?.matmul(&self.w_cand_h)?)?
            .broadcast_add(&self.b_cand)?
            .tanh()?;
        let new_h = ((&update * h)? + (update.affine(-1.0, 1.0)? * cand)?)?;
        Ok(new_h)
    }
}

/// LSTM-like cell with a separate carry state.
///
/// Gates are packed in input/candidate/forget/output order into one
/// `(_, 4 * hidden)` projection. The forget gate's pre-activation is shifted
/// by +1 so the carry state is retained early in training.
#[derive(Debug)]
pub struct LstmCell {
    w_ih: Tensor,
    w_hh: Tensor,
    bias: Tensor,
    hidden: usize,
}

impl LstmCell {
    /// Create a cell mapping `in_dim` inputs to a `hidden`-wide state.
    pub fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> PoseMdnResult<Self> {
        let w_ih = vb.get_with_hints(
            (in_dim, 4 * hidden),
            "weight_ih",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let w_hh = vb.get_with_hints(
            (hidden, 4 * hidden),
            "weight_hh",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(4 * hidden, "bias", candle_nn::Init::Const(0.0))?;
        Ok(Self {
            w_ih,
            w_hh,
            bias,
            hidden,
        })
    }

    fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> PoseMdnResult<(Tensor, Tensor)> {
        let gates = (x.matmul(&self.w_ih)? + h.matmul(&self.w_hh)?)?.broadcast_add(&self.bias)?;
        let input = gates.narrow(1, 0, self.hidden)?;
        let cand = gates.narrow(1, self.hidden, self.hidden)?;
        let forget = gates.narrow(1, 2 * self.hidden, self.hidden)?;
        let output = gates.narrow(1, 3 * self.hidden, self.hidden)?;
        // Unit forget bias.
        let forget = ops::sigmoid(&forget.affine(1.0, 1.0)?)?;
        let new_c = ((forget * c)? + (ops::sigmoid(&input)? * cand.tanh()?)?)?;
        let new_h = (new_c.tanh()? * ops::sigmoid(&output)?)?;
        Ok((new_h, new_c))
    }
}

enum Cell {
    Simple(RnnCell),
    Gated(GruCell),
    Lstm(LstmCell),
}

impl Cell {
    fn new(
        cell_type: CellType,
        in_dim: usize,
        hidden: usize,
        vb: VarBuilder,
    ) -> PoseMdnResult<Self> {
        match cell_type {
            CellType::SimpleRecurrent => Ok(Self::Simple(RnnCell::new(in_dim, hidden, vb)?)),
            CellType::GatedRecurrent => Ok(Self::Gated(GruCell::new(in_dim, hidden, vb)?)),
            CellType::LstmLike => Ok(Self::Lstm(LstmCell::new(in_dim, hidden, vb)?)),
        }
    }

    fn zero_state(&self, batch: usize, hidden: usize, device: &Device) -> PoseMdnResult<LayerState> {
        let h = Tensor::zeros((batch, hidden), DType::F32, device)?;
        let c = match self {
            Cell::Lstm(_) => Some(h.zeros_like()?),
            _ => None,
        };
        Ok(LayerState { h, c })
    }

    fn step(&self, x: &Tensor, state: &mut LayerState) -> PoseMdnResult<Tensor> {
        match self {
            Cell::Simple(cell) => {
                let h = cell.step(x, &state.h)?;
                state.h = h.clone();
                Ok(h)
            }
            Cell::Gated(cell) => {
                let h = cell.step(x, &state.h)?;
                state.h = h.clone();
                Ok(h)
            }
            Cell::Lstm(cell) => {
                let c = state.c.as_ref().ok_or_else(|| {
                    PoseMdnError::shape_mismatch("hidden and carry state", "hidden state only")
                })?;
                let (h, c) = cell.step(x, &state.h, c)?;
                state.h = h.clone();
                state.c = Some(c);
                Ok(h)
            }
        }
    }
}

/// A stack of recurrent layers sharing one cell variant.
///
/// Layer `i` consumes the output of layer `i - 1`. Dropout, when enabled,
/// applies to the top layer's output only and only in training mode.
pub struct RecurrentStack {
    layers: Vec<Cell>,
    hidden: usize,
    dropout: Option<f32>,
}

impl RecurrentStack {
    /// Build `num_layers` cells of the given variant under `vb`.
    ///
    /// `keep_prob` is the retention probability; `1.0` disables dropout.
    pub fn new(
        cell_type: CellType,
        in_dim: usize,
        hidden: usize,
        num_layers: usize,
        keep_prob: f64,
        vb: VarBuilder,
    ) -> PoseMdnResult<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let layer_in = if i == 0 { in_dim } else { hidden };
            layers.push(Cell::new(
                cell_type,
                layer_in,
                hidden,
                vb.pp(format!("layers.{i}")),
            )?);
        }
        let dropout = if keep_prob < 1.0 {
            Some((1.0 - keep_prob) as f32)
        } else {
            None
        };
        Ok(Self {
            layers,
            hidden,
            dropout,
        })
    }

    /// Zero states for every layer, for a batch of the given size.
    pub fn zero_state(&self, batch: usize, device: &Device) -> PoseMdnResult<Vec<LayerState>> {
        self.layers
            .iter()
            .map(|cell| cell.zero_state(batch, self.hidden, device))
            .collect()
    }

    /// Advance every layer by one time step, mutating `states` in place.
    ///
    /// `input` has shape `(batch, in_dim)`; the returned tensor is the top
    /// layer's output of shape `(batch, rnn_size)`.
    pub fn step(
        &self,
        input: &Tensor,
        states: &mut [LayerState],
        train: bool,
    ) -> PoseMdnResult<Tensor> {
        if states.len() != self.layers.len() {
            return Err(PoseMdnError::shape_mismatch(
                format!("{} layer states", self.layers.len()),
                format!("{}", states.len()),
            ));
        }
        let mut x = input.clone();
        for (cell, state) in self.layers.iter().zip(states.iter_mut()) {
            x = cell.step(&x, state)?;
        }
        if train {
            if let Some(drop_p) = self.dropout {
                x = ops::dropout(&x, drop_p)?;
            }
        }
        Ok(x)
    }

    /// Number of stacked layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Hidden width of each layer.
    pub fn hidden_size(&self) -> usize {
        self.hidden
    }
}
