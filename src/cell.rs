// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Recurrent cells and the decoder hidden state.
//!
//! Gate layouts follow the PyTorch convention so exported weights line up:
//! - GRU:  `[r | z | n]`,  h' = (1 - z) * n + z * h
//! - LSTM: `[i | f | g | o]`, c' = f * c + i * g, h' = o * tanh(c')
//! - RNN:  h' = tanh(W_ih x + W_hh h)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::layers::{collect_params, collect_params_mut, Layer, Linear};
use crate::tensor::{sigmoid, Shape, Tensor, TensorResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Rnn,
    // Bidirectional names are encoder settings; decoding runs one direction.
    #[serde(alias = "bigru")]
    Gru,
    #[serde(alias = "bilstm")]
    Lstm,
}

impl CellType {
    /// Number of stacked gate blocks in the input/hidden projections.
    pub fn gates(self) -> usize {
        match self {
            CellType::Rnn => 1,
            CellType::Gru => 3,
            CellType::Lstm => 4,
        }
    }

    pub fn has_memory(self) -> bool {
        matches!(self, CellType::Lstm)
    }

    /// All-zero hidden state for `batch` rows.
    pub fn zero_state(self, batch: usize, hidden_size: usize) -> HiddenState {
        let shape = Shape::new(&[batch, hidden_size]);
        if self.has_memory() {
            HiddenState::Pair {
                h: Tensor::zeros(shape.clone()),
                c: Tensor::zeros(shape),
            }
        } else {
            HiddenState::Single(Tensor::zeros(shape))
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellType::Rnn => "rnn",
            CellType::Gru => "gru",
            CellType::Lstm => "lstm",
        };
        f.write_str(name)
    }
}

/// Decoder hidden state; every tensor is `[batch, hidden]`.
#[derive(Clone, Debug, PartialEq)]
pub enum HiddenState {
    Single(Tensor),
    Pair { h: Tensor, c: Tensor },
}

impl HiddenState {
    /// The output component (`h`), which attention and the gate read.
    pub fn output(&self) -> &Tensor {
        match self {
            HiddenState::Single(h) | HiddenState::Pair { h, .. } => h,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.output().shape().rows()
    }

    pub fn hidden_size(&self) -> usize {
        self.output().shape().last_dim()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HiddenState::Single(_) => "single",
            HiddenState::Pair { .. } => "pair",
        }
    }

    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            HiddenState::Single(h) => vec![h],
            HiddenState::Pair { h, c } => vec![h, c],
        }
    }

    pub fn try_map(&self, f: impl Fn(&Tensor) -> TensorResult<Tensor>) -> TensorResult<Self> {
        Ok(match self {
            HiddenState::Single(h) => HiddenState::Single(f(h)?),
            HiddenState::Pair { h, c } => HiddenState::Pair { h: f(h)?, c: f(c)? },
        })
    }

    /// Combine two states of the same kind component-wise.
    pub fn try_zip_map(
        &self,
        other: &HiddenState,
        f: impl Fn(&Tensor, &Tensor) -> TensorResult<Tensor>,
    ) -> DecodeResult<Self> {
        match (self, other) {
            (HiddenState::Single(a), HiddenState::Single(b)) => Ok(HiddenState::Single(f(a, b)?)),
            (HiddenState::Pair { h: ha, c: ca }, HiddenState::Pair { h: hb, c: cb }) => {
                Ok(HiddenState::Pair {
                    h: f(ha, hb)?,
                    c: f(ca, cb)?,
                })
            }
            _ => Err(DecodeError::HiddenStateMismatch {
                expected: self.kind().to_string(),
                got: other.kind().to_string(),
            }),
        }
    }

    pub fn select_rows(&self, rows: &[usize]) -> DecodeResult<Self> {
        Ok(self.try_map(|t| t.try_select_rows(rows))?)
    }

    /// Single-row view for element `b`.
    pub fn select(&self, b: usize) -> DecodeResult<Self> {
        self.select_rows(&[b])
    }

    /// Overwrite masked rows of every component with `value`.
    pub fn fill_rows(&self, mask: &[bool], value: f32) -> DecodeResult<Self> {
        Ok(self.try_map(|t| t.try_fill_rows(mask, value))?)
    }

    /// gamma * self + (1 - gamma) * other, component-wise.
    pub fn lerp(&self, other: &HiddenState, gamma: f32) -> DecodeResult<Self> {
        self.try_zip_map(other, |a, b| a.try_lerp(b, gamma))
    }

    /// Check kind and `[batch, hidden]` shape against a cell.
    pub fn validate(&self, cell: CellType, hidden_size: usize) -> DecodeResult<()> {
        let expected_kind = if cell.has_memory() { "pair" } else { "single" };
        if self.kind() != expected_kind {
            return Err(DecodeError::HiddenStateMismatch {
                expected: format!("{expected_kind} state for {cell}"),
                got: self.kind().to_string(),
            });
        }
        let batch = self.batch_size();
        for t in self.tensors() {
            let (rows, width) = t.try_dims_2d()?;
            if rows != batch || width != hidden_size {
                return Err(DecodeError::HiddenStateMismatch {
                    expected: format!("[{batch}, {hidden_size}]"),
                    got: t.shape().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Single-layer recurrent cell with stacked gate projections.
pub struct RecurrentCell {
    cell_type: CellType,
    hidden_size: usize,
    /// `[gates * hidden, input]` + bias
    pub w_ih: Linear,
    /// `[gates * hidden, hidden]` + bias
    pub w_hh: Linear,
}

impl RecurrentCell {
    pub fn new(cell_type: CellType, input_size: usize, hidden_size: usize, seed: u64) -> Self {
        let g = cell_type.gates() * hidden_size;
        let mut w_ih = Linear::new(input_size, g, true, seed);
        let mut w_hh = Linear::new(hidden_size, g, true, seed.wrapping_add(1));
        if cell_type == CellType::Lstm {
            // Both biases feed the forget gate, so its effective bias is 2.
            for bias in [w_ih.bias.as_mut(), w_hh.bias.as_mut()].into_iter().flatten() {
                bias.data_mut()[hidden_size..2 * hidden_size].fill(1.0);
            }
        }
        Self {
            cell_type,
            hidden_size,
            w_ih,
            w_hh,
        }
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// One recurrence step: x `[B, input]`, hidden `[B, H]` -> hidden'.
    pub fn forward(&self, x: &Tensor, hidden: &HiddenState) -> DecodeResult<HiddenState> {
        hidden.validate(self.cell_type, self.hidden_size)?;
        let batch = hidden.batch_size();
        let (x_rows, _) = x.try_dims_2d()?;
        if x_rows != batch {
            return Err(DecodeError::BatchMismatch {
                expected: batch,
                got: x_rows,
            });
        }
        let gi = self.w_ih.forward(x)?;
        let gh = self.w_hh.forward(hidden.output())?;
        let h = self.hidden_size;
        let g = self.cell_type.gates() * h;
        let shape = Shape::new(&[batch, h]);

        let mut h_next = vec![0.0f32; batch * h];
        match hidden {
            HiddenState::Single(h_prev) => {
                for b in 0..batch {
                    let gi = &gi.data()[b * g..(b + 1) * g];
                    let gh = &gh.data()[b * g..(b + 1) * g];
                    let hp = &h_prev.data()[b * h..(b + 1) * h];
                    let out = &mut h_next[b * h..(b + 1) * h];
                    if self.cell_type == CellType::Gru {
                        for j in 0..h {
                            let r = sigmoid(gi[j] + gh[j]);
                            let z = sigmoid(gi[h + j] + gh[h + j]);
                            let n = (gi[2 * h + j] + r * gh[2 * h + j]).tanh();
                            out[j] = (1.0 - z) * n + z * hp[j];
                        }
                    } else {
                        for j in 0..h {
                            out[j] = (gi[j] + gh[j]).tanh();
                        }
                    }
                }
                Ok(HiddenState::Single(Tensor::from_vec(h_next, shape)))
            }
            HiddenState::Pair { c: c_prev, .. } => {
                let mut c_next = vec![0.0f32; batch * h];
                for b in 0..batch {
                    let gi = &gi.data()[b * g..(b + 1) * g];
                    let gh = &gh.data()[b * g..(b + 1) * g];
                    let cp = &c_prev.data()[b * h..(b + 1) * h];
                    for j in 0..h {
                        let i = sigmoid(gi[j] + gh[j]);
                        let f = sigmoid(gi[h + j] + gh[h + j]);
                        let gg = (gi[2 * h + j] + gh[2 * h + j]).tanh();
                        let o = sigmoid(gi[3 * h + j] + gh[3 * h + j]);
                        let c = f * cp[j] + i * gg;
                        c_next[b * h + j] = c;
                        h_next[b * h + j] = o * c.tanh();
                    }
                }
                Ok(HiddenState::Pair {
                    h: Tensor::from_vec(h_next, shape.clone()),
                    c: Tensor::from_vec(c_next, shape),
                })
            }
        }
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        collect_params!(self.w_ih, self.w_hh)
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        collect_params_mut!(self.w_ih, self.w_hh)
    }
}
