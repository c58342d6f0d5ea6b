// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Additive (concat) attention over encoder positions.
//!
//! For decoder output h `[B, H]` and encoder outputs E `[B, T, H]`:
//!
//! ```text
//! energy[b, t] = v . tanh(W [h_b ; E_bt] + b_w)     W: [H, 2H], v: [H]
//! weights[b]   = softmax_t(energy[b])
//! context[b]   = sum_t weights[b, t] * E_bt
//! ```
//!
//! Purely functional given its parameters; nothing is cached between steps.

use crate::error::{DecodeError, DecodeResult};
use crate::layers::{collect_params, collect_params_mut, Layer, Linear};
use crate::tensor::{softmax_in_place, Shape, Tensor, TensorError};

/// Alignment weights `[B, T]` and context vectors `[B, H]` for one step.
#[derive(Clone, Debug)]
pub struct Attention {
    pub weights: Tensor,
    pub context: Tensor,
}

pub struct AttentionScorer {
    hidden_size: usize,
    /// `[H, 2H]` + bias
    pub attn: Linear,
    /// `[H]` scoring vector, N(0, 1/sqrt(H))
    pub v: Tensor,
}

impl AttentionScorer {
    pub fn new(hidden_size: usize, seed: u64) -> Self {
        let stdv = 1.0 / (hidden_size.max(1) as f32).sqrt();
        Self {
            hidden_size,
            attn: Linear::new(2 * hidden_size, hidden_size, true, seed),
            v: Tensor::randn(Shape::new(&[hidden_size]), seed.wrapping_add(7)).scale(stdv),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn forward(&self, hidden: &Tensor, encoder_outputs: &Tensor) -> DecodeResult<Attention> {
        let h = self.hidden_size;
        let (batch, hd) = hidden.try_dims_2d()?;
        let (enc_batch, t_len, enc_h) = encoder_outputs.try_dims_3d()?;
        if hd != h || enc_h != h {
            return Err(TensorError::InvalidDimension {
                expected: h,
                got: if hd != h { hd } else { enc_h },
            }
            .into());
        }
        if enc_batch != batch {
            return Err(DecodeError::BatchMismatch {
                expected: batch,
                got: enc_batch,
            });
        }

        // [B*T, 2H] rows of (h_b ; E_bt)
        let enc = encoder_outputs.data();
        let mut cat = Vec::with_capacity(batch * t_len * 2 * h);
        for b in 0..batch {
            let hb = &hidden.data()[b * h..(b + 1) * h];
            for t in 0..t_len {
                cat.extend_from_slice(hb);
                cat.extend_from_slice(&enc[(b * t_len + t) * h..(b * t_len + t + 1) * h]);
            }
        }
        let cat = Tensor::from_vec(cat, Shape::new(&[batch * t_len, 2 * h]));
        let energy = self.attn.forward(&cat)?.tanh();

        let mut weights = vec![0.0f32; batch * t_len];
        for (w, row) in weights.iter_mut().zip(energy.data().chunks_exact(h.max(1))) {
            *w = row.iter().zip(self.v.data()).map(|(e, v)| e * v).sum();
        }
        for row in weights.chunks_exact_mut(t_len.max(1)) {
            softmax_in_place(row);
        }

        let mut context = vec![0.0f32; batch * h];
        for b in 0..batch {
            let ctx = &mut context[b * h..(b + 1) * h];
            for t in 0..t_len {
                let w = weights[b * t_len + t];
                let e = &enc[(b * t_len + t) * h..(b * t_len + t + 1) * h];
                for (c, x) in ctx.iter_mut().zip(e) {
                    *c += w * x;
                }
            }
        }

        Ok(Attention {
            weights: Tensor::from_vec(weights, Shape::new(&[batch, t_len])),
            context: Tensor::from_vec(context, Shape::new(&[batch, h])),
        })
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = collect_params!(self.attn);
        params.push(&self.v);
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = collect_params_mut!(self.attn);
        params.push(&mut self.v);
        params
    }
}
