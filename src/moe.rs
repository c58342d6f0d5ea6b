// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Intent-conditioned mixture of expert decoders.
//!
//! One step of [`MoeDecoder`] with N intents:
//!
//! ```text
//!   chair:     out_0, hid_0 = chair.step(x, h, E)            (unmasked batch)
//!   expert k:  out_k, hid_k = expert_k.step(x|m_k, h|m_k, E|m_k)
//!              where rows with m_k[b] = true are overwritten with PAD
//!   gate:      w = normalize(exp(log_softmax(W_g [out_0 ; .. ; out_N] + b_g)))   [B, N+1]
//!   mix:       mixed = sum_j w_j * out_j,  mixed_h = sum_j w_j * hid_j
//!   output:    gamma * mixed + (1 - gamma) * out_0   (same for hidden)
//! ```
//!
//! Gate weights are recomputed on every step. Without masks the mixture is
//! bypassed and the chair output is returned as-is.

use crate::cell::{CellType, HiddenState};
use crate::decoder::{check_encoder, AttnDecoder, DecoderStep, StepOutput};
use crate::error::{DecodeError, DecodeResult};
use crate::layers::{collect_params, collect_params_mut, Layer, Linear};
use crate::tensor::{Tensor, TensorError, TensorResult};
use crate::vocab::PAD_TOKEN;

/// Per-intent batch masks. `true` marks an element that does NOT belong to
/// the intent; that element's expert view is overwritten with the pad sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentMasks {
    masks: Vec<Vec<bool>>,
    batch: usize,
}

impl IntentMasks {
    /// Every mask must have the same length (the batch size).
    pub fn new(masks: Vec<Vec<bool>>) -> DecodeResult<Self> {
        let batch = masks.first().map_or(0, Vec::len);
        for (intent, m) in masks.iter().enumerate() {
            if m.len() != batch {
                return Err(DecodeError::MaskShape {
                    intent,
                    expected: batch,
                    got: m.len(),
                });
            }
        }
        Ok(Self { masks, batch })
    }

    /// One intent label per batch element.
    pub fn from_intents(labels: &[usize], n_intents: usize) -> DecodeResult<Self> {
        let sets: Vec<Vec<usize>> = labels.iter().map(|&l| vec![l]).collect();
        Self::from_labels(&sets, n_intents)
    }

    /// Any number of intent labels per batch element.
    pub fn from_labels(label_sets: &[Vec<usize>], n_intents: usize) -> DecodeResult<Self> {
        let mut masks = vec![vec![true; label_sets.len()]; n_intents];
        for (b, labels) in label_sets.iter().enumerate() {
            for &intent in labels {
                let mask = masks.get_mut(intent).ok_or_else(|| {
                    DecodeError::InvalidConfig(format!(
                        "intent label {intent} out of range for {n_intents} intents"
                    ))
                })?;
                mask[b] = false;
            }
        }
        Ok(Self {
            masks,
            batch: label_sets.len(),
        })
    }

    pub fn n_intents(&self) -> usize {
        self.masks.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn mask(&self, intent: usize) -> Option<&[bool]> {
        self.masks.get(intent).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[bool]> {
        self.masks.iter().map(Vec::as_slice)
    }

    /// Whether element `b` belongs to `intent`.
    pub fn belongs(&self, intent: usize, b: usize) -> bool {
        self.mask(intent)
            .and_then(|m| m.get(b))
            .is_some_and(|&masked| !masked)
    }

    pub fn select_rows(&self, rows: &[usize]) -> DecodeResult<Self> {
        let mut masks = Vec::with_capacity(self.masks.len());
        for m in &self.masks {
            let mut sub = Vec::with_capacity(rows.len());
            for &r in rows {
                let v = m.get(r).ok_or(TensorError::IndexOutOfBounds {
                    axis: 0,
                    index: r,
                    bound: self.batch,
                })?;
                sub.push(*v);
            }
            masks.push(sub);
        }
        Ok(Self {
            masks,
            batch: rows.len(),
        })
    }

    /// Single-element view for one beam-search turn.
    pub fn select(&self, b: usize) -> DecodeResult<Self> {
        self.select_rows(&[b])
    }

    /// Mask count must match the expert count and every mask the batch.
    pub fn validate(&self, n_intents: usize, batch: usize) -> DecodeResult<()> {
        if self.masks.len() != n_intents {
            return Err(DecodeError::IntentCount {
                expected: n_intents,
                got: self.masks.len(),
            });
        }
        for (intent, m) in self.masks.iter().enumerate() {
            if m.len() != batch {
                return Err(DecodeError::MaskShape {
                    intent,
                    expected: batch,
                    got: m.len(),
                });
            }
        }
        Ok(())
    }
}

/// Sum over members of `w[b, j] * parts[j][b, :]`.
fn weighted_rows(parts: &[&Tensor], weights: &Tensor) -> TensorResult<Tensor> {
    let (batch, n) = weights.try_dims_2d()?;
    let first = parts.first().ok_or(TensorError::InvalidDimension {
        expected: n,
        got: 0,
    })?;
    if parts.len() != n {
        return Err(TensorError::InvalidDimension {
            expected: n,
            got: parts.len(),
        });
    }
    let width = first.row_width();
    let mut out = vec![0.0f32; batch * width];
    for (j, part) in parts.iter().enumerate() {
        if part.shape() != first.shape() {
            return Err(TensorError::ShapeMismatch {
                lhs: first.shape().dims().to_vec(),
                rhs: part.shape().dims().to_vec(),
            });
        }
        for b in 0..batch {
            let w = weights.data()[b * n + j];
            let src = &part.data()[b * width..(b + 1) * width];
            for (o, x) in out[b * width..(b + 1) * width].iter_mut().zip(src) {
                *o += w * x;
            }
        }
    }
    Ok(Tensor::from_vec(out, first.shape().clone()))
}

/// Learned gate over the chair and the experts.
pub struct MoeGate {
    /// `[(N+1), (N+1) * V]` + bias
    pub fc: Linear,
    n_members: usize,
}

impl MoeGate {
    pub fn new(n_intents: usize, vocab_size: usize, seed: u64) -> Self {
        let n_members = n_intents + 1;
        Self {
            fc: Linear::new(n_members * vocab_size, n_members, true, seed),
            n_members,
        }
    }

    pub fn n_members(&self) -> usize {
        self.n_members
    }

    /// Normalized mixture weights `[B, N+1]`, each row summing to 1.
    pub fn weights(&self, outputs: &[&Tensor]) -> DecodeResult<Tensor> {
        if outputs.len() != self.n_members {
            return Err(DecodeError::IntentCount {
                expected: self.n_members - 1,
                got: outputs.len().saturating_sub(1),
            });
        }
        let cat = Tensor::try_concat_last(outputs)?;
        let mut w = self.fc.forward(&cat)?.log_softmax().exp();
        for row in w.data_mut().chunks_exact_mut(self.n_members) {
            let sum: f32 = row.iter().sum();
            if !sum.is_finite() || sum <= 0.0 {
                return Err(DecodeError::DegenerateGate { sum });
            }
            let inv = 1.0 / sum.max(1e-12);
            for v in row.iter_mut() {
                *v *= inv;
            }
        }
        Ok(w)
    }

    /// Merge member outputs (chair first) into one step output.
    pub fn combine(&self, members: &[StepOutput], gamma: f32) -> DecodeResult<StepOutput> {
        let chair = members.first().ok_or(DecodeError::IntentCount {
            expected: self.n_members - 1,
            got: 0,
        })?;
        let outs: Vec<&Tensor> = members.iter().map(|m| &m.log_probs).collect();
        let w = self.weights(&outs)?;

        let mixed = weighted_rows(&outs, &w)?;
        let components = chair.hidden.tensors().len();
        let mut mixed_hidden = Vec::with_capacity(components);
        for i in 0..components {
            let mut parts = Vec::with_capacity(members.len());
            for m in members {
                let comps = m.hidden.tensors();
                let t = comps.get(i).ok_or_else(|| DecodeError::HiddenStateMismatch {
                    expected: chair.hidden.kind().to_string(),
                    got: m.hidden.kind().to_string(),
                })?;
                parts.push(*t);
            }
            mixed_hidden.push(weighted_rows(&parts, &w)?);
        }
        let mut comps = mixed_hidden.into_iter();
        let mixed_hidden = match (comps.next(), comps.next()) {
            (Some(h), None) => HiddenState::Single(h),
            (Some(h), Some(c)) => HiddenState::Pair { h, c },
            _ => {
                return Err(DecodeError::HiddenStateMismatch {
                    expected: chair.hidden.kind().to_string(),
                    got: "empty".to_string(),
                })
            }
        };

        Ok(StepOutput {
            log_probs: mixed.try_lerp(&chair.log_probs, gamma)?,
            hidden: mixed_hidden.lerp(&chair.hidden, gamma)?,
        })
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        self.fc.parameters()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.fc.parameters_mut()
    }
}

/// Chair decoder plus one attention expert per intent.
pub struct MoeDecoder {
    pub chair: AttnDecoder,
    pub experts: Vec<AttnDecoder>,
    pub gate: MoeGate,
    /// Weight of the mixture against the chair output, in [0, 1].
    pub gamma: f32,
}

impl MoeDecoder {
    pub fn new(
        vocab_size: usize,
        embedding_size: usize,
        hidden_size: usize,
        cell_type: CellType,
        n_intents: usize,
        gamma: f32,
        seed: u64,
    ) -> Self {
        let experts = (0..n_intents)
            .map(|k| {
                AttnDecoder::new(
                    vocab_size,
                    embedding_size,
                    hidden_size,
                    cell_type,
                    seed.wrapping_add(1000 * (k as u64 + 1)),
                )
            })
            .collect();
        Self {
            chair: AttnDecoder::new(vocab_size, embedding_size, hidden_size, cell_type, seed),
            experts,
            gate: MoeGate::new(n_intents, vocab_size, seed.wrapping_add(50_000)),
            gamma,
        }
    }

    pub fn n_intents(&self) -> usize {
        self.experts.len()
    }

    pub fn expert(&self, intent: usize) -> Option<&AttnDecoder> {
        self.experts.get(intent)
    }

    /// Chair output followed by each expert's output on its masked view.
    pub fn member_outputs(
        &self,
        prev_tokens: &[usize],
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        masks: &IntentMasks,
    ) -> DecodeResult<Vec<StepOutput>> {
        let batch = hidden.batch_size();
        if prev_tokens.len() != batch {
            return Err(DecodeError::BatchMismatch {
                expected: batch,
                got: prev_tokens.len(),
            });
        }
        masks.validate(self.n_intents(), batch)?;
        check_encoder(encoder_outputs, batch, self.chair.hidden_size())?;

        let mut outputs = Vec::with_capacity(self.experts.len() + 1);
        outputs.push(self.chair.step(prev_tokens, hidden, encoder_outputs, None)?);
        let pad = PAD_TOKEN as f32;
        for (expert, mask) in self.experts.iter().zip(masks.iter()) {
            let tokens: Vec<usize> = prev_tokens
                .iter()
                .zip(mask)
                .map(|(&t, &m)| if m { PAD_TOKEN } else { t })
                .collect();
            let hidden_k = hidden.fill_rows(mask, pad)?;
            let encoder_k = encoder_outputs.try_fill_rows(mask, pad)?;
            outputs.push(expert.step(&tokens, &hidden_k, &encoder_k, None)?);
        }
        Ok(outputs)
    }

    /// Gate weights `[B, N+1]` the next step would use.
    pub fn mixture_weights(
        &self,
        prev_tokens: &[usize],
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        masks: &IntentMasks,
    ) -> DecodeResult<Tensor> {
        let members = self.member_outputs(prev_tokens, hidden, encoder_outputs, masks)?;
        let outs: Vec<&Tensor> = members.iter().map(|m| &m.log_probs).collect();
        self.gate.weights(&outs)
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = collect_params!(self.chair, self.gate);
        for e in &self.experts {
            params.extend(e.parameters());
        }
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = collect_params_mut!(self.chair, self.gate);
        for e in &mut self.experts {
            params.extend(e.parameters_mut());
        }
        params
    }
}

impl DecoderStep for MoeDecoder {
    fn vocab_size(&self) -> usize {
        self.chair.vocab_size()
    }

    fn step(
        &self,
        prev_tokens: &[usize],
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        masks: Option<&IntentMasks>,
    ) -> DecodeResult<StepOutput> {
        match masks {
            None => self.chair.step(prev_tokens, hidden, encoder_outputs, None),
            Some(masks) => {
                let members = self.member_outputs(prev_tokens, hidden, encoder_outputs, masks)?;
                self.gate.combine(&members, self.gamma)
            }
        }
    }
}
