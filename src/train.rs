// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Training-time decoding: teacher forcing and losses.
//!
//! Key components:
//! - **TrainingStepper**: runs the decoder over a target batch, feeding either
//!   the ground-truth token or its own arg-max, and fills `[B, T, V]`
//! - **NllLoss**: mean negative log-likelihood ignoring `PAD_TOKEN` targets
//! - **LossWeighting**: folds the per-intent auxiliary losses into one scalar
//!
//! Gradients and the optimizer belong to the caller; this module only
//! produces the distributions and loss values it consumes.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::cell::HiddenState;
use crate::config::Config;
use crate::decoder::DecoderStep;
use crate::error::{DecodeError, DecodeResult};
use crate::layers::{Layer, Linear};
use crate::moe::IntentMasks;
use crate::tensor::{Shape, Tensor};
use crate::vocab::{PAD_TOKEN, SOS_TOKEN};

/// Negative log-likelihood over log-probabilities.
///
/// L = -(1/N) * sum_{i: target_i != PAD} log_probs[i, target_i]
///
/// N counts only non-padding targets; when every target is padding the loss
/// is 0 rather than 0/0.
pub struct NllLoss;

impl NllLoss {
    /// `log_probs` is `[.., V]` with one row per entry of `targets`.
    pub fn forward(log_probs: &Tensor, targets: &[usize]) -> DecodeResult<f32> {
        let vocab = log_probs.shape().last_dim();
        let rows = log_probs.numel() / vocab.max(1);
        if rows != targets.len() {
            return Err(DecodeError::BatchMismatch {
                expected: rows,
                got: targets.len(),
            });
        }
        let mut total = 0.0f64;
        let mut count = 0usize;
        for (row, &target) in log_probs.data().chunks_exact(vocab.max(1)).zip(targets) {
            if target == PAD_TOKEN {
                continue;
            }
            let lp = row.get(target).ok_or(DecodeError::TokenOutOfRange {
                id: target,
                vocab_size: vocab,
            })?;
            total -= f64::from(*lp);
            count += 1;
        }
        if count == 0 {
            return Ok(0.0);
        }
        Ok((total / count as f64) as f32)
    }

    /// NLL per intent, with targets of elements outside the intent padded out.
    pub fn per_intent(
        log_probs: &Tensor,
        targets: &[Vec<usize>],
        masks: &IntentMasks,
    ) -> DecodeResult<Vec<f32>> {
        masks.validate(masks.n_intents(), targets.len())?;
        masks
            .iter()
            .map(|mask| {
                let masked: Vec<usize> = targets
                    .iter()
                    .zip(mask)
                    .flat_map(|(row, &m)| {
                        row.iter().map(move |&t| if m { PAD_TOKEN } else { t })
                    })
                    .collect();
                Self::forward(log_probs, &masked)
            })
            .collect()
    }
}

/// How the auxiliary per-intent losses are folded into the generation loss.
pub enum LossWeighting {
    /// `Linear(k+1 -> 1)` over `[loss_1 .. loss_k, gen_loss]`.
    Learned(Linear),
    /// `lambda * gen_loss + (1 - lambda) * mean(loss_k)`.
    Fixed { lambda: f32 },
}

impl LossWeighting {
    /// `None` unless the per-intent loss is enabled for a mixture model.
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.use_moe_loss || !config.use_moe() {
            return None;
        }
        Some(if config.learn_loss_weight {
            LossWeighting::Learned(Linear::new(
                config.n_intents + 1,
                1,
                true,
                config.seed.wrapping_add(90_000),
            ))
        } else {
            LossWeighting::Fixed {
                lambda: config.lambda_expert,
            }
        })
    }

    pub fn combine(&self, gen_loss: f32, intent_losses: &[f32]) -> DecodeResult<f32> {
        match self {
            LossWeighting::Learned(layer) => {
                let mut inputs = intent_losses.to_vec();
                inputs.push(gen_loss);
                let n = inputs.len();
                let out = layer.forward(&Tensor::try_from_vec(inputs, Shape::new(&[1, n]))?)?;
                Ok(out.data()[0])
            }
            LossWeighting::Fixed { lambda } => {
                if intent_losses.is_empty() {
                    return Ok(gen_loss);
                }
                let mean = intent_losses.iter().sum::<f32>() / intent_losses.len() as f32;
                Ok(lambda * gen_loss + (1.0 - lambda) * mean)
            }
        }
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        match self {
            LossWeighting::Learned(layer) => layer.parameters(),
            LossWeighting::Fixed { .. } => Vec::new(),
        }
    }
}

/// Teacher-forced decoding with an explicit, seedable random source.
pub struct TrainingStepper {
    rng: ChaCha8Rng,
    teacher_ratio: f64,
}

impl TrainingStepper {
    pub fn new(teacher_ratio: f64, seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            teacher_ratio,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.teacher_ratio, config.seed)
    }

    pub fn teacher_ratio(&self) -> f64 {
        self.teacher_ratio
    }

    pub fn set_teacher_ratio(&mut self, ratio: f64) {
        self.teacher_ratio = ratio;
    }

    /// Step through `targets` (`[B][T]`, equal lengths) and return the
    /// per-step log-probabilities `[B, T, V]`.
    ///
    /// One random draw per step decides for the whole batch whether the next
    /// input is the target token or the step's own arg-max.
    pub fn run<D: DecoderStep + ?Sized>(
        &mut self,
        decoder: &D,
        targets: &[Vec<usize>],
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        masks: Option<&IntentMasks>,
    ) -> DecodeResult<Tensor> {
        let batch = hidden.batch_size();
        if targets.len() != batch {
            return Err(DecodeError::BatchMismatch {
                expected: batch,
                got: targets.len(),
            });
        }
        if let Some(m) = masks {
            m.validate(m.n_intents(), batch)?;
        }
        let target_len = targets.first().map_or(0, Vec::len);
        if targets.iter().any(|row| row.len() != target_len) {
            return Err(DecodeError::RaggedTargets);
        }
        let vocab = decoder.vocab_size();

        let mut proba = vec![0.0f32; batch * target_len * vocab];
        let mut prev = vec![SOS_TOKEN; batch];
        let mut hidden = hidden.clone();
        for t in 0..target_len {
            let out = decoder.step(&prev, &hidden, encoder_outputs, masks)?;
            for b in 0..batch {
                let dst = (b * target_len + t) * vocab;
                proba[dst..dst + vocab].copy_from_slice(out.log_probs.try_row(b)?);
            }

            let teacher_forced = self.rng.gen::<f64>() < self.teacher_ratio;
            trace!(step = t, teacher_forced, "teacher forcing decision");
            prev = if teacher_forced {
                targets.iter().map(|row| row[t]).collect()
            } else {
                out.log_probs.argmax_rows()
            };
            hidden = out.hidden;
        }

        Ok(Tensor::from_vec(
            proba,
            Shape::new(&[batch, target_len, vocab]),
        ))
    }
}
