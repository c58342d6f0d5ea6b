// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Single-step decoders.
//!
//! Every variant implements [`DecoderStep`]:
//!
//! ```text
//! step(prev_tokens [B], hidden [B, H], encoder_outputs [B, T, H], masks)
//!     -> (log_probs [B, V], hidden' [B, H])
//! ```
//!
//! - `PlainDecoder`: embed -> cell -> out -> log_softmax. Ignores the encoder.
//! - `AttnDecoder`:  embed, attend with h, cell on [emb ; ctx] -> out -> log_softmax.
//!   Also used for every expert inside the mixture.
//! - `MoeDecoder`:   chair + per-intent experts merged by a learned gate (see `moe`).
//!
//! The variant is chosen once from `Config` via [`Decoder::from_config`]; the
//! search loops are generic over the trait and never inspect the variant.

use crate::attention::{Attention, AttentionScorer};
use crate::cell::{CellType, HiddenState, RecurrentCell};
use crate::config::Config;
use crate::error::{DecodeError, DecodeResult};
use crate::layers::{collect_params, collect_params_mut, Embedding, Layer, Linear};
use crate::moe::{IntentMasks, MoeDecoder};
use crate::tensor::{Tensor, TensorError};
use crate::vocab::PAD_TOKEN;

/// Log-probabilities `[B, V]` and the advanced hidden state.
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutput {
    pub log_probs: Tensor,
    pub hidden: HiddenState,
}

pub trait DecoderStep {
    fn vocab_size(&self) -> usize;

    /// Advance every batch row by one token.
    ///
    /// `masks` is only read by the mixture of experts; other variants ignore it.
    fn step(
        &self,
        prev_tokens: &[usize],
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        masks: Option<&IntentMasks>,
    ) -> DecodeResult<StepOutput>;
}

fn check_batch(prev_tokens: &[usize], hidden: &HiddenState) -> DecodeResult<usize> {
    let batch = hidden.batch_size();
    if prev_tokens.len() != batch {
        return Err(DecodeError::BatchMismatch {
            expected: batch,
            got: prev_tokens.len(),
        });
    }
    Ok(batch)
}

/// Recurrent decoder without attention.
pub struct PlainDecoder {
    pub embedding: Embedding,
    pub cell: RecurrentCell,
    pub out: Linear,
}

impl PlainDecoder {
    pub fn new(
        vocab_size: usize,
        embedding_size: usize,
        hidden_size: usize,
        cell_type: CellType,
        seed: u64,
    ) -> Self {
        Self {
            embedding: Embedding::new(vocab_size, embedding_size, Some(PAD_TOKEN), seed),
            cell: RecurrentCell::new(cell_type, embedding_size, hidden_size, seed.wrapping_add(200)),
            out: Linear::new(hidden_size, vocab_size, true, seed.wrapping_add(300)),
        }
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        collect_params!(self.embedding, self.cell, self.out)
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        collect_params_mut!(self.embedding, self.cell, self.out)
    }
}

impl DecoderStep for PlainDecoder {
    fn vocab_size(&self) -> usize {
        self.out.out_features()
    }

    fn step(
        &self,
        prev_tokens: &[usize],
        hidden: &HiddenState,
        _encoder_outputs: &Tensor,
        _masks: Option<&IntentMasks>,
    ) -> DecodeResult<StepOutput> {
        check_batch(prev_tokens, hidden)?;
        let embedded = self.embedding.lookup(prev_tokens)?;
        let hidden = self.cell.forward(&embedded, hidden)?;
        let log_probs = self.out.forward(hidden.output())?.log_softmax();
        Ok(StepOutput { log_probs, hidden })
    }
}

/// Recurrent decoder with additive attention over the encoder outputs.
pub struct AttnDecoder {
    pub embedding: Embedding,
    pub attention: AttentionScorer,
    /// Input is `[embedding ; context]`.
    pub cell: RecurrentCell,
    pub out: Linear,
}

impl AttnDecoder {
    pub fn new(
        vocab_size: usize,
        embedding_size: usize,
        hidden_size: usize,
        cell_type: CellType,
        seed: u64,
    ) -> Self {
        Self {
            embedding: Embedding::new(vocab_size, embedding_size, None, seed),
            attention: AttentionScorer::new(hidden_size, seed.wrapping_add(100)),
            cell: RecurrentCell::new(
                cell_type,
                embedding_size + hidden_size,
                hidden_size,
                seed.wrapping_add(200),
            ),
            out: Linear::new(hidden_size, vocab_size, true, seed.wrapping_add(300)),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.cell.hidden_size()
    }

    /// Alignment of the current decoder output over the encoder positions.
    pub fn attend(&self, hidden: &HiddenState, encoder_outputs: &Tensor) -> DecodeResult<Attention> {
        self.attention.forward(hidden.output(), encoder_outputs)
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = collect_params!(self.embedding, self.cell, self.out);
        params.extend(self.attention.parameters());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = collect_params_mut!(self.embedding, self.cell, self.out);
        params.extend(self.attention.parameters_mut());
        params
    }
}

impl DecoderStep for AttnDecoder {
    fn vocab_size(&self) -> usize {
        self.out.out_features()
    }

    fn step(
        &self,
        prev_tokens: &[usize],
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        _masks: Option<&IntentMasks>,
    ) -> DecodeResult<StepOutput> {
        check_batch(prev_tokens, hidden)?;
        hidden.validate(self.cell.cell_type(), self.hidden_size())?;
        let embedded = self.embedding.lookup(prev_tokens)?;
        let Attention { context, .. } = self.attend(hidden, encoder_outputs)?;
        let rnn_input = Tensor::try_concat_last(&[&embedded, &context])?;
        let hidden = self.cell.forward(&rnn_input, hidden)?;
        let log_probs = self.out.forward(hidden.output())?.log_softmax();
        Ok(StepOutput { log_probs, hidden })
    }
}

/// Decoder variant selected once at construction.
pub enum Decoder {
    Plain(PlainDecoder),
    Attn(AttnDecoder),
    Moe(MoeDecoder),
}

impl Decoder {
    pub fn from_config(config: &Config) -> DecodeResult<Self> {
        config.validate()?;
        let Config {
            vocab_size,
            embedding_size,
            hidden_size,
            cell_type,
            seed,
            ..
        } = *config;
        Ok(if config.use_moe() {
            Decoder::Moe(MoeDecoder::new(
                vocab_size,
                embedding_size,
                hidden_size,
                cell_type,
                config.n_intents,
                config.gamma_expert,
                seed,
            ))
        } else if config.attention {
            Decoder::Attn(AttnDecoder::new(
                vocab_size,
                embedding_size,
                hidden_size,
                cell_type,
                seed,
            ))
        } else {
            Decoder::Plain(PlainDecoder::new(
                vocab_size,
                embedding_size,
                hidden_size,
                cell_type,
                seed,
            ))
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Decoder::Plain(_) => "plain",
            Decoder::Attn(_) => "attention",
            Decoder::Moe(_) => "moe",
        }
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        match self {
            Decoder::Plain(d) => d.parameters(),
            Decoder::Attn(d) => d.parameters(),
            Decoder::Moe(d) => d.parameters(),
        }
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match self {
            Decoder::Plain(d) => d.parameters_mut(),
            Decoder::Attn(d) => d.parameters_mut(),
            Decoder::Moe(d) => d.parameters_mut(),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}

impl DecoderStep for Decoder {
    fn vocab_size(&self) -> usize {
        match self {
            Decoder::Plain(d) => d.vocab_size(),
            Decoder::Attn(d) => d.vocab_size(),
            Decoder::Moe(d) => d.vocab_size(),
        }
    }

    fn step(
        &self,
        prev_tokens: &[usize],
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        masks: Option<&IntentMasks>,
    ) -> DecodeResult<StepOutput> {
        match self {
            Decoder::Plain(d) => d.step(prev_tokens, hidden, encoder_outputs, masks),
            Decoder::Attn(d) => d.step(prev_tokens, hidden, encoder_outputs, masks),
            Decoder::Moe(d) => d.step(prev_tokens, hidden, encoder_outputs, masks),
        }
    }
}

/// Encoder outputs must be `[batch, T, hidden]`.
pub(crate) fn check_encoder(
    encoder_outputs: &Tensor,
    batch: usize,
    hidden_size: usize,
) -> DecodeResult<()> {
    let (b, _, h) = encoder_outputs.try_dims_3d()?;
    if b != batch {
        return Err(DecodeError::BatchMismatch {
            expected: batch,
            got: b,
        });
    }
    if h != hidden_size {
        return Err(TensorError::InvalidDimension {
            expected: hidden_size,
            got: h,
        }
        .into());
    }
    Ok(())
}
