// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Batched greedy decoding.
//!
//! All rows step together for exactly `max_len` steps, each taking the
//! arg-max token (lowest id on ties) as the next input. Rows that emit EOS
//! keep running; the tokens after the first EOS are discarded only when the
//! sentence is assembled.

use tracing::trace;

use crate::cell::HiddenState;
use crate::decoder::DecoderStep;
use crate::error::{DecodeError, DecodeResult};
use crate::moe::IntentMasks;
use crate::tensor::Tensor;
use crate::vocab::{Vocabulary, EOS_TOKEN, SOS_TOKEN};

/// Greedy token ids `[batch][max_len]`, SOS excluded.
pub fn greedy_decode<D: DecoderStep + ?Sized>(
    decoder: &D,
    hidden: &HiddenState,
    encoder_outputs: &Tensor,
    masks: Option<&IntentMasks>,
    max_len: usize,
) -> DecodeResult<Vec<Vec<usize>>> {
    let batch = hidden.batch_size();
    let (enc_batch, _, _) = encoder_outputs.try_dims_3d()?;
    if enc_batch != batch {
        return Err(DecodeError::BatchMismatch {
            expected: batch,
            got: enc_batch,
        });
    }
    if let Some(m) = masks {
        m.validate(m.n_intents(), batch)?;
    }

    let mut decoded = vec![Vec::with_capacity(max_len); batch];
    let mut prev = vec![SOS_TOKEN; batch];
    let mut hidden = hidden.clone();
    for t in 0..max_len {
        let out = decoder.step(&prev, &hidden, encoder_outputs, masks)?;
        prev = out.log_probs.argmax_rows();
        for (row, &token) in decoded.iter_mut().zip(&prev) {
            row.push(token);
        }
        hidden = out.hidden;
        trace!(step = t, tokens = ?prev, "greedy step");
    }
    Ok(decoded)
}

/// Prefix of `ids` before the first EOS.
pub fn truncate_at_eos(ids: &[usize]) -> &[usize] {
    let end = ids.iter().position(|&id| id == EOS_TOKEN).unwrap_or(ids.len());
    &ids[..end]
}

pub fn sentences(vocab: &Vocabulary, decoded: &[Vec<usize>]) -> Vec<String> {
    decoded.iter().map(|ids| vocab.sentence(ids)).collect()
}
