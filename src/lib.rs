// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! CPU response decoder for task-oriented dialogue.
//!
//! Public API facade for the `nn-decoder` crate. All internal modules are
//! private; this file is the sole public boundary.
//!
//! # Module organization
//! - `tensor`    -- Tensor type, shape, row ops, softmax / log-softmax, top-k
//! - `error`     -- `DecodeError`, `UnknownTokenError`
//! - `config`    -- Decoder configuration and its JSON snapshot
//! - `vocab`     -- Output vocabulary with the reserved `_GO/_EOS/_UNK/_PAD` ids
//! - `layers`    -- Building blocks: Linear, Embedding
//! - `cell`      -- RNN / GRU / LSTM cells and the decoder hidden state
//! - `attention` -- Additive attention over encoder positions
//! - `decoder`   -- `DecoderStep` and the plain / attention / MoE variants
//! - `moe`       -- Intent masks, mixture gate, chair + expert decoder
//! - `beam`      -- Best-first beam search with a per-turn node cap
//! - `generate`  -- Batched greedy decoding
//! - `train`     -- Teacher forcing, NLL loss, per-intent loss weighting
//! - `model`     -- `ResponseGenerator`: decode / train_step entry points

#![deny(unsafe_code)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

mod attention;
mod beam;
mod cell;
mod config;
mod decoder;
mod error;
mod generate;
mod layers;
mod model;
mod moe;
mod tensor;
mod train;
mod vocab;

// ---- Public API re-exports (facade pattern) ----
// Users write `nn_decoder::Tensor`, not `nn_decoder::tensor::Tensor`.

pub use attention::{Attention, AttentionScorer};
pub use beam::{BeamConfig, BeamNode, BeamOutcome, BeamSearch, Hypothesis, ScoreHooks, SearchStats};
pub use cell::{CellType, HiddenState, RecurrentCell};
pub use config::{Config, DecodeStrategy};
pub use decoder::{AttnDecoder, Decoder, DecoderStep, PlainDecoder, StepOutput};
pub use error::{DecodeError, DecodeResult, UnknownTokenError};
pub use generate::{greedy_decode, sentences, truncate_at_eos};
pub use layers::{Embedding, Layer, Linear};
pub use model::{ResponseGenerator, TrainStepOutput};
pub use moe::{IntentMasks, MoeDecoder, MoeGate};
pub use tensor::{
    argmax, log_softmax_in_place, softmax_in_place, top_k, Shape, Tensor, TensorError,
    TensorResult,
};
pub use train::{LossWeighting, NllLoss, TrainingStepper};
pub use vocab::{
    Vocabulary, EOS_TOKEN, PAD_TOKEN, RESERVED_WORDS, SOS_TOKEN, UNK_TOKEN,
};

// Alias matching the expert role inside the mixture.
pub type ExpertDecoder = AttnDecoder;
