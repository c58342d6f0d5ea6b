// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Crate-wide error types.

use thiserror::Error;

use crate::tensor::TensorError;

/// Lookup failure in the vocabulary table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownTokenError {
    #[error("unknown token id {0}")]
    Id(usize),
    #[error("unknown token {0:?}")]
    Word(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    #[error(transparent)]
    UnknownToken(#[from] UnknownTokenError),

    /// An intent mask whose length differs from the batch.
    #[error("intent mask {intent} has length {got}, batch size is {expected}")]
    MaskShape {
        intent: usize,
        expected: usize,
        got: usize,
    },

    #[error("expected {expected} intent masks, got {got}")]
    IntentCount { expected: usize, got: usize },

    /// Gate weights summed to zero or a non-finite value.
    #[error("degenerate mixture gate: weight sum {sum}")]
    DegenerateGate { sum: f32 },

    #[error("hidden state mismatch: expected {expected}, got {got}")]
    HiddenStateMismatch { expected: String, got: String },

    #[error("batch size mismatch: expected {expected}, got {got}")]
    BatchMismatch { expected: usize, got: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    #[error("target sequences must all have the same length")]
    RaggedTargets,

    #[error("beam search worker panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
