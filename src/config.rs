// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Decoder configuration and its JSON snapshot.
//!
//! Two presets:
//! - `Default`: the production setting (beam width 10, max length 50,
//!   expert gamma 0.5, 2000-node beam safety cap).
//! - `tiny()`: minimal sizes for unit tests and benchmarks.
//!
//! Key relationships:
//! - `n_intents == 0` disables the mixture of experts; otherwise every expert
//!   is an attention decoder regardless of `attention`.
//! - Encoder outputs fed to the decoder must have width `hidden_size`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cell::CellType;
use crate::error::{DecodeError, DecodeResult};
use crate::vocab::RESERVED_WORDS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeStrategy {
    Greedy,
    Beam,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vocab_size: usize,
    pub embedding_size: usize,
    /// Decoder hidden width; also the encoder output width.
    pub hidden_size: usize,
    pub cell_type: CellType,
    pub attention: bool,
    /// Number of intent experts (0 = plain or attention decoder only)
    pub n_intents: usize,
    pub strategy: DecodeStrategy,
    pub beam_width: usize,
    /// Completed hypotheses required before beam search stops
    pub n_best: usize,
    /// Safety cap on nodes ever pushed onto a turn's queue
    pub max_queue_size: usize,
    /// Worker threads for turn-level beam parallelism (1 = serial)
    pub beam_workers: usize,
    pub max_len: usize,
    pub teacher_ratio: f64,
    pub gamma_expert: f32,
    pub use_moe_loss: bool,
    pub learn_loss_weight: bool,
    pub lambda_expert: f32,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vocab_size: 400,
            embedding_size: 50,
            hidden_size: 150,
            cell_type: CellType::Lstm,
            attention: true,
            n_intents: 0,
            strategy: DecodeStrategy::Beam,
            beam_width: 10,
            n_best: 1,
            max_queue_size: 2000,
            beam_workers: 1,
            max_len: 50,
            teacher_ratio: 1.0,
            gamma_expert: 0.5,
            use_moe_loss: false,
            learn_loss_weight: false,
            lambda_expert: 0.5,
            seed: 0,
        }
    }
}

impl Config {
    pub fn tiny() -> Self {
        Self {
            vocab_size: 16,
            embedding_size: 8,
            hidden_size: 12,
            beam_width: 3,
            max_len: 8,
            ..Self::default()
        }
    }

    pub fn use_moe(&self) -> bool {
        self.n_intents > 0
    }

    pub fn validate(&self) -> DecodeResult<()> {
        let fail = |msg: String| -> DecodeResult<()> { Err(DecodeError::InvalidConfig(msg)) };
        if self.vocab_size < RESERVED_WORDS.len() {
            return fail(format!(
                "vocab_size {} must cover the {} reserved ids",
                self.vocab_size,
                RESERVED_WORDS.len()
            ));
        }
        if self.embedding_size == 0 || self.hidden_size == 0 {
            return fail("embedding_size and hidden_size must be positive".into());
        }
        if self.beam_width == 0 {
            return fail("beam_width must be >= 1".into());
        }
        if self.beam_width > self.vocab_size {
            return fail(format!(
                "beam_width {} exceeds vocab_size {}",
                self.beam_width, self.vocab_size
            ));
        }
        if self.n_best == 0 {
            return fail("n_best must be >= 1".into());
        }
        if self.max_queue_size == 0 {
            return fail("max_queue_size must be >= 1".into());
        }
        if self.beam_workers == 0 {
            return fail("beam_workers must be >= 1".into());
        }
        if self.max_len == 0 {
            return fail("max_len must be >= 1".into());
        }
        if !(0.0..=1.0).contains(&self.teacher_ratio) {
            return fail(format!("teacher_ratio {} not in [0, 1]", self.teacher_ratio));
        }
        if !(0.0..=1.0).contains(&self.gamma_expert) {
            return fail(format!("gamma_expert {} not in [0, 1]", self.gamma_expert));
        }
        if !(0.0..=1.0).contains(&self.lambda_expert) {
            return fail(format!("lambda_expert {} not in [0, 1]", self.lambda_expert));
        }
        Ok(())
    }

    pub fn to_json(&self) -> DecodeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> DecodeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> DecodeResult<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> DecodeResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
