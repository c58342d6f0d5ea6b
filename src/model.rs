// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Response generator: the decoding core behind one entry point.
//!
//! Inference path (`decode`):
//!   1. Encoder outputs + initial hidden state arrive from the caller
//!   2. Greedy: all rows step together for `max_len` steps
//!      Beam:   each row is searched on its own queue
//!   3. Token ids -> words, start/end markers dropped
//!
//! Training path (`train_step`): teacher-forced decoding over the target batch,
//! NLL over the result, optionally folded with the per-intent losses.

use tracing::{debug, info};

use crate::beam::{BeamConfig, BeamSearch};
use crate::cell::HiddenState;
use crate::config::{Config, DecodeStrategy};
use crate::decoder::{Decoder, DecoderStep};
use crate::error::{DecodeError, DecodeResult};
use crate::generate::{greedy_decode, sentences, truncate_at_eos};
use crate::moe::IntentMasks;
use crate::tensor::Tensor;
use crate::train::{LossWeighting, NllLoss, TrainingStepper};
use crate::vocab::Vocabulary;

/// Result of one teacher-forced pass.
#[derive(Clone, Debug)]
pub struct TrainStepOutput {
    /// Generation loss after folding in the per-intent losses (if enabled).
    pub loss: f32,
    pub gen_loss: f32,
    pub intent_losses: Vec<f32>,
    /// `[B, T, V]` log-probabilities, one row per target position.
    pub proba: Tensor,
}

pub struct ResponseGenerator {
    config: Config,
    vocab: Vocabulary,
    decoder: Decoder,
    beam: BeamSearch,
    stepper: TrainingStepper,
    loss_weights: Option<LossWeighting>,
}

impl ResponseGenerator {
    pub fn new(config: Config, vocab: Vocabulary) -> DecodeResult<Self> {
        config.validate()?;
        if vocab.len() != config.vocab_size {
            return Err(DecodeError::InvalidConfig(format!(
                "vocab_size {} does not match vocabulary of {} words",
                config.vocab_size,
                vocab.len()
            )));
        }
        let decoder = Decoder::from_config(&config)?;
        let generator = Self {
            beam: BeamSearch::new(BeamConfig::from_config(&config)),
            stepper: TrainingStepper::from_config(&config),
            loss_weights: LossWeighting::from_config(&config),
            decoder,
            vocab,
            config,
        };
        info!(
            decoder = generator.decoder.name(),
            cell = %generator.config.cell_type,
            n_intents = generator.config.n_intents,
            parameters = generator.num_parameters(),
            "response generator built"
        );
        Ok(generator)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut Decoder {
        &mut self.decoder
    }

    pub fn beam(&self) -> &BeamSearch {
        &self.beam
    }

    pub fn beam_mut(&mut self) -> &mut BeamSearch {
        &mut self.beam
    }

    pub fn stepper_mut(&mut self) -> &mut TrainingStepper {
        &mut self.stepper
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.config.strategy
    }

    pub fn set_strategy(&mut self, strategy: DecodeStrategy) {
        self.config.strategy = strategy;
    }

    /// Decoder parameters plus the learned loss weighting, if any.
    pub fn num_parameters(&self) -> usize {
        let loss = self
            .loss_weights
            .as_ref()
            .map_or(0, |w| w.parameters().iter().map(|p| p.numel()).sum());
        self.decoder.num_parameters() + loss
    }

    /// Decode one sentence per batch row.
    ///
    /// `target_lengths` only has to agree with the batch size; greedy decoding
    /// always runs `max_len` steps and beam search stops on its own.
    pub fn decode(
        &self,
        encoder_outputs: &Tensor,
        initial_hidden: &HiddenState,
        target_lengths: &[usize],
        intent_masks: Option<&IntentMasks>,
    ) -> DecodeResult<Vec<String>> {
        let batch = initial_hidden.batch_size();
        if target_lengths.len() != batch {
            return Err(DecodeError::BatchMismatch {
                expected: batch,
                got: target_lengths.len(),
            });
        }
        let ids = self.decode_ids(encoder_outputs, initial_hidden, intent_masks)?;
        Ok(sentences(&self.vocab, &ids))
    }

    /// Masks must cover the batch on every path. With experts they must also
    /// carry exactly one mask per intent; without experts they are ignored.
    fn check_masks(&self, intent_masks: Option<&IntentMasks>, batch: usize) -> DecodeResult<()> {
        let Some(masks) = intent_masks else {
            return Ok(());
        };
        let n_intents = if self.config.use_moe() {
            self.config.n_intents
        } else {
            masks.n_intents()
        };
        masks.validate(n_intents, batch)
    }

    /// Decoded token ids per row, without start/end markers.
    pub fn decode_ids(
        &self,
        encoder_outputs: &Tensor,
        initial_hidden: &HiddenState,
        intent_masks: Option<&IntentMasks>,
    ) -> DecodeResult<Vec<Vec<usize>>> {
        self.check_masks(intent_masks, initial_hidden.batch_size())?;
        match self.config.strategy {
            DecodeStrategy::Greedy => {
                let decoded = greedy_decode(
                    &self.decoder,
                    initial_hidden,
                    encoder_outputs,
                    intent_masks,
                    self.config.max_len,
                )?;
                Ok(decoded
                    .iter()
                    .map(|ids| truncate_at_eos(ids).to_vec())
                    .collect())
            }
            DecodeStrategy::Beam => {
                let outcomes = self.beam.search_batch(
                    &self.decoder,
                    initial_hidden,
                    encoder_outputs,
                    intent_masks,
                )?;
                Ok(outcomes
                    .into_iter()
                    .map(|o| o.hypotheses.into_iter().next().map(|h| h.tokens).unwrap_or_default())
                    .collect())
            }
        }
    }

    /// One teacher-forced pass over `target_batch`.
    ///
    /// `input_batch` is the utterance batch the caller encoded into
    /// `encoder_outputs`; it is checked against the batch size only.
    pub fn train_step(
        &mut self,
        input_batch: &[Vec<usize>],
        target_batch: &[Vec<usize>],
        encoder_outputs: &Tensor,
        initial_hidden: &HiddenState,
        intent_masks: Option<&IntentMasks>,
    ) -> DecodeResult<TrainStepOutput> {
        let batch = initial_hidden.batch_size();
        if input_batch.len() != batch {
            return Err(DecodeError::BatchMismatch {
                expected: batch,
                got: input_batch.len(),
            });
        }
        self.check_masks(intent_masks, batch)?;
        let proba = self.stepper.run(
            &self.decoder,
            target_batch,
            initial_hidden,
            encoder_outputs,
            intent_masks,
        )?;
        let flat_targets: Vec<usize> = target_batch.iter().flatten().copied().collect();
        let gen_loss = NllLoss::forward(&proba, &flat_targets)?;

        let (loss, intent_losses) = match (&self.loss_weights, intent_masks) {
            (Some(weights), Some(masks)) => {
                let intent_losses = NllLoss::per_intent(&proba, target_batch, masks)?;
                (weights.combine(gen_loss, &intent_losses)?, intent_losses)
            }
            _ => (gen_loss, Vec::new()),
        };
        debug!(loss, gen_loss, vocab = self.decoder.vocab_size(), "train step");

        Ok(TrainStepOutput {
            loss,
            gen_loss,
            intent_losses,
            proba,
        })
    }
}
