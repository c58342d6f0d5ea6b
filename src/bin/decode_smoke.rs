// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! End-to-end smoke run.
//! Builds a tiny mixture-of-experts generator, decodes a random batch greedily
//! and with beam search, runs one teacher-forced step and prints a JSON summary.
//!
//! `RUST_LOG=nn_decoder=debug` shows the per-turn beam statistics.

use std::time::Instant;

use nn_decoder::{
    CellType, Config, DecodeResult, DecodeStrategy, HiddenState, IntentMasks, ResponseGenerator,
    Shape, Tensor, Vocabulary, PAD_TOKEN,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const BATCH: usize = 3;
const INPUT_LEN: usize = 5;
const N_INTENTS: usize = 2;

fn main() -> DecodeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let words = [
        "hello", "world", "the", "hotel", "is", "in", "north", "cheap", "booked", "thanks", "bye",
        "restaurant",
    ];
    let vocab = Vocabulary::from_words(words);
    let config = Config {
        vocab_size: vocab.len(),
        cell_type: CellType::Lstm,
        n_intents: N_INTENTS,
        beam_width: 3,
        max_len: 10,
        beam_workers: 2,
        use_moe_loss: true,
        seed: 7,
        ..Config::tiny()
    };
    let hidden_size = config.hidden_size;
    let mut generator = ResponseGenerator::new(config.clone(), vocab)?;

    let encoder_outputs =
        Tensor::randn(Shape::new(&[BATCH, INPUT_LEN, hidden_size]), 11).scale(0.5);
    let initial_hidden = HiddenState::Pair {
        h: Tensor::randn(Shape::new(&[BATCH, hidden_size]), 12).scale(0.5),
        c: Tensor::zeros(Shape::new(&[BATCH, hidden_size])),
    };
    let masks = IntentMasks::from_labels(&[vec![0], vec![1], vec![0, 1]], N_INTENTS)?;
    let target_lengths = vec![config.max_len; BATCH];

    generator.set_strategy(DecodeStrategy::Greedy);
    let t0 = Instant::now();
    let greedy = generator.decode(&encoder_outputs, &initial_hidden, &target_lengths, Some(&masks))?;
    let greedy_ms = t0.elapsed().as_secs_f64() * 1e3;

    generator.set_strategy(DecodeStrategy::Beam);
    let t0 = Instant::now();
    let beam = generator.decode(&encoder_outputs, &initial_hidden, &target_lengths, Some(&masks))?;
    let beam_ms = t0.elapsed().as_secs_f64() * 1e3;

    let targets: Vec<Vec<usize>> = ["the hotel is booked", "cheap restaurant in north", "thanks bye"]
        .iter()
        .map(|s| {
            let mut ids = generator.vocab().encode_sentence(s);
            ids.resize(6, PAD_TOKEN);
            ids
        })
        .collect();
    let inputs = targets.clone();
    let step = generator.train_step(&inputs, &targets, &encoder_outputs, &initial_hidden, Some(&masks))?;

    let summary = json!({
        "decoder": generator.decoder().name(),
        "parameters": generator.num_parameters(),
        "greedy": { "sentences": greedy, "ms": greedy_ms },
        "beam": { "sentences": beam, "ms": beam_ms },
        "train": {
            "loss": step.loss,
            "gen_loss": step.gen_loss,
            "intent_losses": step.intent_losses,
            "proba_shape": step.proba.shape().dims(),
        },
    });
    println!("{summary}");
    Ok(())
}
