// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Benchmark harness for the response decoder.
//!
//! Custom harness (not Criterion) emitting one JSON document with wall-clock
//! and allocation figures per scenario.
//!
//! Scenarios:
//! 1. **Step** (3): one decoder step for plain, attention and MoE decoders
//! 2. **Greedy** (2): batched greedy decoding, attention vs MoE
//! 3. **Beam** (4): beam width [1, 5] x workers [1, 4], attention decoder
//!
//! Each scenario runs N_WARMUP warmup iterations + N_TRIALS timed iterations.
//! Allocation bytes come from a counting global allocator with a
//! thread-local counter, so worker threads do not contend on it.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::time::Instant;

use nn_decoder::{
    greedy_decode, BeamConfig, BeamSearch, CellType, Config, Decoder, DecoderStep, HiddenState,
    IntentMasks, Shape, Tensor,
};
use serde_json::{json, Value};

thread_local! {
    static TL_ALLOC_BYTES: Cell<u64> = const { Cell::new(0) };
}

/// Global allocator wrapper that counts bytes allocated on the current thread.
struct CountingAlloc;

// SAFETY: Delegates all allocation/deallocation to the System allocator.
// `try_with` skips counting if TLS is not yet initialized or already torn down.
unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = TL_ALLOC_BYTES.try_with(|c| c.set(c.get() + layout.size() as u64));
        // SAFETY: Forwarding to System allocator with the same layout.
        unsafe { System.alloc(layout) }
    }
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: ptr was allocated by System.alloc with the same layout.
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static A: CountingAlloc = CountingAlloc;

const SEED: u64 = 42;
const BATCH: usize = 8;
const INPUT_LEN: usize = 12;
const N_TRIALS: usize = 10;
const N_WARMUP: usize = 3;

fn bench_config(n_intents: usize, attention: bool) -> Config {
    Config {
        vocab_size: 200,
        embedding_size: 32,
        hidden_size: 64,
        cell_type: CellType::Lstm,
        attention,
        n_intents,
        max_len: 20,
        seed: SEED,
        ..Config::default()
    }
}

fn inputs(config: &Config) -> (Tensor, HiddenState) {
    let h = config.hidden_size;
    let enc = Tensor::randn(Shape::new(&[BATCH, INPUT_LEN, h]), SEED).scale(0.5);
    let hidden = HiddenState::Pair {
        h: Tensor::randn(Shape::new(&[BATCH, h]), SEED + 1).scale(0.5),
        c: Tensor::zeros(Shape::new(&[BATCH, h])),
    };
    (enc, hidden)
}

fn median(timings: &mut [u64]) -> u64 {
    timings.sort_unstable();
    let n = timings.len();
    if n % 2 == 0 {
        (timings[n / 2 - 1] + timings[n / 2]) / 2
    } else {
        timings[n / 2]
    }
}

fn run_scenario(name: &str, mut f: impl FnMut()) -> Value {
    for _ in 0..N_WARMUP {
        f();
    }
    let mut timings = Vec::with_capacity(N_TRIALS);
    let mut alloc = 0u64;
    for _ in 0..N_TRIALS {
        TL_ALLOC_BYTES.with(|c| c.set(0));
        let t0 = Instant::now();
        f();
        timings.push(t0.elapsed().as_nanos() as u64);
        alloc = alloc.max(TL_ALLOC_BYTES.with(|c| c.get()));
    }
    let min = timings.iter().copied().min().unwrap_or(0);
    let max = timings.iter().copied().max().unwrap_or(0);
    json!({
        "name": name,
        "median_ns": median(&mut timings),
        "min_ns": min,
        "max_ns": max,
        "alloc_bytes": alloc,
    })
}

fn main() {
    let mut results = Vec::new();
    let masks = IntentMasks::from_intents(&[0, 1, 2, 0, 1, 2, 0, 1], 3).expect("masks");

    // 1. Single step per decoder variant
    for (label, config) in [
        ("step_plain", bench_config(0, false)),
        ("step_attention", bench_config(0, true)),
        ("step_moe", bench_config(3, true)),
    ] {
        let decoder = Decoder::from_config(&config).expect("decoder");
        let (enc, hidden) = inputs(&config);
        let prev = vec![0usize; BATCH];
        let m = (config.n_intents > 0).then_some(&masks);
        results.push(run_scenario(label, || {
            decoder.step(&prev, &hidden, &enc, m).expect("step");
        }));
    }

    // 2. Greedy decoding
    for (label, config) in [
        ("greedy_attention", bench_config(0, true)),
        ("greedy_moe", bench_config(3, true)),
    ] {
        let decoder = Decoder::from_config(&config).expect("decoder");
        let (enc, hidden) = inputs(&config);
        let m = (config.n_intents > 0).then_some(&masks);
        results.push(run_scenario(label, || {
            greedy_decode(&decoder, &hidden, &enc, m, config.max_len).expect("greedy");
        }));
    }

    // 3. Beam search: width x workers
    let config = bench_config(0, true);
    let decoder = Decoder::from_config(&config).expect("decoder");
    let (enc, hidden) = inputs(&config);
    for width in [1, 5] {
        for workers in [1, 4] {
            let beam = BeamSearch::new(BeamConfig {
                beam_width: width,
                n_best: 1,
                max_queue_size: 400,
                workers,
            });
            let label = format!("beam_w{width}_t{workers}");
            results.push(run_scenario(&label, || {
                beam.search_batch(&decoder, &hidden, &enc, None).expect("beam");
            }));
        }
    }

    let doc = json!({
        "crate": "nn-decoder",
        "batch": BATCH,
        "input_len": INPUT_LEN,
        "trials": N_TRIALS,
        "scenarios": results,
    });
    println!("{doc}");
}
