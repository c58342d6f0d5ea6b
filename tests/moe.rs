// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

use nn_decoder::{
    CellType, Config, DecodeError, Decoder, DecoderStep, HiddenState, IntentMasks, MoeDecoder,
    Shape, Tensor, SOS_TOKEN,
};

const VOCAB: usize = 14;
const EMB: usize = 6;
const HIDDEN: usize = 8;

fn moe(n_intents: usize, cell: CellType, gamma: f32) -> MoeDecoder {
    MoeDecoder::new(VOCAB, EMB, HIDDEN, cell, n_intents, gamma, 3)
}

fn inputs(cell: CellType, batch: usize) -> (HiddenState, Tensor) {
    let h = Tensor::randn(Shape::new(&[batch, HIDDEN]), 17).scale(0.5);
    let hidden = match cell {
        CellType::Lstm => HiddenState::Pair {
            h,
            c: Tensor::randn(Shape::new(&[batch, HIDDEN]), 18).scale(0.5),
        },
        _ => HiddenState::Single(h),
    };
    let enc = Tensor::randn(Shape::new(&[batch, 4, HIDDEN]), 19).scale(0.5);
    (hidden, enc)
}

// --- masks ---

#[test]
fn test_masks_from_labels() {
    let masks = IntentMasks::from_labels(&[vec![0], vec![1], vec![0, 1], vec![]], 2).unwrap();
    assert_eq!(masks.n_intents(), 2);
    assert_eq!(masks.batch_size(), 4);
    assert_eq!(masks.mask(0), Some(&[false, true, false, true][..]));
    assert_eq!(masks.mask(1), Some(&[true, false, false, true][..]));
    assert!(masks.belongs(1, 2));
    assert!(!masks.belongs(0, 3));
    assert!(!masks.belongs(5, 0));

    let row = masks.select(2).unwrap();
    assert_eq!(row.batch_size(), 1);
    assert!(row.belongs(0, 0) && row.belongs(1, 0));
}

#[test]
fn test_masks_reject_bad_input() {
    assert!(matches!(
        IntentMasks::new(vec![vec![true, false], vec![true]]),
        Err(DecodeError::MaskShape { intent: 1, expected: 2, got: 1 })
    ));
    assert!(matches!(
        IntentMasks::from_intents(&[0, 2], 2),
        Err(DecodeError::InvalidConfig(_))
    ));
}

// --- gate ---

#[test]
fn test_mixture_weights_sum_to_one() {
    for n in 1..=3 {
        let decoder = moe(n, CellType::Gru, 0.5);
        let (hidden, enc) = inputs(CellType::Gru, 3);
        let labels: Vec<usize> = (0..3).map(|b| b % n).collect();
        let masks = IntentMasks::from_intents(&labels, n).unwrap();
        let w = decoder
            .mixture_weights(&[SOS_TOKEN, 4, 7], &hidden, &enc, &masks)
            .unwrap();
        assert_eq!(w.shape().dims(), &[3, n + 1]);
        for row in w.data().chunks(n + 1) {
            assert!(row.iter().all(|&x| x >= 0.0));
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "row sum {sum}");
        }
    }
}

#[test]
fn test_without_masks_returns_chair_output() {
    for cell in [CellType::Rnn, CellType::Lstm] {
        let decoder = moe(2, cell, 0.5);
        let (hidden, enc) = inputs(cell, 2);
        let prev = [SOS_TOKEN, 5];
        let mixed = decoder.step(&prev, &hidden, &enc, None).unwrap();
        let chair = decoder.chair.step(&prev, &hidden, &enc, None).unwrap();
        assert_eq!(mixed, chair);
    }
}

#[test]
fn test_full_gamma_with_saturated_gate_matches_expert() {
    for cell in [CellType::Gru, CellType::Lstm] {
        let mut decoder = moe(2, cell, 1.0);
        decoder.gate.fc.weight.fill_(0.0);
        decoder
            .gate
            .fc
            .bias
            .as_mut()
            .unwrap()
            .data_mut()
            .copy_from_slice(&[-1e4, 0.0, -1e4]);

        let (hidden, enc) = inputs(cell, 2);
        let prev = [SOS_TOKEN, 6];
        let masks = IntentMasks::from_intents(&[0, 1], 2).unwrap();

        let w = decoder.mixture_weights(&prev, &hidden, &enc, &masks).unwrap();
        assert_eq!(w.row(0), &[0.0, 1.0, 0.0]);

        let mixed = decoder.step(&prev, &hidden, &enc, Some(&masks)).unwrap();
        let expert = decoder
            .expert(0)
            .unwrap()
            .step(&prev, &hidden, &enc, None)
            .unwrap();
        assert_eq!(mixed.log_probs.row(0), expert.log_probs.row(0));
        for (m, e) in mixed.hidden.tensors().iter().zip(expert.hidden.tensors()) {
            assert_eq!(m.row(0), e.row(0));
        }
    }
}

#[test]
fn test_zero_gamma_returns_chair_values() {
    let decoder = moe(2, CellType::Gru, 0.0);
    let (hidden, enc) = inputs(CellType::Gru, 2);
    let prev = [SOS_TOKEN, 6];
    let masks = IntentMasks::from_intents(&[0, 1], 2).unwrap();
    let mixed = decoder.step(&prev, &hidden, &enc, Some(&masks)).unwrap();
    let chair = decoder.chair.step(&prev, &hidden, &enc, None).unwrap();
    for (m, c) in mixed.log_probs.data().iter().zip(chair.log_probs.data()) {
        assert!((m - c).abs() < 1e-6);
    }
}

#[test]
fn test_mixed_output_is_finite_and_shaped() {
    let decoder = moe(3, CellType::Lstm, 0.5);
    let (hidden, enc) = inputs(CellType::Lstm, 4);
    let masks = IntentMasks::from_labels(&[vec![0], vec![1, 2], vec![], vec![2]], 3).unwrap();
    let out = decoder
        .step(&[SOS_TOKEN, 4, 5, 6], &hidden, &enc, Some(&masks))
        .unwrap();
    assert_eq!(out.log_probs.shape().dims(), &[4, VOCAB]);
    assert_eq!(out.hidden.kind(), "pair");
    assert!(out.log_probs.data().iter().all(|v| v.is_finite()));
}

// --- errors ---

#[test]
fn test_mask_length_mismatch() {
    let decoder = moe(2, CellType::Gru, 0.5);
    let (hidden, enc) = inputs(CellType::Gru, 3);
    let masks = IntentMasks::from_intents(&[0, 1], 2).unwrap();
    assert!(matches!(
        decoder.step(&[0, 0, 0], &hidden, &enc, Some(&masks)),
        Err(DecodeError::MaskShape { intent: 0, expected: 3, got: 2 })
    ));
}

#[test]
fn test_mask_count_mismatch() {
    let decoder = moe(2, CellType::Gru, 0.5);
    let (hidden, enc) = inputs(CellType::Gru, 2);
    let masks = IntentMasks::from_intents(&[0, 2], 3).unwrap();
    assert!(matches!(
        decoder.step(&[0, 0], &hidden, &enc, Some(&masks)),
        Err(DecodeError::IntentCount { expected: 2, got: 3 })
    ));
}

#[test]
fn test_degenerate_gate() {
    let mut decoder = moe(1, CellType::Gru, 0.5);
    decoder.gate.fc.bias.as_mut().unwrap().fill_(f32::NAN);
    let (hidden, enc) = inputs(CellType::Gru, 1);
    let masks = IntentMasks::from_intents(&[0], 1).unwrap();
    assert!(matches!(
        decoder.step(&[0], &hidden, &enc, Some(&masks)),
        Err(DecodeError::DegenerateGate { .. })
    ));
}

#[test]
fn test_config_builds_mixture() {
    let config = Config {
        n_intents: 2,
        attention: false,
        ..Config::tiny()
    };
    match Decoder::from_config(&config).unwrap() {
        Decoder::Moe(d) => {
            assert_eq!(d.n_intents(), 2);
            assert_eq!(d.gate.n_members(), 3);
            assert_eq!(d.gamma, config.gamma_expert);
        }
        other => panic!("expected mixture decoder, got {}", other.name()),
    }
}
