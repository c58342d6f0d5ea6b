// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

use nn_decoder::{BeamConfig, CellType, Config, DecodeError, DecodeStrategy};

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.beam_width, 10);
    assert_eq!(config.max_len, 50);
    assert_eq!(config.max_queue_size, 2000);
    assert_eq!(config.gamma_expert, 0.5);
    assert_eq!(config.strategy, DecodeStrategy::Beam);
    assert!(!config.use_moe());
    config.validate().unwrap();
    Config::tiny().validate().unwrap();
}

#[test]
fn test_beam_config_from_config() {
    let config = Config {
        beam_width: 4,
        n_best: 2,
        max_queue_size: 99,
        beam_workers: 3,
        ..Config::tiny()
    };
    assert_eq!(
        BeamConfig::from_config(&config),
        BeamConfig {
            beam_width: 4,
            n_best: 2,
            max_queue_size: 99,
            workers: 3,
        }
    );
    assert_eq!(BeamConfig::default().max_queue_size, 2000);
}

#[test]
fn test_json_snapshot_round_trip() {
    let config = Config {
        n_intents: 3,
        cell_type: CellType::Gru,
        strategy: DecodeStrategy::Greedy,
        seed: 123,
        ..Config::tiny()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.config");
    config.save(&path).unwrap();
    assert_eq!(Config::load(&path).unwrap(), config);

    let json = config.to_json().unwrap();
    assert!(json.contains("\"cell_type\": \"gru\""));
    assert!(json.contains("\"strategy\": \"greedy\""));
}

#[test]
fn test_missing_fields_take_defaults() {
    let config = Config::from_json(r#"{"vocab_size": 30, "n_intents": 2}"#).unwrap();
    assert_eq!(config.vocab_size, 30);
    assert_eq!(config.n_intents, 2);
    assert_eq!(config.hidden_size, Config::default().hidden_size);
    assert!(config.use_moe());
}

#[test]
fn test_bidirectional_cell_names() {
    let config = Config::from_json(r#"{"cell_type": "bilstm"}"#).unwrap();
    assert_eq!(config.cell_type, CellType::Lstm);
    let config = Config::from_json(r#"{"cell_type": "bigru"}"#).unwrap();
    assert_eq!(config.cell_type, CellType::Gru);
    assert!(matches!(
        Config::from_json(r#"{"cell_type": "transformer"}"#),
        Err(DecodeError::Json(_))
    ));
}

#[test]
fn test_invalid_configs() {
    let cases = [
        Config { vocab_size: 3, ..Config::tiny() },
        Config { hidden_size: 0, ..Config::tiny() },
        Config { beam_width: 0, ..Config::tiny() },
        Config { beam_width: 17, ..Config::tiny() },
        Config { n_best: 0, ..Config::tiny() },
        Config { max_queue_size: 0, ..Config::tiny() },
        Config { beam_workers: 0, ..Config::tiny() },
        Config { max_len: 0, ..Config::tiny() },
        Config { teacher_ratio: 1.5, ..Config::tiny() },
        Config { gamma_expert: -0.1, ..Config::tiny() },
        Config { lambda_expert: 2.0, ..Config::tiny() },
    ];
    for config in cases {
        assert!(
            matches!(config.validate(), Err(DecodeError::InvalidConfig(_))),
            "accepted {config:?}"
        );
    }
    assert!(matches!(
        Config::from_json(r#"{"max_len": 0}"#),
        Err(DecodeError::InvalidConfig(_))
    ));
}
