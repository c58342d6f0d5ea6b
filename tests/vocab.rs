// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

use nn_decoder::{
    sentences, DecodeError, UnknownTokenError, Vocabulary, EOS_TOKEN, PAD_TOKEN, RESERVED_WORDS,
    SOS_TOKEN, UNK_TOKEN,
};

fn hotel_vocab() -> Vocabulary {
    Vocabulary::from_words(["the", "hotel", "is", "cheap", "hotel"])
}

// --- lookup ---

#[test]
fn test_reserved_ids() {
    let vocab = Vocabulary::new();
    assert_eq!(vocab.len(), 4);
    assert_eq!(vocab.id_to_string(SOS_TOKEN).unwrap(), "_GO");
    assert_eq!(vocab.id_to_string(EOS_TOKEN).unwrap(), "_EOS");
    assert_eq!(vocab.id_to_string(UNK_TOKEN).unwrap(), "_UNK");
    assert_eq!(vocab.id_to_string(PAD_TOKEN).unwrap(), "_PAD");
    for (id, word) in RESERVED_WORDS.iter().enumerate() {
        assert_eq!(vocab.string_to_id(word).unwrap(), id);
    }
}

#[test]
fn test_words_follow_reserved_ids() {
    let vocab = hotel_vocab();
    assert_eq!(vocab.len(), 8);
    assert_eq!(vocab.string_to_id("the").unwrap(), 4);
    assert_eq!(vocab.string_to_id("cheap").unwrap(), 7);
    for (id, word) in vocab.iter() {
        assert_eq!(vocab.string_to_id(word).unwrap(), id);
        assert_eq!(vocab.id_to_string(id).unwrap(), word);
    }
}

#[test]
fn test_unknown_lookups() {
    let vocab = hotel_vocab();
    assert_eq!(vocab.id_to_string(99), Err(UnknownTokenError::Id(99)));
    assert_eq!(
        vocab.string_to_id("museum"),
        Err(UnknownTokenError::Word("museum".to_string()))
    );
    assert_eq!(vocab.word_or_unk(99), "_UNK");
    assert_eq!(vocab.id_or_unk("museum"), UNK_TOKEN);

    let err: DecodeError = vocab.id_to_string(99).unwrap_err().into();
    assert!(err.to_string().contains("99"));
}

// --- sentences ---

#[test]
fn test_encode_sentence_appends_eos() {
    let vocab = hotel_vocab();
    assert_eq!(
        vocab.encode_sentence("the hotel is   cheap"),
        vec![4, 5, 6, 7, EOS_TOKEN]
    );
    assert_eq!(vocab.encode_sentence("the museum"), vec![4, UNK_TOKEN, EOS_TOKEN]);
    assert_eq!(vocab.encode_sentence(""), vec![EOS_TOKEN]);
}

#[test]
fn test_sentence_stops_at_eos_and_skips_sos() {
    let vocab = hotel_vocab();
    assert_eq!(vocab.sentence(&[SOS_TOKEN, 4, 5, EOS_TOKEN, 6]), "the hotel");
    assert_eq!(vocab.sentence(&[5, 6, 7]), "hotel is cheap");
    assert_eq!(vocab.sentence(&[EOS_TOKEN, 4]), "");
    assert_eq!(vocab.sentence(&[4, 42]), "the _UNK");
    assert_eq!(
        sentences(&vocab, &[vec![4, 5], vec![EOS_TOKEN]]),
        vec!["the hotel".to_string(), String::new()]
    );
}

// --- persistence ---

#[test]
fn test_index2word_round_trip() {
    let vocab = hotel_vocab();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index2word.json");
    vocab.save(&path).unwrap();
    let loaded = Vocabulary::load(&path).unwrap();
    assert_eq!(loaded, vocab);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["0"], "_GO");
    assert_eq!(raw["5"], "hotel");
}

#[test]
fn test_index2word_json_validation() {
    let ok = r#"{"0": "_GO", "1": "_EOS", "2": "_UNK", "3": "_PAD", "4": "hi"}"#;
    assert_eq!(Vocabulary::from_index2word_json(ok).unwrap().len(), 5);

    let cases = [
        r#"{"0": "_GO", "1": "_EOS", "2": "_UNK", "3": "_PAD", "5": "hi"}"#,
        r#"{"0": "_GO", "1": "_EOS", "2": "_UNK", "3": "pad"}"#,
        r#"{"0": "_GO", "1": "_EOS", "2": "_UNK", "3": "_PAD", "x": "hi"}"#,
        r#"{"0": "_GO", "1": "_EOS", "2": "_UNK", "3": "_PAD", "4": "_GO"}"#,
        r#"{"0": "_GO", "1": "_EOS"}"#,
    ];
    for json in cases {
        assert!(
            matches!(
                Vocabulary::from_index2word_json(json),
                Err(DecodeError::InvalidVocabulary(_))
            ),
            "accepted {json}"
        );
    }
    assert!(matches!(
        Vocabulary::from_index2word_json("[1, 2]"),
        Err(DecodeError::Json(_))
    ));
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Vocabulary::load(dir.path().join("missing.json")),
        Err(DecodeError::Io(_))
    ));
}
