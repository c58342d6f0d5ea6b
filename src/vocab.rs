// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Output vocabulary: bidirectional token id <-> word table.
//!
//! Ids 0-3 are reserved and never reassigned:
//!
//! | id | word   | meaning           |
//! |----|--------|-------------------|
//! | 0  | `_GO`  | start of sequence |
//! | 1  | `_EOS` | end of sequence   |
//! | 2  | `_UNK` | unknown word      |
//! | 3  | `_PAD` | padding           |
//!
//! On disk the table is an `index2word` JSON object keyed by the decimal id
//! (`{"0": "_GO", "1": "_EOS", ...}`).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{DecodeError, DecodeResult, UnknownTokenError};

pub const SOS_TOKEN: usize = 0;
pub const EOS_TOKEN: usize = 1;
pub const UNK_TOKEN: usize = 2;
pub const PAD_TOKEN: usize = 3;

pub const RESERVED_WORDS: [&str; 4] = ["_GO", "_EOS", "_UNK", "_PAD"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    index2word: Vec<String>,
    word2index: HashMap<String, usize>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    /// Table holding only the reserved entries.
    pub fn new() -> Self {
        let index2word: Vec<String> = RESERVED_WORDS.iter().map(|w| w.to_string()).collect();
        let word2index = index2word
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();
        Self {
            index2word,
            word2index,
        }
    }

    /// Reserved entries followed by `words` in order (duplicates skipped).
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::new();
        for w in words {
            vocab.add_word(w.as_ref());
        }
        vocab
    }

    /// Id of `word`, appending it if new. Reserved words map to their fixed ids.
    pub fn add_word(&mut self, word: &str) -> usize {
        if let Some(&id) = self.word2index.get(word) {
            return id;
        }
        let id = self.index2word.len();
        self.index2word.push(word.to_string());
        self.word2index.insert(word.to_string(), id);
        id
    }

    pub fn len(&self) -> usize {
        self.index2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index2word.is_empty()
    }

    pub fn id_to_string(&self, id: usize) -> Result<&str, UnknownTokenError> {
        self.index2word
            .get(id)
            .map(String::as_str)
            .ok_or(UnknownTokenError::Id(id))
    }

    pub fn string_to_id(&self, word: &str) -> Result<usize, UnknownTokenError> {
        self.word2index
            .get(word)
            .copied()
            .ok_or_else(|| UnknownTokenError::Word(word.to_string()))
    }

    /// Lenient lookup used while decoding: unknown ids render as `_UNK`.
    pub fn word_or_unk(&self, id: usize) -> &str {
        self.id_to_string(id).unwrap_or(RESERVED_WORDS[UNK_TOKEN])
    }

    /// Lenient lookup used while encoding: unknown words map to `UNK_TOKEN`.
    pub fn id_or_unk(&self, word: &str) -> usize {
        self.string_to_id(word).unwrap_or(UNK_TOKEN)
    }

    /// Whitespace-split `text` into ids and terminate with `EOS_TOKEN`.
    pub fn encode_sentence(&self, text: &str) -> Vec<usize> {
        text.split_whitespace()
            .map(|w| self.id_or_unk(w))
            .chain(std::iter::once(EOS_TOKEN))
            .collect()
    }

    /// Join the words for `ids`, skipping `SOS_TOKEN` and stopping at the
    /// first `EOS_TOKEN`.
    pub fn sentence(&self, ids: &[usize]) -> String {
        ids.iter()
            .copied()
            .take_while(|&id| id != EOS_TOKEN)
            .filter(|&id| id != SOS_TOKEN)
            .map(|id| self.word_or_unk(id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn from_index2word_json(json: &str) -> DecodeResult<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;
        let mut by_id = BTreeMap::new();
        for (key, word) in raw {
            let id: usize = key
                .trim()
                .parse()
                .map_err(|_| DecodeError::InvalidVocabulary(format!("non-numeric id {key:?}")))?;
            by_id.insert(id, word);
        }

        let mut index2word = Vec::with_capacity(by_id.len());
        let mut word2index = HashMap::with_capacity(by_id.len());
        for (expected, (id, word)) in by_id.into_iter().enumerate() {
            if id != expected {
                return Err(DecodeError::InvalidVocabulary(format!(
                    "ids must be contiguous from 0, missing id {expected}"
                )));
            }
            if let Some(reserved) = RESERVED_WORDS.get(id) {
                if word != *reserved {
                    return Err(DecodeError::InvalidVocabulary(format!(
                        "reserved id {id} must be {reserved:?}, found {word:?}"
                    )));
                }
            }
            if word2index.insert(word.clone(), id).is_some() {
                return Err(DecodeError::InvalidVocabulary(format!(
                    "duplicate word {word:?}"
                )));
            }
            index2word.push(word);
        }
        if index2word.len() < RESERVED_WORDS.len() {
            return Err(DecodeError::InvalidVocabulary(format!(
                "missing reserved ids: table has {} entries",
                index2word.len()
            )));
        }
        Ok(Self {
            index2word,
            word2index,
        })
    }

    pub fn to_index2word_json(&self) -> DecodeResult<String> {
        let map: BTreeMap<String, &str> = self
            .index2word
            .iter()
            .enumerate()
            .map(|(i, w)| (i.to_string(), w.as_str()))
            .collect();
        Ok(serde_json::to_string_pretty(&map)?)
    }

    pub fn load(path: impl AsRef<Path>) -> DecodeResult<Self> {
        Self::from_index2word_json(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> DecodeResult<()> {
        fs::write(path, self.to_index2word_json()?)?;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.index2word
            .iter()
            .enumerate()
            .map(|(i, w)| (i, w.as_str()))
    }
}
