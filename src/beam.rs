// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Best-first beam search over decoder steps.
//!
//! Each dialogue turn owns a private priority queue of partial hypotheses
//! ([`BeamNode`] chains). Nodes are immutable once created and link to their
//! parent through an `Arc`, so a chain stays alive exactly as long as some
//! queued or completed node still reaches it.
//!
//! Per turn:
//!
//! ```text
//! push root(SOS, logp = 0, len = 1)
//! loop:
//!     stop if nodes_pushed >= max_queue_size
//!     pop the node with the lowest score (insertion order on ties)
//!     EOS with a parent   -> complete; stop once n_best are complete
//!     otherwise           -> one decoder step, push the top beam_width children
//! no complete hypothesis -> pop up to n_best queued nodes as best effort
//! ```
//!
//! `score = -(logp / (len - 1 + 1e-6) + reward)`; the reward hooks default to
//! zero. Top-k breaks ties toward the lower token id, which makes width 1
//! reproduce greedy decoding.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cell::HiddenState;
use crate::config::Config;
use crate::decoder::DecoderStep;
use crate::error::{DecodeError, DecodeResult};
use crate::moe::IntentMasks;
use crate::tensor::{top_k, Tensor};
use crate::vocab::{EOS_TOKEN, SOS_TOKEN};

const LENGTH_EPS: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeamConfig {
    pub beam_width: usize,
    /// Completed hypotheses required before a turn stops.
    pub n_best: usize,
    /// Hard cap on nodes ever pushed onto one turn's queue.
    pub max_queue_size: usize,
    /// Worker threads for `search_batch`; 1 runs turns serially.
    pub workers: usize,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam_width: 10,
            n_best: 1,
            max_queue_size: 2000,
            workers: 1,
        }
    }
}

impl BeamConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            beam_width: config.beam_width,
            n_best: config.n_best,
            max_queue_size: config.max_queue_size,
            workers: config.beam_workers,
        }
    }

    pub fn validate(&self) -> DecodeResult<()> {
        if self.beam_width == 0 || self.n_best == 0 || self.max_queue_size == 0 || self.workers == 0
        {
            return Err(DecodeError::InvalidConfig(format!(
                "beam settings must all be >= 1: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Extension points of the scoring function. Both are zero by default, which
/// leaves the plain length-normalized log-probability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreHooks {
    /// Subtracted once per earlier occurrence of the node's token in its chain.
    pub repeat_penalty: f64,
    /// Added once per emitted token.
    pub token_reward: f64,
}

impl ScoreHooks {
    fn reward(&self, node: &BeamNode) -> f64 {
        let mut reward = self.token_reward * (node.len - 1) as f64;
        if self.repeat_penalty != 0.0 {
            let repeats = node.ancestors().filter(|n| n.token == node.token).count();
            reward -= self.repeat_penalty * repeats as f64;
        }
        reward
    }
}

/// One partial hypothesis. Never mutated after creation.
#[derive(Debug)]
pub struct BeamNode {
    hidden: Arc<HiddenState>,
    parent: Option<Arc<BeamNode>>,
    token: usize,
    logp: f64,
    len: usize,
}

impl BeamNode {
    fn root(hidden: HiddenState) -> Self {
        Self {
            hidden: Arc::new(hidden),
            parent: None,
            token: SOS_TOKEN,
            logp: 0.0,
            len: 1,
        }
    }

    pub fn token(&self) -> usize {
        self.token
    }

    pub fn logp(&self) -> f64 {
        self.logp
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// True for the root, which has emitted no token yet.
    pub fn is_empty(&self) -> bool {
        self.parent.is_none()
    }

    pub fn hidden(&self) -> &HiddenState {
        &self.hidden
    }

    /// Length-normalized score; lower is better.
    pub fn score(&self, hooks: &ScoreHooks) -> f64 {
        let norm = self.logp / ((self.len as f64) - 1.0 + LENGTH_EPS);
        -(norm + hooks.reward(self))
    }

    fn ancestors(&self) -> impl Iterator<Item = &BeamNode> {
        std::iter::successors(self.parent.as_deref(), |n| n.parent.as_deref())
    }

    /// Token ids from the root to this node, root included.
    pub fn backtrace(&self) -> Vec<usize> {
        let mut tokens: Vec<usize> = std::iter::once(self.token)
            .chain(self.ancestors().map(|n| n.token))
            .collect();
        tokens.reverse();
        tokens
    }
}

struct QueueEntry {
    score: f64,
    seq: u64,
    node: Arc<BeamNode>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap: the lowest score, then the earliest push, ranks highest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A decoded token sequence with the start and end markers removed.
#[derive(Clone, Debug, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<usize>,
    pub logp: f64,
    pub score: f64,
    /// False for best-effort output taken after the safety cap.
    pub complete: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub nodes_pushed: usize,
    pub expansions: usize,
    pub completed: usize,
    pub hit_cap: bool,
}

/// Hypotheses for one turn, best first, and how the search went.
#[derive(Clone, Debug, PartialEq)]
pub struct BeamOutcome {
    pub hypotheses: Vec<Hypothesis>,
    pub stats: SearchStats,
}

impl BeamOutcome {
    pub fn best(&self) -> Option<&Hypothesis> {
        self.hypotheses.first()
    }
}

#[derive(Clone, Debug, Default)]
pub struct BeamSearch {
    pub config: BeamConfig,
    pub hooks: ScoreHooks,
}

struct TurnQueue<'h> {
    heap: BinaryHeap<QueueEntry>,
    seq: u64,
    pushed: usize,
    hooks: &'h ScoreHooks,
}

impl TurnQueue<'_> {
    fn push(&mut self, node: BeamNode) {
        let score = node.score(self.hooks);
        self.heap.push(QueueEntry {
            score,
            seq: self.seq,
            node: Arc::new(node),
        });
        self.seq += 1;
        self.pushed += 1;
    }
}

fn into_hypothesis(entry: &QueueEntry, complete: bool) -> Hypothesis {
    let mut tokens = entry.node.backtrace();
    if tokens.first() == Some(&SOS_TOKEN) {
        tokens.remove(0);
    }
    if tokens.last() == Some(&EOS_TOKEN) {
        tokens.pop();
    }
    Hypothesis {
        tokens,
        logp: entry.node.logp,
        score: entry.score,
        complete,
    }
}

impl BeamSearch {
    pub fn new(config: BeamConfig) -> Self {
        Self {
            config,
            hooks: ScoreHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: ScoreHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Search one turn. `hidden` and `encoder_outputs` hold a single batch row;
    /// `masks`, when given, is that row's intent view.
    pub fn search_turn<D: DecoderStep + ?Sized>(
        &self,
        decoder: &D,
        hidden: HiddenState,
        encoder_outputs: &Tensor,
        masks: Option<&IntentMasks>,
    ) -> DecodeResult<BeamOutcome> {
        self.config.validate()?;
        if hidden.batch_size() != 1 {
            return Err(DecodeError::BatchMismatch {
                expected: 1,
                got: hidden.batch_size(),
            });
        }
        let width = self.config.beam_width.min(decoder.vocab_size());
        let cap = self.config.max_queue_size;

        let mut queue = TurnQueue {
            heap: BinaryHeap::new(),
            seq: 0,
            pushed: 0,
            hooks: &self.hooks,
        };
        queue.push(BeamNode::root(hidden));

        let mut stats = SearchStats::default();
        let mut complete: Vec<QueueEntry> = Vec::new();

        loop {
            if queue.pushed >= cap {
                stats.hit_cap = true;
                break;
            }
            let Some(entry) = queue.heap.pop() else {
                break;
            };
            let node = &entry.node;
            if node.token == EOS_TOKEN && node.parent.is_some() {
                complete.push(entry);
                if complete.len() >= self.config.n_best {
                    break;
                }
                continue;
            }

            let out = decoder.step(&[node.token], &node.hidden, encoder_outputs, masks)?;
            stats.expansions += 1;
            let child_hidden = Arc::new(out.hidden);
            for (token, lp) in top_k(out.log_probs.try_row(0)?, width) {
                if queue.pushed >= cap {
                    break;
                }
                queue.push(BeamNode {
                    hidden: Arc::clone(&child_hidden),
                    parent: Some(Arc::clone(node)),
                    token,
                    logp: node.logp + f64::from(lp),
                    len: node.len + 1,
                });
            }
        }

        stats.nodes_pushed = queue.pushed;
        stats.completed = complete.len();

        let hypotheses: Vec<Hypothesis> = if complete.is_empty() {
            let mut best_effort = Vec::with_capacity(self.config.n_best);
            while best_effort.len() < self.config.n_best {
                match queue.heap.pop() {
                    Some(entry) => best_effort.push(into_hypothesis(&entry, false)),
                    None => break,
                }
            }
            best_effort
        } else {
            // Completed in pop order; re-rank by score with push order on ties.
            complete.sort_by(|a, b| b.cmp(a));
            complete
                .iter()
                .map(|entry| into_hypothesis(entry, true))
                .collect()
        };

        if stats.hit_cap {
            warn!(
                nodes_pushed = stats.nodes_pushed,
                completed = stats.completed,
                "beam search hit the queue cap"
            );
        }
        debug!(
            expansions = stats.expansions,
            nodes_pushed = stats.nodes_pushed,
            completed = stats.completed,
            best_len = hypotheses.first().map_or(0, |h| h.tokens.len()),
            "beam turn finished"
        );

        Ok(BeamOutcome { hypotheses, stats })
    }

    /// Search every batch row. Rows are independent; with `workers > 1` they are
    /// spread over scoped threads, each row still owning its own queue.
    pub fn search_batch<D: DecoderStep + Sync + ?Sized>(
        &self,
        decoder: &D,
        hidden: &HiddenState,
        encoder_outputs: &Tensor,
        masks: Option<&IntentMasks>,
    ) -> DecodeResult<Vec<BeamOutcome>> {
        self.config.validate()?;
        let batch = hidden.batch_size();
        let (enc_batch, _, _) = encoder_outputs.try_dims_3d()?;
        if enc_batch != batch {
            return Err(DecodeError::BatchMismatch {
                expected: batch,
                got: enc_batch,
            });
        }
        if let Some(m) = masks {
            m.validate(m.n_intents(), batch)?;
        }

        let run = |b: usize| -> DecodeResult<BeamOutcome> {
            let row_masks = masks.map(|m| m.select(b)).transpose()?;
            let row_encoder = encoder_outputs.try_select_rows(&[b])?;
            self.search_turn(decoder, hidden.select(b)?, &row_encoder, row_masks.as_ref())
        };

        let workers = self.config.workers.min(batch);
        if workers <= 1 {
            return (0..batch).map(run).collect();
        }

        let mut results: Vec<Option<DecodeResult<BeamOutcome>>> = (0..batch).map(|_| None).collect();
        let run = &run;
        let joined: Vec<thread::Result<Vec<(usize, DecodeResult<BeamOutcome>)>>> =
            thread::scope(|s| {
                let handles: Vec<_> = (0..workers)
                    .map(|w| {
                        s.spawn(move || {
                            (w..batch)
                                .step_by(workers)
                                .map(|b| (b, run(b)))
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join()).collect()
            });
        for part in joined {
            let part = part.map_err(|_| DecodeError::WorkerPanicked)?;
            for (b, outcome) in part {
                results[b] = Some(outcome);
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(DecodeError::WorkerPanicked)))
            .collect()
    }
}
