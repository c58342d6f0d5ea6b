// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Layer trait and basic layer implementations.
//!
//! Building blocks: Linear, Embedding. Both are inference-only: lookups take
//! `&self` so a built decoder can be shared read-only across beam-search
//! workers.
//!
//! Helper macros reduce boilerplate for parameter collection:
//! - `collect_params!` / `collect_params_mut!` -- flatten params from sub-layers

use crate::error::{DecodeError, DecodeResult};
use crate::tensor::{gemm_transb, Shape, Tensor, TensorError, TensorResult};

// ---- Parameter collection macros ----
// Composite layers aggregate their sub-layers' parameters by hand.

macro_rules! collect_params {
    ($($layer:expr),+ $(,)?) => {{
        let mut params = Vec::new();
        $(params.extend($layer.parameters());)+
        params
    }};
}

macro_rules! collect_params_mut {
    ($($layer:expr),+ $(,)?) => {{
        let mut params = Vec::new();
        $(params.extend($layer.parameters_mut());)+
        params
    }};
}

pub(crate) use collect_params;
pub(crate) use collect_params_mut;

pub trait Layer {
    fn forward(&self, input: &Tensor) -> TensorResult<Tensor>;
    fn parameters(&self) -> Vec<&Tensor>;
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}

/// Fully connected layer: Y = X @ W^T + b.
///
/// W is `[out_features, in_features]`, b is `[out_features]`.
/// Initialization: N(0, sqrt(2/fan_in)) (He initialization), bias zeroed.
pub struct Linear {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool, seed: u64) -> Self {
        // He init: std = sqrt(2/fan_in)
        let std = (2.0 / in_features.max(1) as f32).sqrt();
        Self {
            weight: Tensor::randn(Shape::new(&[out_features, in_features]), seed).scale(std),
            bias: bias.then(|| Tensor::zeros(Shape::new(&[out_features]))),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape().last_dim()
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape().dims()[0]
    }
}

impl Layer for Linear {
    // Y = X @ W^T via gemm_transb (avoids materializing the transpose).
    // X: [batch.., in_features], W: [out_features, in_features], Y: [batch.., out_features]
    fn forward(&self, input: &Tensor) -> TensorResult<Tensor> {
        let out_features = self.out_features();
        let in_features = self.in_features();
        if input.shape().last_dim() != in_features {
            return Err(TensorError::InvalidDimension {
                expected: in_features,
                got: input.shape().last_dim(),
            });
        }
        let batch = input.numel() / in_features.max(1);

        let mut out = vec![0.0; batch * out_features];
        gemm_transb(
            batch,
            out_features,
            in_features,
            input.data(),
            self.weight.data(),
            &mut out,
        );
        if let Some(bias) = &self.bias {
            for row in out.chunks_exact_mut(out_features.max(1)) {
                for (y, b) in row.iter_mut().zip(bias.data()) {
                    *y += b;
                }
            }
        }

        Ok(Tensor::from_vec(out, input.shape().with_last_dim(out_features)))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.weight];
        params.extend(self.bias.as_mut());
        params
    }
}

/// Embedding lookup table: token_id -> dense vector.
///
/// Embedding(token) = W[token, :] where W is [vocab_size, dim].
/// The optional padding row is zeroed at construction.
pub struct Embedding {
    pub weight: Tensor,
    padding_idx: Option<usize>,
}

impl Embedding {
    pub fn new(vocab_size: usize, dim: usize, padding_idx: Option<usize>, seed: u64) -> Self {
        let std = (2.0 / dim.max(1) as f32).sqrt();
        let mut weight = Tensor::randn(Shape::new(&[vocab_size, dim]), seed).scale(std);
        if let Some(pad) = padding_idx.filter(|&p| p < vocab_size) {
            weight.data_mut()[pad * dim..(pad + 1) * dim].fill(0.0);
        }
        Self {
            weight,
            padding_idx,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.shape().dims()[0]
    }

    pub fn dim(&self) -> usize {
        self.weight.shape().last_dim()
    }

    pub fn padding_idx(&self) -> Option<usize> {
        self.padding_idx
    }

    /// Row lookup for a flat list of ids -> `[ids.len(), dim]`.
    /// Ids outside the table fail fast instead of reading garbage.
    pub fn lookup(&self, token_ids: &[usize]) -> DecodeResult<Tensor> {
        let dim = self.dim();
        let vocab_size = self.vocab_size();
        let mut out = vec![0.0; token_ids.len() * dim];
        for (i, &token) in token_ids.iter().enumerate() {
            if token >= vocab_size {
                return Err(DecodeError::TokenOutOfRange {
                    id: token,
                    vocab_size,
                });
            }
            let src = token * dim;
            out[i * dim..(i + 1) * dim].copy_from_slice(&self.weight.data()[src..src + dim]);
        }
        Ok(Tensor::from_vec(out, Shape::new(&[token_ids.len(), dim])))
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight]
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weight]
    }
}
