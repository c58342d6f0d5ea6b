// SPDX-License-Identifier: CC-BY-NC-SA-4.0
// Copyright (c) 2025-2026 fumi-engineer

//! Tensor primitives and CPU ops.
//!
//! Core tensor type for the response decoder. All storage is f32, row-major,
//! flat `Vec<f32>`. Shape metadata is kept separately in [`Shape`].
//!
//! Key design decisions:
//! - `from_vec()` takes ownership (zero-copy), `from_slice()` copies -- prefer
//!   `from_vec` when the caller already owns the data.
//! - `softmax` / `log_softmax` use the numerically stable max-subtraction
//!   trick to avoid exp() overflow.
//! - The leading axis is always the batch axis. Row helpers (`select_rows`,
//!   `fill_rows`) operate on whole leading-axis slabs so a `[B, T, H]`
//!   encoder tensor and a `[B, H]` hidden state are masked the same way.
//! - `gemm_transb` accumulates every output element in a fixed order that
//!   does not depend on the batch size. Decoding one row alone and decoding
//!   it inside a batch is therefore bit-identical, which beam search relies on.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Tensor shape with row-major semantics.
///
/// Empty shape `[]` represents a scalar with `numel() = 1`.
/// Strides are implicit: `stride[d] = product(dims[d+1..])`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn numel(&self) -> usize {
        if self.0.is_empty() {
            1
        } else {
            self.0.iter().product()
        }
    }

    pub fn last_dim(&self) -> usize {
        self.0.last().copied().unwrap_or(1)
    }

    /// Size of the leading (batch) axis. Scalars count as one row.
    pub fn rows(&self) -> usize {
        self.0.first().copied().unwrap_or(1)
    }

    pub fn with_last_dim(&self, new_last: usize) -> Shape {
        let mut dims = self.0.clone();
        if let Some(last) = dims.last_mut() {
            *last = new_last;
        } else {
            dims.push(new_last);
        }
        Shape(dims)
    }

    pub fn with_rows(&self, rows: usize) -> Shape {
        let mut dims = self.0.clone();
        if let Some(first) = dims.first_mut() {
            *first = rows;
        } else {
            dims.push(rows);
        }
        Shape(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Tensor op errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("shape mismatch: lhs={lhs:?}, rhs={rhs:?}")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },
    #[error("invalid dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },
    #[error("invalid rank: expected {expected}-D, got {shape:?}")]
    InvalidRank { expected: usize, shape: Vec<usize> },
    #[error("numel mismatch: expected {expected}, got {got}")]
    NumelMismatch { expected: usize, got: usize },
    #[error("index out of bounds at axis {axis}: index={index}, bound={bound}")]
    IndexOutOfBounds {
        axis: usize,
        index: usize,
        bound: usize,
    },
}

pub type TensorResult<T> = Result<T, TensorError>;

macro_rules! panic_wrapper {
    (pub fn $name:ident(&self $(, $arg:ident : $ty:ty)*) -> $ret:ty => $try_name:ident) => {
        pub fn $name(&self $(, $arg: $ty)*) -> $ret {
            match self.$try_name($($arg),*) {
                Ok(v) => v,
                Err(e) => panic!("{e}"),
            }
        }
    };
}

/// CPU tensor with row-major f32 storage.
///
/// Memory layout: flat `Vec<f32>` with row-major (C-order) indexing.
/// Index calculation: `flat_idx = sum_d(index_d * stride_d)` where
/// `stride_d = product(dims[d+1..])`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    fn like_with_data(&self, data: Vec<f32>) -> Tensor {
        Tensor {
            data,
            shape: self.shape.clone(),
        }
    }

    pub fn zeros(shape: Shape) -> Self {
        Self {
            data: vec![0.0; shape.numel()],
            shape,
        }
    }

    pub fn full(shape: Shape, value: f32) -> Self {
        Self {
            data: vec![value; shape.numel()],
            shape,
        }
    }

    pub fn from_slice(data: &[f32], shape: Shape) -> Self {
        assert_eq!(data.len(), shape.numel(), "data length vs shape mismatch");
        Self {
            data: data.to_vec(),
            shape,
        }
    }

    /// Create tensor from an owned `Vec<f32>`, **zero-copy** (no allocation).
    /// Prefer this over `from_slice` whenever the caller already owns the buffer.
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(data.len(), shape.numel(), "data length vs shape mismatch");
        Self { data, shape }
    }

    /// Fallible `from_vec` for buffers whose length comes from caller input.
    pub fn try_from_vec(data: Vec<f32>, shape: Shape) -> TensorResult<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::NumelMismatch {
                expected: shape.numel(),
                got: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    /// Generate N(0,1) samples using LCG + Box-Muller transform.
    ///
    /// Box-Muller: given u1,u2 ~ Uniform(0,1):
    ///   z0 = sqrt(-2*ln(u1)) * cos(2*pi*u2)
    ///   z1 = sqrt(-2*ln(u1)) * sin(2*pi*u2)
    /// Both z0,z1 are independent N(0,1).
    ///
    /// LCG is intentionally simple -- this is for reproducible weight init,
    /// not cryptographic randomness.
    pub fn randn(shape: Shape, seed: u64) -> Self {
        let mut state = seed;
        let mut lcg_uniform = || -> f64 {
            // LCG with Knuth's constants (period 2^64)
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1);
            // Clamp away from 0 to avoid ln(0) = -inf in Box-Muller
            (state as f64 / u64::MAX as f64).clamp(1e-10, 1.0)
        };
        let n = shape.numel();
        let mut data = Vec::with_capacity(n);
        let mut i = 0;
        while i < n {
            let u1 = lcg_uniform();
            let u2 = lcg_uniform();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            data.push((r * theta.cos()) as f32);
            if i + 1 < n {
                data.push((r * theta.sin()) as f32);
            }
            i += 2;
        }
        Self { data, shape }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn try_dims_2d(&self) -> TensorResult<(usize, usize)> {
        match *self.shape.dims() {
            [a, b] => Ok((a, b)),
            _ => Err(TensorError::InvalidRank {
                expected: 2,
                shape: self.shape.dims().to_vec(),
            }),
        }
    }

    pub fn try_dims_3d(&self) -> TensorResult<(usize, usize, usize)> {
        match *self.shape.dims() {
            [a, b, c] => Ok((a, b, c)),
            _ => Err(TensorError::InvalidRank {
                expected: 3,
                shape: self.shape.dims().to_vec(),
            }),
        }
    }

    /// Width of one leading-axis slab (`numel / rows`).
    pub fn row_width(&self) -> usize {
        let rows = self.shape.rows();
        if rows == 0 { 0 } else { self.numel() / rows }
    }

    /// Borrow one leading-axis slab as a flat slice.
    pub fn try_row(&self, row: usize) -> TensorResult<&[f32]> {
        let rows = self.shape.rows();
        if row >= rows {
            return Err(TensorError::IndexOutOfBounds {
                axis: 0,
                index: row,
                bound: rows,
            });
        }
        let w = self.row_width();
        Ok(&self.data[row * w..(row + 1) * w])
    }

    panic_wrapper!(pub fn row(&self, row: usize) -> &[f32] => try_row);

    fn map_unary(&self, op: impl Fn(f32) -> f32) -> Tensor {
        self.like_with_data(self.data.iter().copied().map(op).collect())
    }

    pub fn scale(&self, s: f32) -> Tensor {
        self.map_unary(|x| x * s)
    }

    pub fn tanh(&self) -> Tensor {
        self.map_unary(f32::tanh)
    }

    pub fn exp(&self) -> Tensor {
        self.map_unary(f32::exp)
    }

    fn ensure_same_shape(&self, other: &Tensor) -> TensorResult<()> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                lhs: self.shape.dims().to_vec(),
                rhs: other.shape.dims().to_vec(),
            });
        }
        Ok(())
    }

    fn map_binary(&self, other: &Tensor, op: impl Fn(f32, f32) -> f32) -> TensorResult<Tensor> {
        self.ensure_same_shape(other)?;
        let out = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| op(a, b))
            .collect();
        Ok(self.like_with_data(out))
    }

    /// Linear interpolation: gamma * self + (1 - gamma) * other.
    pub fn try_lerp(&self, other: &Tensor, gamma: f32) -> TensorResult<Tensor> {
        self.map_binary(other, |a, b| gamma * a + (1.0 - gamma) * b)
    }

    panic_wrapper!(pub fn lerp(&self, other: &Tensor, gamma: f32) -> Tensor => try_lerp);

    /// Softmax along the last dimension.
    pub fn softmax(&self) -> Tensor {
        let mut out = self.clone();
        if self.shape.dims().is_empty() {
            out.fill_(1.0);
            return out;
        }
        let w = self.shape.last_dim();
        for row in out.data.chunks_exact_mut(w) {
            softmax_in_place(row);
        }
        out
    }

    /// Log-softmax along the last dimension:
    ///   log p_i = x_i - max(x) - ln(sum_j exp(x_j - max(x)))
    pub fn log_softmax(&self) -> Tensor {
        let mut out = self.clone();
        if self.shape.dims().is_empty() {
            out.fill_(0.0);
            return out;
        }
        let w = self.shape.last_dim();
        for row in out.data.chunks_exact_mut(w) {
            log_softmax_in_place(row);
        }
        out
    }

    /// Concatenate 2-D tensors `[B, d_i]` along the last axis -> `[B, sum(d_i)]`.
    pub fn try_concat_last(parts: &[&Tensor]) -> TensorResult<Tensor> {
        let first = parts.first().ok_or(TensorError::InvalidDimension {
            expected: 1,
            got: 0,
        })?;
        let (rows, _) = first.try_dims_2d()?;
        let mut width = 0;
        for p in parts {
            let (r, w) = p.try_dims_2d()?;
            if r != rows {
                return Err(TensorError::ShapeMismatch {
                    lhs: first.shape.dims().to_vec(),
                    rhs: p.shape.dims().to_vec(),
                });
            }
            width += w;
        }
        let mut out = Vec::with_capacity(rows * width);
        for r in 0..rows {
            for p in parts {
                let w = p.shape.last_dim();
                out.extend_from_slice(&p.data[r * w..(r + 1) * w]);
            }
        }
        Ok(Tensor::from_vec(out, Shape::new(&[rows, width])))
    }

    /// Gather leading-axis slabs into a new tensor with `rows.len()` rows.
    pub fn try_select_rows(&self, rows: &[usize]) -> TensorResult<Tensor> {
        let bound = self.shape.rows();
        let w = self.row_width();
        let mut out = Vec::with_capacity(rows.len() * w);
        for &r in rows {
            if r >= bound {
                return Err(TensorError::IndexOutOfBounds {
                    axis: 0,
                    index: r,
                    bound,
                });
            }
            out.extend_from_slice(&self.data[r * w..(r + 1) * w]);
        }
        Ok(Tensor::from_vec(out, self.shape.with_rows(rows.len())))
    }

    panic_wrapper!(pub fn select_rows(&self, rows: &[usize]) -> Tensor => try_select_rows);

    /// Overwrite every element of the leading-axis slabs where `mask[r]` is set.
    pub fn try_fill_rows(&self, mask: &[bool], value: f32) -> TensorResult<Tensor> {
        let rows = self.shape.rows();
        if mask.len() != rows {
            return Err(TensorError::InvalidDimension {
                expected: rows,
                got: mask.len(),
            });
        }
        let w = self.row_width();
        let mut out = self.clone();
        for (r, &m) in mask.iter().enumerate() {
            if m {
                out.data[r * w..(r + 1) * w].fill(value);
            }
        }
        Ok(out)
    }

    /// Index of the largest value in each last-axis row (lowest index on ties).
    pub fn argmax_rows(&self) -> Vec<usize> {
        let w = self.shape.last_dim();
        self.data.chunks_exact(w.max(1)).map(argmax).collect()
    }

    pub fn fill_(&mut self, value: f32) {
        self.data.fill(value);
    }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Row-major C = A @ B^T, A: [m, k], B: [n, k], C: [m, n].
///
/// Each C[i, j] is a plain left-to-right dot product, so results for a row of
/// A never depend on how many other rows are in the batch.
pub(crate) fn gemm_transb(m: usize, n: usize, k: usize, a: &[f32], b: &[f32], c: &mut [f32]) {
    debug_assert!(a.len() >= m * k);
    debug_assert!(b.len() >= n * k);
    debug_assert!(c.len() >= m * n);
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b[j * k..(j + 1) * k];
            let mut dot = 0.0f32;
            for (x, w) in a_row.iter().zip(b_row) {
                dot += x * w;
            }
            c[i * n + j] = dot;
        }
    }
}

/// In-place softmax over a mutable slice.
///
/// The denominator is clamped to 1e-12 to avoid division by zero when all
/// inputs are -inf.
pub fn softmax_in_place(xs: &mut [f32]) {
    if xs.is_empty() {
        return;
    }
    let max_v = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in xs.iter_mut() {
        *v = (*v - max_v).exp();
        sum += *v;
    }
    let inv = 1.0 / sum.max(1e-12);
    for v in xs.iter_mut() {
        *v *= inv;
    }
}

/// In-place log-softmax over a mutable slice.
pub fn log_softmax_in_place(xs: &mut [f32]) {
    if xs.is_empty() {
        return;
    }
    let max_v = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = xs.iter().map(|&x| (x - max_v).exp()).sum();
    let log_norm = max_v + sum.max(1e-12).ln();
    for v in xs.iter_mut() {
        *v -= log_norm;
    }
}

/// Lowest index holding the maximum value. NaN compares as equal.
pub fn argmax(slice: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in slice.iter().enumerate().skip(1) {
        if v.partial_cmp(&slice[best]).unwrap_or(Ordering::Equal) == Ordering::Greater {
            best = i;
        }
    }
    best
}

/// Top-k `(index, value)` pairs, value descending, lower index first on ties.
pub fn top_k(slice: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut idxs: Vec<usize> = (0..slice.len()).collect();
    idxs.sort_by(|&a, &b| {
        slice[b]
            .partial_cmp(&slice[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    idxs.into_iter().take(k).map(|i| (i, slice[i])).collect()
}
