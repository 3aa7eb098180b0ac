//! Feature tables for flow training.
//!
//! Features of one partition are precomputed once and stored as a flat
//! row-major `f32` buffer. Each epoch plans batches as index lists (shuffled
//! for training, sequential for validation) and gathers them into tensors.

use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::bridge::flat_to_tensor;

/// Floor applied to per-dimension standard deviations.
const MIN_STD: f32 = 1e-6;

/// Row-major table of equally sized feature vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    data: Vec<f32>,
    dim: usize,
}

impl FeatureSet {
    /// Empty table of `dim`-wide rows.
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "feature dimension must be > 0");
        Self {
            data: Vec::new(),
            dim,
        }
    }

    /// Build a table from rows. Returns `None` if any row is not `dim` wide.
    pub fn from_rows(rows: &[Vec<f32>], dim: usize) -> Option<Self> {
        let mut set = Self::new(dim);
        set.extend_rows(rows).then_some(set)
    }

    /// Append rows. Returns `false` (leaving the table unchanged) if any row
    /// has the wrong width.
    pub fn extend_rows(&mut self, rows: &[Vec<f32>]) -> bool {
        if rows.iter().any(|r| r.len() != self.dim) {
            return false;
        }
        self.data.reserve(rows.len() * self.dim);
        for row in rows {
            self.data.extend_from_slice(row);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    /// Shuffled batch plan covering every row once. The last batch may be
    /// smaller than `batch_size`.
    pub fn shuffled_batches(&self, batch_size: usize, rng: &mut impl Rng) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        indices
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    /// In-order batch plan covering every row once.
    pub fn sequential_batches(&self, batch_size: usize) -> Vec<Vec<usize>> {
        (0..self.len())
            .collect::<Vec<_>>()
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    /// Gather `indices` into a `(indices.len(), dim)` tensor.
    pub fn gather<B: Backend>(&self, indices: &[usize], device: &B::Device) -> Tensor<B, 2> {
        let mut flat = Vec::with_capacity(indices.len() * self.dim);
        for &i in indices {
            flat.extend_from_slice(self.row(i));
        }
        flat_to_tensor::<B>(flat, indices.len(), self.dim, device)
    }

    /// Standardize every row in place.
    pub fn standardize(&mut self, standardizer: &Standardizer) {
        assert_eq!(standardizer.dim(), self.dim, "standardizer width mismatch");
        for row in self.data.chunks_exact_mut(self.dim) {
            standardizer.transform_in_place(row);
        }
    }
}

/// Per-dimension affine normalization `(x - mean) / std`, fitted on the
/// training features and stored with the checkpoint so scoring sees the
/// same input distribution as training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Standardizer {
    /// No-op normalization of width `dim`.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            std: vec![1.0; dim],
        }
    }

    /// Fit mean and (population) standard deviation per dimension.
    /// Constant dimensions get `std = 1`.
    pub fn fit(set: &FeatureSet) -> Self {
        let dim = set.dim();
        let n = set.len();
        if n == 0 {
            return Self::identity(dim);
        }

        let mut mean = vec![0.0_f64; dim];
        for row in set.rows() {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v as f64;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }

        let mut var = vec![0.0_f64; dim];
        for row in set.rows() {
            for ((acc, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
                let d = v as f64 - m;
                *acc += d * d;
            }
        }

        let std = var
            .iter()
            .map(|&v| {
                let s = (v / n as f64).sqrt() as f32;
                if s < MIN_STD {
                    1.0
                } else {
                    s
                }
            })
            .collect();

        Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_in_place(&self, row: &mut [f32]) {
        for ((v, &m), &s) in row.iter_mut().zip(&self.mean).zip(&self.std) {
            *v = (*v - m) / s;
        }
    }

    pub fn transform_row(&self, row: &[f32]) -> Vec<f32> {
        let mut out = row.to_vec();
        self.transform_in_place(&mut out);
        out
    }
}
