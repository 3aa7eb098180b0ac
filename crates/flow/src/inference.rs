//! Anomaly scoring with a trained flow.
//!
//! Convention: **higher score = more anomalous** (negative log-likelihood
//! under the model of normal operation).

use std::path::Path;

use burn::prelude::*;

use crate::model::bridge::{rows_to_tensor, tensor_to_vec};
use crate::model::flow_model::FlowModel;
use crate::training::data::Standardizer;
use crate::training::trainer::{load_checkpoint, CheckpointMeta, TrainError};

/// Rows per forward pass when scoring long clips.
const SCORE_CHUNK: usize = 1024;

/// Flow-based anomaly scorer, generic over the burn backend.
pub struct AnomalyScorer<B: Backend> {
    model: FlowModel<B>,
    standardizer: Standardizer,
    device: B::Device,
}

impl<B: Backend> AnomalyScorer<B> {
    pub fn new(model: FlowModel<B>, standardizer: Standardizer, device: B::Device) -> Self {
        assert_eq!(
            model.dim(),
            standardizer.dim(),
            "standardizer width does not match the model"
        );
        Self {
            model,
            standardizer,
            device,
        }
    }

    /// Load a scorer from a checkpoint stem written by `save_checkpoint`.
    pub fn load(stem: &Path, device: B::Device) -> Result<(Self, CheckpointMeta), TrainError> {
        let (model, meta) = load_checkpoint::<B>(stem, &device)?;
        if meta.standardizer.dim() != model.dim() {
            return Err(TrainError::DimensionMismatch {
                expected: model.dim(),
                actual: meta.standardizer.dim(),
            });
        }
        let scorer = Self::new(model, meta.standardizer.clone(), device);
        Ok((scorer, meta))
    }

    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    /// Per-vector NLL of raw (unstandardized) feature vectors.
    pub fn score_vectors(&self, vectors: &[Vec<f32>]) -> Result<Vec<f64>, TrainError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim()) {
            return Err(TrainError::DimensionMismatch {
                expected: self.dim(),
                actual: bad.len(),
            });
        }

        let mut scores = Vec::with_capacity(vectors.len());
        for chunk in vectors.chunks(SCORE_CHUNK) {
            let rows: Vec<Vec<f32>> = chunk
                .iter()
                .map(|v| self.standardizer.transform_row(v))
                .collect();
            let x = rows_to_tensor::<B>(&rows, &self.device);
            let log_prob = tensor_to_vec::<B>(self.model.log_prob(x));
            scores.extend(log_prob.into_iter().map(|lp| -lp));
        }
        Ok(scores)
    }

    /// Clip score: mean NLL over the clip's vectors.
    pub fn score_clip(&self, vectors: &[Vec<f32>]) -> Result<f64, TrainError> {
        if vectors.is_empty() {
            return Err(TrainError::EmptyClip);
        }
        let scores = self.score_vectors(vectors)?;
        Ok(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
