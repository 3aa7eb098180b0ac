//! Flow training loop: maximum likelihood with AdamW, warmup + cosine LR
//! schedule and early stopping, driven as an explicit epoch state machine.
//!
//! ```text
//! Initializing → TrainEpoch → ValidateEpoch → CheckConvergence ─┬→ TrainEpoch
//!                                                              └→ Finished
//! ```
//!
//! The loop only trains. Persisting the result is the caller's job via
//! [`save_checkpoint`] and [`LossHistory::save_json`].

use std::fmt;
use std::path::Path;
use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::model::bridge::tensor_to_f64;
use crate::model::flow_model::{FlowModel, FlowModelConfig};
use crate::training::data::{FeatureSet, Standardizer};
use crate::training::loss::{bits_per_dim, nll_loss};
use crate::training::metrics::{EpochMetrics, LossHistory};

/// Errors raised while training or persisting a flow.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("feature dimension mismatch: model expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("non-finite training loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },
    #[error("non-finite validation loss at epoch {epoch}")]
    NonFiniteValidation { epoch: usize },
    #[error("clip has no feature vectors to score")]
    EmptyClip,
    #[error("checkpoint record error: {0}")]
    Record(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Configuration for flow training.
#[derive(Config, Debug)]
pub struct FlowTrainingConfig {
    /// Maximum number of epochs.
    #[config(default = 100)]
    pub epochs: usize,
    /// Feature vectors per optimizer step.
    #[config(default = 512)]
    pub batch_size: usize,
    /// Base learning rate for AdamW.
    #[config(default = 1e-3)]
    pub lr: f64,
    /// Weight decay for AdamW.
    #[config(default = 1e-5)]
    pub weight_decay: f64,
    /// Maximum gradient norm for clipping.
    #[config(default = 1.0)]
    pub max_grad_norm: f64,
    /// Epochs of linear LR warmup before cosine decay.
    #[config(default = 1)]
    pub warmup_epochs: usize,
    /// Epochs without improvement before stopping. 0 disables early stopping.
    #[config(default = 10)]
    pub patience: usize,
    /// Minimum decrease of the monitored loss that counts as improvement.
    #[config(default = 1e-4)]
    pub min_delta: f64,
    /// Seed for batch shuffling.
    #[config(default = 42)]
    pub seed: u64,
}

/// Phase of the epoch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainPhase {
    Initializing,
    TrainEpoch,
    ValidateEpoch,
    CheckConvergence,
    Finished,
}

/// Why training finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Ran the configured number of epochs.
    EpochBudget,
    /// Monitored loss stopped improving for `patience` epochs.
    EarlyStopped,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EpochBudget => write!(f, "epoch_budget"),
            StopReason::EarlyStopped => write!(f, "early_stopped"),
        }
    }
}

/// Result of a finished training run.
#[derive(Debug)]
pub struct TrainOutcome<B: Backend> {
    /// Parameters of the best epoch (the last one if nothing improved).
    pub model: FlowModel<B>,
    pub history: LossHistory,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    pub epochs_run: usize,
    pub stop_reason: StopReason,
}

/// Metadata saved next to the model weights: everything needed to rebuild
/// and use the model without the run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub model: FlowModelConfig,
    pub standardizer: Standardizer,
    pub cache_key: String,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    pub epochs_run: usize,
    pub stop_reason: StopReason,
}

/// Compute the learning rate at a given step using warmup + cosine decay.
///
/// - Warmup phase (`step < warmup_steps`): linearly ramps from 0 to `base_lr`.
/// - Cosine phase: decays from `base_lr` to 0 following a cosine schedule.
pub fn lr_schedule(base_lr: f64, warmup_steps: usize, total_steps: usize, step: usize) -> f64 {
    if warmup_steps > 0 && step < warmup_steps {
        // Linear warmup
        base_lr * (step + 1) as f64 / warmup_steps as f64
    } else {
        // Cosine decay
        let decay_steps = total_steps.saturating_sub(warmup_steps).max(1);
        let progress = (step.saturating_sub(warmup_steps)) as f64 / decay_steps as f64;
        let progress = progress.min(1.0);
        base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
    }
}

/// Mean NLL of `set` under `model`, weighted by batch size. `None` for an
/// empty set.
pub fn evaluate<B: Backend>(
    model: &FlowModel<B>,
    set: &FeatureSet,
    batch_size: usize,
    device: &B::Device,
) -> Option<f64> {
    if set.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for indices in set.sequential_batches(batch_size) {
        let x = set.gather::<B>(&indices, device);
        let loss = tensor_to_f64(nll_loss(model.log_prob(x)));
        total += loss * indices.len() as f64;
    }
    Some(total / set.len() as f64)
}

fn transition(phase: &mut TrainPhase, next: TrainPhase, epoch: usize) {
    tracing::trace!(epoch, from = ?*phase, to = ?next, "Train phase transition");
    *phase = next;
}

fn format_eta(remaining: f64) -> String {
    if remaining < 60.0 {
        format!("{:.0}s", remaining)
    } else if remaining < 3600.0 {
        format!("{:.0}m", remaining / 60.0)
    } else {
        format!("{:.1}h", remaining / 3600.0)
    }
}

/// Run the flow training loop.
///
/// # Arguments
/// - `config`: training hyperparameters
/// - `model`: initialized flow (consumed; the best epoch's weights are returned)
/// - `train_set`: standardized training features
/// - `val_set`: optional held-out features monitored for early stopping
/// - `device`: burn device for tensor operations
pub fn train<B: AutodiffBackend>(
    config: &FlowTrainingConfig,
    mut model: FlowModel<B>,
    train_set: &FeatureSet,
    val_set: Option<&FeatureSet>,
    device: &B::Device,
) -> Result<TrainOutcome<B::InnerBackend>, TrainError> {
    let mut phase = TrainPhase::Initializing;

    if train_set.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }
    for set in std::iter::once(train_set).chain(val_set) {
        if set.dim() != model.dim() {
            return Err(TrainError::DimensionMismatch {
                expected: model.dim(),
                actual: set.dim(),
            });
        }
    }
    let val_set = val_set.filter(|v| !v.is_empty());

    let optim_config = AdamWConfig::new()
        .with_weight_decay(config.weight_decay as f32)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(
            config.max_grad_norm as f32,
        )));
    let mut optimizer = optim_config.init();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let batches_per_epoch = train_set.len().div_ceil(config.batch_size.max(1));
    let total_steps = config.epochs * batches_per_epoch;
    let warmup_steps = config.warmup_epochs * batches_per_epoch;

    tracing::info!(
        train_vectors = train_set.len(),
        val_vectors = val_set.map(FeatureSet::len).unwrap_or(0),
        dim = train_set.dim(),
        layers = model.num_layers(),
        epochs = config.epochs,
        batches_per_epoch,
        "Starting flow training"
    );

    let mut history = LossHistory::new();
    let mut best_model = model.valid();
    let mut best_loss = f64::INFINITY;
    let mut best_epoch = None;
    let mut stale_epochs = 0usize;
    let mut stop_reason = StopReason::EpochBudget;

    let mut epoch = 0usize;
    let mut step = 0usize;
    let mut lr = config.lr;
    let mut train_loss = f64::NAN;
    let mut val_loss = None;
    let train_start = Instant::now();

    if config.epochs == 0 {
        transition(&mut phase, TrainPhase::Finished, epoch);
    } else {
        transition(&mut phase, TrainPhase::TrainEpoch, epoch);
    }

    while phase != TrainPhase::Finished {
        match phase {
            TrainPhase::TrainEpoch => {
                let mut total = 0.0;
                for (batch, indices) in train_set
                    .shuffled_batches(config.batch_size, &mut rng)
                    .iter()
                    .enumerate()
                {
                    lr = lr_schedule(config.lr, warmup_steps, total_steps, step);
                    let x = train_set.gather::<B>(indices, device);
                    let loss = nll_loss(model.log_prob(x));
                    let loss_val: f64 = loss.clone().into_scalar().elem();
                    if !loss_val.is_finite() {
                        return Err(TrainError::NonFiniteLoss { epoch, batch });
                    }

                    let grads = GradientsParams::from_grads(loss.backward(), &model);
                    model = optimizer.step(lr, model, grads);
                    total += loss_val * indices.len() as f64;
                    step += 1;
                }
                train_loss = total / train_set.len() as f64;
                transition(&mut phase, TrainPhase::ValidateEpoch, epoch);
            }
            TrainPhase::ValidateEpoch => {
                val_loss = match val_set {
                    Some(set) => {
                        let loss = evaluate(&model.valid(), set, config.batch_size, device);
                        if loss.is_some_and(|l| !l.is_finite()) {
                            return Err(TrainError::NonFiniteValidation { epoch });
                        }
                        loss
                    }
                    None => None,
                };
                transition(&mut phase, TrainPhase::CheckConvergence, epoch);
            }
            TrainPhase::CheckConvergence => {
                let metrics = EpochMetrics {
                    epoch,
                    train_loss,
                    val_loss,
                    lr,
                    elapsed_secs: train_start.elapsed().as_secs_f64(),
                };
                let monitored = metrics.monitored();
                history.push(metrics);

                if monitored < best_loss - config.min_delta {
                    best_loss = monitored;
                    best_epoch = Some(epoch);
                    best_model = model.valid();
                    stale_epochs = 0;
                } else {
                    stale_epochs += 1;
                }

                let warnings = history.health_check();
                if !warnings.is_empty() {
                    tracing::warn!(epoch, "Health check warnings: {:?}", warnings);
                }

                epoch += 1;
                let elapsed = train_start.elapsed().as_secs_f64();
                let remaining = elapsed * (config.epochs - epoch) as f64 / epoch as f64;
                tracing::info!(
                    epoch,
                    train_loss = format!("{train_loss:.4}"),
                    val_loss = val_loss.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".into()),
                    bits_per_dim = format!("{:.3}", bits_per_dim(monitored, train_set.dim())),
                    lr = %format!("{lr:.2e}"),
                    stale_epochs,
                    eta = format_eta(remaining),
                    "Epoch complete"
                );

                if epoch >= config.epochs {
                    stop_reason = StopReason::EpochBudget;
                    transition(&mut phase, TrainPhase::Finished, epoch);
                } else if config.patience > 0 && stale_epochs >= config.patience {
                    stop_reason = StopReason::EarlyStopped;
                    tracing::info!(epoch, best_epoch, patience = config.patience, "Early stopping");
                    transition(&mut phase, TrainPhase::Finished, epoch);
                } else {
                    transition(&mut phase, TrainPhase::TrainEpoch, epoch);
                }
            }
            TrainPhase::Initializing | TrainPhase::Finished => {
                transition(&mut phase, TrainPhase::Finished, epoch);
            }
        }
    }

    tracing::info!(
        epochs_run = epoch,
        best_epoch,
        best_loss = best_loss.is_finite().then_some(best_loss),
        %stop_reason,
        elapsed_secs = format!("{:.1}", train_start.elapsed().as_secs_f64()),
        "Training loop finished"
    );

    Ok(TrainOutcome {
        model: best_model,
        history,
        best_epoch,
        best_loss: best_loss.is_finite().then_some(best_loss),
        epochs_run: epoch,
        stop_reason,
    })
}

/// Save model weights to `<stem>.mpk` and metadata to `<stem>.json`.
///
/// `stem` must not carry an extension: the recorder appends its own.
pub fn save_checkpoint<B: Backend>(
    model: &FlowModel<B>,
    meta: &CheckpointMeta,
    stem: &Path,
) -> Result<(), TrainError> {
    if let Some(parent) = stem.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(stem.to_path_buf(), &recorder)
        .map_err(|e| TrainError::Record(format!("failed to save {}: {e}", stem.display())))?;

    let meta_path = stem.with_extension("json");
    let file = std::io::BufWriter::new(std::fs::File::create(&meta_path)?);
    serde_json::to_writer_pretty(file, meta)?;

    tracing::debug!(path = %stem.display(), "Checkpoint saved (model + meta)");
    Ok(())
}

/// Load a checkpoint written by [`save_checkpoint`].
///
/// Creates a fresh model from the stored config, then loads saved weights
/// on top.
pub fn load_checkpoint<B: Backend>(
    stem: &Path,
    device: &B::Device,
) -> Result<(FlowModel<B>, CheckpointMeta), TrainError> {
    let meta_path = stem.with_extension("json");
    let file = std::io::BufReader::new(std::fs::File::open(&meta_path)?);
    let meta: CheckpointMeta = serde_json::from_reader(file)?;

    let model = meta
        .model
        .init::<B>(device)
        .load_file(
            stem.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| TrainError::Record(format!("failed to load {}: {e}", stem.display())))?;
    Ok((model, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn tiny_flow(dim: usize) -> FlowModelConfig {
        FlowModelConfig::new(dim)
            .with_num_layers(2)
            .with_hidden_dim(8)
            .with_num_hidden_layers(1)
    }

    fn grid(n: usize, dim: usize, offset: f32) -> FeatureSet {
        let rows: Vec<Vec<f32>> = (0..n)
            .map(|i| (0..dim).map(|d| offset + ((i * 7 + d * 3) % 11) as f32 / 11.0).collect())
            .collect();
        FeatureSet::from_rows(&rows, dim).unwrap()
    }

    #[test]
    fn test_lr_schedule() {
        let base_lr = 1e-3;
        let warmup = 100;
        let total = 1000;

        // Warmup phase: step 0 → lr = base_lr * 1/100
        let lr0 = lr_schedule(base_lr, warmup, total, 0);
        assert!((lr0 - base_lr / 100.0).abs() < 1e-12, "Step 0: got {lr0}");

        // Peak at warmup boundary
        let lr99 = lr_schedule(base_lr, warmup, total, 99);
        assert!((lr99 - base_lr).abs() < 1e-12, "Step 99: got {lr99}");

        // Cosine midpoint: progress = 450/900 = 0.5
        let lr550 = lr_schedule(base_lr, warmup, total, 550);
        assert!((lr550 - base_lr * 0.5).abs() < 1e-12, "Step 550: got {lr550}");

        // Near end
        let lr999 = lr_schedule(base_lr, warmup, total, 999);
        assert!(lr999 < base_lr * 0.01, "Step 999: got {lr999}");

        // No warmup: straight cosine from base_lr
        let lr_no_warmup = lr_schedule(base_lr, 0, 1000, 0);
        assert!((lr_no_warmup - base_lr).abs() < 1e-12);

        // Past the end stays clamped at 0
        let lr_past = lr_schedule(base_lr, 0, 10, 50);
        assert!(lr_past.abs() < 1e-12);
    }

    #[test]
    fn test_empty_training_set_rejected() {
        let device = Default::default();
        let model = tiny_flow(2).init::<TestAutodiffBackend>(&device);
        let config = FlowTrainingConfig::new();
        let err = train(&config, model, &FeatureSet::new(2), None, &device).unwrap_err();
        assert!(matches!(err, TrainError::EmptyTrainingSet));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let device = Default::default();
        let model = tiny_flow(3).init::<TestAutodiffBackend>(&device);
        let config = FlowTrainingConfig::new();
        let err = train(&config, model, &grid(8, 2, 0.0), None, &device).unwrap_err();
        assert!(matches!(
            err,
            TrainError::DimensionMismatch { expected: 3, actual: 2 }
        ));

        let model = tiny_flow(2).init::<TestAutodiffBackend>(&device);
        let err = train(&config, model, &grid(8, 2, 0.0), Some(&grid(4, 3, 0.0)), &device)
            .unwrap_err();
        assert!(matches!(err, TrainError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_runs_full_epoch_budget_without_patience() {
        let device = Default::default();
        let model = tiny_flow(2).init::<TestAutodiffBackend>(&device);
        let config = FlowTrainingConfig::new()
            .with_epochs(3)
            .with_batch_size(4)
            .with_patience(0);
        let out = train(&config, model, &grid(10, 2, 0.0), None, &device).unwrap();
        assert_eq!(out.epochs_run, 3);
        assert_eq!(out.history.len(), 3);
        assert_eq!(out.stop_reason, StopReason::EpochBudget);
        assert!(out.best_epoch.is_some());
        assert!(out.history.val_losses().iter().all(Option::is_none));
    }

    #[test]
    fn test_early_stopping_when_loss_is_flat() {
        // lr = 0 freezes the weights, so only the first epoch improves.
        let device = Default::default();
        let model = tiny_flow(2).init::<TestAutodiffBackend>(&device);
        let config = FlowTrainingConfig::new()
            .with_epochs(20)
            .with_batch_size(4)
            .with_lr(0.0)
            .with_patience(2);
        let out = train(
            &config,
            model,
            &grid(12, 2, 0.0),
            Some(&grid(6, 2, 0.5)),
            &device,
        )
        .unwrap();
        assert_eq!(out.stop_reason, StopReason::EarlyStopped);
        assert_eq!(out.epochs_run, 3);
        assert_eq!(out.best_epoch, Some(0));
        assert!(out.history.val_losses().iter().all(Option::is_some));
    }

    #[test]
    fn test_non_finite_loss_aborts() {
        let device = Default::default();
        let model = tiny_flow(2).init::<TestAutodiffBackend>(&device);
        let rows = vec![vec![1e30_f32, -1e30]; 4];
        let set = FeatureSet::from_rows(&rows, 2).unwrap();
        let config = FlowTrainingConfig::new().with_epochs(2);
        let err = train(&config, model, &set, None, &device).unwrap_err();
        assert!(matches!(err, TrainError::NonFiniteLoss { epoch: 0, batch: 0 }));
    }

    #[test]
    fn test_evaluate_empty_is_none() {
        let device = Default::default();
        let model = tiny_flow(2).init::<TestBackend>(&device);
        assert!(evaluate(&model, &FeatureSet::new(2), 8, &device).is_none());
        assert!(evaluate(&model, &grid(5, 2, 0.0), 2, &device).is_some());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let device = Default::default();
        let tmp = tempfile::TempDir::new().unwrap();
        let stem = tmp.path().join("model_fan_id_00_abc");

        let config = tiny_flow(3).with_zero_init(false);
        let model = config.init::<TestBackend>(&device);
        let meta = CheckpointMeta {
            model: config,
            standardizer: Standardizer::identity(3),
            cache_key: "abc".into(),
            best_epoch: Some(4),
            best_loss: Some(-1.0 / 3.0 + 9.513254770636137e-6),
            epochs_run: 6,
            stop_reason: StopReason::EarlyStopped,
        };
        save_checkpoint(&model, &meta, &stem).unwrap();
        assert!(stem.with_extension("mpk").exists());
        assert!(stem.with_extension("json").exists());

        let (loaded, loaded_meta) = load_checkpoint::<TestBackend>(&stem, &device).unwrap();
        assert_eq!(loaded_meta.best_epoch, Some(4));
        assert_eq!(loaded_meta.stop_reason, StopReason::EarlyStopped);
        assert_eq!(loaded_meta.cache_key, "abc");
        assert_eq!(
            loaded_meta.best_loss.map(f64::to_bits),
            meta.best_loss.map(f64::to_bits)
        );

        let set = grid(5, 3, 0.0);
        let before = evaluate(&model, &set, 8, &device).unwrap();
        let after = evaluate(&loaded, &set, 8, &device).unwrap();
        assert!((before - after).abs() < 1e-6, "{before} vs {after}");
    }

    #[test]
    fn test_load_missing_checkpoint_is_io_error() {
        let device = Default::default();
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_checkpoint::<TestBackend>(&tmp.path().join("nope"), &device).unwrap_err();
        assert!(matches!(err, TrainError::Io(_)));
    }
}
