//! The training run: every machine type, every machine id, one flow each.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::SeedableRng;

use flow::inference::AnomalyScorer;
use flow::training::data::{FeatureSet, Standardizer};
use flow::training::trainer::{save_checkpoint, train, CheckpointMeta, StopReason};
use machine_data::{
    machine_id_list, machine_list, precompute_features, select_files, split_train_val,
    AudioDataset, ClipFeatures, DirType, FeatureExtractor, LogMelExtractor, MachinePartition,
    RunMode,
};

use crate::artifacts::ArtifactPaths;
use crate::config::BaselineToml;

type ScoreBackend = NdArray<f32>;
type TrainBackend = Autodiff<ScoreBackend>;

/// Outcome counts of one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub trained: usize,
    /// Partitions whose artifacts already existed.
    pub skipped: usize,
    /// Partitions (or whole machines) that errored and were left out.
    pub failed: usize,
}

/// What training one partition produced.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    pub train_vectors: usize,
    pub val_vectors: usize,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    pub stop_reason: StopReason,
    /// Mean clip score of the held-out normal clips.
    pub val_score_mean: Option<f64>,
}

/// Train every (machine, id) partition found under the mode's dataset root.
///
/// A partition that fails is logged and counted; the run continues with the
/// next one. Only setup problems (bad config, unreadable dataset root,
/// unwritable model directory) abort the run.
pub fn run(mode: RunMode, config: &BaselineToml) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    config.validate().context("Invalid configuration")?;

    let base = config.base_directory(mode);
    std::fs::create_dir_all(&config.model_directory).with_context(|| {
        format!(
            "Failed to create model directory {}",
            config.model_directory.display()
        )
    })?;
    let cache_key = config.cache_key()?;

    let machines = machine_list(base)
        .with_context(|| format!("Failed to list machines under {}", base.display()))?;
    tracing::info!(%mode, base = %base.display(), machines = ?machines, cache_key, "Train machine list");

    let mut summary = RunSummary::default();
    for (idx, machine) in machines.iter().enumerate() {
        tracing::info!(machine, index = idx + 1, total = machines.len(), "Processing machine");

        let files = match select_files(base, machine, DirType::Train) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(machine, error = %e, "Failed to list clips, skipping machine");
                summary.failed += 1;
                continue;
            }
        };
        let ids = match machine_id_list(&base.join(machine), DirType::Train) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(machine, error = %e, "Failed to list machine ids, skipping machine");
                summary.failed += 1;
                continue;
            }
        };
        if ids.is_empty() {
            tracing::warn!(machine, clips = files.len(), "No machine ids found, skipping machine");
            continue;
        }
        tracing::info!(machine, ids = ?ids, clips = files.len(), "Machine id list");

        let mut rng = StdRng::seed_from_u64(config.fit.seed.wrapping_add(idx as u64));
        let (train_files, val_files) =
            split_train_val(&files, config.fit.train_fraction(), &mut rng);

        for machine_id in &ids {
            let partition = MachinePartition::new(machine.as_str(), machine_id.as_str());
            let paths = ArtifactPaths::new(&config.model_directory, &partition, &cache_key);
            if paths.is_complete() {
                tracing::info!(%partition, model = %paths.model_file.display(), "Model exists, skipping");
                summary.skipped += 1;
                continue;
            }

            match train_partition(&partition, &train_files, &val_files, config, &cache_key, &paths) {
                Ok(report) => {
                    summary.trained += 1;
                    tracing::info!(
                        %partition,
                        epochs_run = report.epochs_run,
                        best_epoch = report.best_epoch,
                        best_loss = report.best_loss,
                        stop_reason = %report.stop_reason,
                        val_score_mean = report.val_score_mean,
                        model = %paths.model_file.display(),
                        "Saved model"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(%partition, error = format!("{e:#}"), "Training failed, skipping");
                }
            }
        }

        drop(train_files);
        drop(val_files);
    }

    tracing::info!(
        trained = summary.trained,
        skipped = summary.skipped,
        failed = summary.failed,
        elapsed_secs = format!("{:.1}", start.elapsed().as_secs_f64()),
        "Run complete"
    );
    Ok(summary)
}

/// Flatten per-clip vectors into one table.
fn feature_table(clips: &[ClipFeatures], dim: usize) -> anyhow::Result<FeatureSet> {
    let mut set = FeatureSet::new(dim);
    for clip in clips {
        anyhow::ensure!(
            set.extend_rows(&clip.vectors),
            "feature width mismatch in {}",
            clip.path.display()
        );
    }
    Ok(set)
}

/// Extract features, fit a flow and write its artifacts.
pub fn train_partition(
    partition: &MachinePartition,
    train_files: &[PathBuf],
    val_files: &[PathBuf],
    config: &BaselineToml,
    cache_key: &str,
    paths: &ArtifactPaths,
) -> anyhow::Result<PartitionReport> {
    let train_ds = AudioDataset::new(train_files, &partition.machine_id);
    let val_ds = AudioDataset::new(val_files, &partition.machine_id);
    anyhow::ensure!(!train_ds.is_empty(), "no training clips for {partition}");
    tracing::info!(
        %partition,
        train_clips = train_ds.len(),
        val_clips = val_ds.len(),
        "Generating dataset"
    );

    let extractor = LogMelExtractor::new(config.feature.clone())?;
    let dim = extractor.dim();
    let train_clips = precompute_features(&train_ds, &extractor)?;
    let val_clips = if val_ds.is_empty() {
        Vec::new()
    } else {
        precompute_features(&val_ds, &extractor)?
    };
    drop(extractor);

    let mut train_set = feature_table(&train_clips, dim)?;
    anyhow::ensure!(
        !train_set.is_empty(),
        "every training clip of {partition} was too short for a feature vector"
    );
    let standardizer = Standardizer::fit(&train_set);
    train_set.standardize(&standardizer);
    let mut val_set = feature_table(&val_clips, dim)?;
    val_set.standardize(&standardizer);
    drop(train_clips);

    let device = NdArrayDevice::default();
    <TrainBackend as Backend>::seed(config.fit.seed);
    let model_config = config.flow.model_config(dim);
    let model = model_config.init::<TrainBackend>(&device);

    tracing::info!(%partition, dim, train_vectors = train_set.len(), val_vectors = val_set.len(), "Start model training");
    let outcome = train(
        &config.fit.training_config(),
        model,
        &train_set,
        (!val_set.is_empty()).then_some(&val_set),
        &device,
    )?;

    let meta = CheckpointMeta {
        model: model_config,
        standardizer: standardizer.clone(),
        cache_key: cache_key.to_string(),
        best_epoch: outcome.best_epoch,
        best_loss: outcome.best_loss,
        epochs_run: outcome.epochs_run,
        stop_reason: outcome.stop_reason,
    };
    outcome
        .history
        .save_json(&paths.history_file)
        .with_context(|| format!("Failed to write {}", paths.history_file.display()))?;
    save_checkpoint(&outcome.model, &meta, &paths.model_stem)?;

    let scorer = AnomalyScorer::<ScoreBackend>::new(outcome.model, standardizer, device);
    let val_scores = val_clips
        .iter()
        .map(|clip| scorer.score_clip(&clip.vectors))
        .collect::<Result<Vec<f64>, _>>()?;
    let val_score_mean =
        (!val_scores.is_empty()).then(|| val_scores.iter().sum::<f64>() / val_scores.len() as f64);

    let report = PartitionReport {
        train_vectors: train_set.len(),
        val_vectors: val_set.len(),
        epochs_run: outcome.epochs_run,
        best_epoch: outcome.best_epoch,
        best_loss: outcome.best_loss,
        stop_reason: outcome.stop_reason,
        val_score_mean,
    };

    drop(scorer);
    drop(train_set);
    drop(val_set);
    Ok(report)
}
