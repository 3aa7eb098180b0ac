//! TOML config loading for the trainer CLI.
//!
//! Deserializes `baseline.toml`: dataset and output directories at the top
//! level, plus `[feature]`, `[fit]` and `[flow]` sections. Every field has a
//! default, so a partial file (or an empty one) is valid.

use std::path::{Path, PathBuf};

use anyhow::Context;
use flow::model::flow_model::FlowModelConfig;
use flow::training::trainer::FlowTrainingConfig;
use machine_data::{FeatureConfig, RunMode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters of the SHA-256 digest kept in artifact names.
const CACHE_KEY_LEN: usize = 16;

/// Top-level structure matching `baseline.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineToml {
    /// Dataset root used with `--dev`.
    #[serde(default = "default_dev_directory")]
    pub dev_directory: PathBuf,
    /// Dataset root used with `--eval`.
    #[serde(default = "default_eval_directory")]
    pub eval_directory: PathBuf,
    /// Where models and loss histories are written.
    #[serde(default = "default_model_directory")]
    pub model_directory: PathBuf,
    /// Optional log file, written in addition to stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub feature: FeatureConfig,
    #[serde(default)]
    pub fit: FitSection,
    #[serde(default)]
    pub flow: FlowSection,
}

fn default_dev_directory() -> PathBuf {
    PathBuf::from("./dev_data")
}
fn default_eval_directory() -> PathBuf {
    PathBuf::from("./eval_data")
}
fn default_model_directory() -> PathBuf {
    PathBuf::from("./model")
}

/// `[fit]`: optimizer, schedule and early-stopping parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSection {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,
    #[serde(default = "default_warmup_epochs")]
    pub warmup_epochs: usize,
    /// Epochs without improvement before stopping; 0 disables early stopping.
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    /// Fraction of clips held out for validation.
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    /// Seeds the clip split, weight initialization and batch shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_epochs() -> usize {
    100
}
fn default_batch_size() -> usize {
    512
}
fn default_lr() -> f64 {
    1e-3
}
fn default_weight_decay() -> f64 {
    1e-5
}
fn default_max_grad_norm() -> f64 {
    1.0
}
fn default_warmup_epochs() -> usize {
    1
}
fn default_patience() -> usize {
    10
}
fn default_min_delta() -> f64 {
    1e-4
}
fn default_validation_split() -> f64 {
    1.0 - machine_data::DEFAULT_TRAIN_FRACTION
}
fn default_seed() -> u64 {
    42
}

impl Default for FitSection {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            lr: default_lr(),
            weight_decay: default_weight_decay(),
            max_grad_norm: default_max_grad_norm(),
            warmup_epochs: default_warmup_epochs(),
            patience: default_patience(),
            min_delta: default_min_delta(),
            validation_split: default_validation_split(),
            seed: default_seed(),
        }
    }
}

impl FitSection {
    pub fn training_config(&self) -> FlowTrainingConfig {
        FlowTrainingConfig::new()
            .with_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_lr(self.lr)
            .with_weight_decay(self.weight_decay)
            .with_max_grad_norm(self.max_grad_norm)
            .with_warmup_epochs(self.warmup_epochs)
            .with_patience(self.patience)
            .with_min_delta(self.min_delta)
            .with_seed(self.seed)
    }

    pub fn train_fraction(&self) -> f64 {
        1.0 - self.validation_split
    }
}

/// `[flow]`: architecture of the coupling stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSection {
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "default_max_log_scale")]
    pub max_log_scale: f64,
}

fn default_num_layers() -> usize {
    32
}
fn default_hidden_dim() -> usize {
    128
}
fn default_num_hidden_layers() -> usize {
    2
}
fn default_max_log_scale() -> f64 {
    3.0
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            num_layers: default_num_layers(),
            hidden_dim: default_hidden_dim(),
            num_hidden_layers: default_num_hidden_layers(),
            max_log_scale: default_max_log_scale(),
        }
    }
}

impl FlowSection {
    pub fn model_config(&self, dim: usize) -> FlowModelConfig {
        FlowModelConfig::new(dim)
            .with_num_layers(self.num_layers)
            .with_hidden_dim(self.hidden_dim)
            .with_num_hidden_layers(self.num_hidden_layers)
            .with_max_log_scale(self.max_log_scale)
    }
}

/// The sections that determine what a trained model looks like.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    feature: &'a FeatureConfig,
    fit: &'a FitSection,
    flow: &'a FlowSection,
}

impl BaselineToml {
    /// Dataset root for the selected mode.
    pub fn base_directory(&self, mode: RunMode) -> &Path {
        match mode {
            RunMode::Development => &self.dev_directory,
            RunMode::Evaluation => &self.eval_directory,
        }
    }

    /// Reject parameter combinations that cannot train a model.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.feature.validate()?;
        anyhow::ensure!(
            self.feature.feature_dim() >= 2,
            "feature dimension n_mels * frames must be >= 2 (got {})",
            self.feature.feature_dim()
        );
        anyhow::ensure!(self.fit.batch_size > 0, "fit.batch_size must be > 0");
        anyhow::ensure!(
            (0.0..1.0).contains(&self.fit.validation_split),
            "fit.validation_split must be in [0, 1) (got {})",
            self.fit.validation_split
        );
        anyhow::ensure!(self.fit.lr >= 0.0, "fit.lr must be >= 0");
        anyhow::ensure!(
            self.fit.weight_decay >= 0.0,
            "fit.weight_decay must be >= 0 (got {})",
            self.fit.weight_decay
        );
        anyhow::ensure!(
            self.fit.max_grad_norm > 0.0,
            "fit.max_grad_norm must be > 0 (got {})",
            self.fit.max_grad_norm
        );
        anyhow::ensure!(
            self.fit.min_delta >= 0.0,
            "fit.min_delta must be >= 0 (got {})",
            self.fit.min_delta
        );
        anyhow::ensure!(self.flow.num_layers > 0, "flow.num_layers must be > 0");
        anyhow::ensure!(self.flow.hidden_dim > 0, "flow.hidden_dim must be > 0");
        anyhow::ensure!(
            self.flow.max_log_scale > 0.0,
            "flow.max_log_scale must be > 0"
        );
        Ok(())
    }

    /// Short fingerprint of the feature, fit and flow sections.
    ///
    /// Embedded in artifact names so a changed configuration retrains
    /// instead of reusing a model built with other parameters. Directories
    /// and the log file do not affect the key.
    pub fn cache_key(&self) -> anyhow::Result<String> {
        let material = serde_json::to_vec(&KeyMaterial {
            feature: &self.feature,
            fit: &self.fit,
            flow: &self.flow,
        })?;
        let digest = format!("{:x}", Sha256::digest(&material));
        Ok(digest[..CACHE_KEY_LEN].to_string())
    }
}

/// Load and deserialize a `BaselineToml` from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<BaselineToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: BaselineToml = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded baseline config");
    Ok(config)
}
