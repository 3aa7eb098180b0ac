//! Per-machine-id clip datasets and feature precomputation.
//!
//! The feature extractor is frozen during training, so each clip's feature
//! vectors are computed once per partition and handed to the trainer as a
//! flat table instead of being recomputed every epoch.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::audio::load_audio;
use crate::features::FeatureExtractor;
use crate::types::DataError;

/// Clips of one machine id, selected from a machine's file list.
#[derive(Debug, Clone)]
pub struct AudioDataset {
    machine_id: String,
    files: Vec<PathBuf>,
}

impl AudioDataset {
    /// Keep the files whose name contains `machine_id`.
    pub fn new(files: &[PathBuf], machine_id: &str) -> Self {
        let files = files
            .iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.contains(machine_id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Self {
            machine_id: machine_id.to_string(),
            files,
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Decode clip `index` at `sample_rate`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn load(&self, index: usize, sample_rate: u32) -> Result<Vec<f32>, DataError> {
        load_audio(&self.files[index], sample_rate)
    }
}

/// Feature vectors extracted from one clip.
#[derive(Debug, Clone)]
pub struct ClipFeatures {
    pub path: PathBuf,
    /// Time-ordered vectors, each of the extractor's `dim()`.
    pub vectors: Vec<Vec<f32>>,
}

impl ClipFeatures {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Extract features for every clip in `dataset`.
///
/// Clips too short to yield a vector are skipped with a warning. Any clip
/// that fails to load aborts the whole precomputation: a corrupt file means
/// the partition's data cannot be trusted.
pub fn precompute_features(
    dataset: &AudioDataset,
    extractor: &dyn FeatureExtractor,
) -> Result<Vec<ClipFeatures>, DataError> {
    let total = dataset.len();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(format!("Extracting {}", dataset.machine_id()));

    let mut clips = Vec::with_capacity(total);
    let mut skipped = 0usize;
    for index in 0..total {
        let path: &Path = &dataset.files()[index];
        let waveform = dataset.load(index, extractor.sample_rate())?;
        let vectors = extractor.extract(&waveform);
        if vectors.is_empty() {
            skipped += 1;
            tracing::warn!(path = %path.display(), samples = waveform.len(), "Clip too short for one feature vector, skipping");
        } else {
            debug_assert!(vectors.iter().all(|v| v.len() == extractor.dim()));
            clips.push(ClipFeatures {
                path: path.to_path_buf(),
                vectors,
            });
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let vectors: usize = clips.iter().map(|c| c.vectors.len()).sum();
    tracing::info!(
        machine_id = dataset.machine_id(),
        clips = clips.len(),
        skipped,
        vectors,
        dim = extractor.dim(),
        "Feature precomputation complete"
    );
    Ok(clips)
}
