//! Machine sound dataset access for the anomaly-detection trainer.
//!
//! Scans the `<base>/<machine>/<train|test>/*.wav` layout, extracts
//! machine identifiers from file names, splits clips into training and
//! validation lists, loads WAV audio and turns waveforms into log-mel
//! feature vectors consumed by the flow model.

pub mod audio;
pub mod dataset;
pub mod features;
pub mod layout;
pub mod split;
pub mod types;

pub use audio::load_audio;
pub use dataset::{precompute_features, AudioDataset, ClipFeatures};
pub use features::{FeatureConfig, FeatureExtractor, LogMelExtractor};
pub use layout::{
    extract_machine_ids, machine_id_list, machine_list, select_files, DirType, RunMode,
};
pub use split::{split_train_val, DEFAULT_TRAIN_FRACTION};
pub use types::{DataError, MachinePartition};
