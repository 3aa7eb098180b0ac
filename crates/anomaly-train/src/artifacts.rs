//! Artifact naming for one trained partition.
//!
//! ```text
//! <model_dir>/model_<machine>_<id>_<key>.mpk     model weights
//! <model_dir>/model_<machine>_<id>_<key>.json    checkpoint metadata
//! <model_dir>/history_<machine>_<id>_<key>.json  loss curve
//! ```

use std::path::{Path, PathBuf};

use machine_data::MachinePartition;

/// Paths of every artifact written for one (machine, id) partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Extension-less path handed to the checkpoint recorder.
    pub model_stem: PathBuf,
    pub model_file: PathBuf,
    pub meta_file: PathBuf,
    pub history_file: PathBuf,
}

/// Replace anything outside `[A-Za-z0-9_-]` so names stay flat and
/// extension-free.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ArtifactPaths {
    pub fn new(model_dir: &Path, partition: &MachinePartition, cache_key: &str) -> Self {
        let tag = format!(
            "{}_{}_{}",
            sanitize(&partition.machine),
            sanitize(&partition.machine_id),
            sanitize(cache_key)
        );
        let model_stem = model_dir.join(format!("model_{tag}"));
        Self {
            model_file: model_stem.with_extension("mpk"),
            meta_file: model_stem.with_extension("json"),
            history_file: model_dir.join(format!("history_{tag}.json")),
            model_stem,
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.model_file, &self.meta_file, &self.history_file]
    }

    /// True when every artifact exists, i.e. training can be skipped.
    pub fn is_complete(&self) -> bool {
        self.all().iter().all(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_embed_machine_id_and_key() {
        let paths = ArtifactPaths::new(
            Path::new("/out"),
            &MachinePartition::new("fan", "id_00"),
            "deadbeef01234567",
        );
        assert_eq!(paths.model_stem, PathBuf::from("/out/model_fan_id_00_deadbeef01234567"));
        assert_eq!(paths.model_file, PathBuf::from("/out/model_fan_id_00_deadbeef01234567.mpk"));
        assert_eq!(paths.meta_file, PathBuf::from("/out/model_fan_id_00_deadbeef01234567.json"));
        assert_eq!(
            paths.history_file,
            PathBuf::from("/out/history_fan_id_00_deadbeef01234567.json")
        );
    }

    #[test]
    fn test_ids_of_one_machine_do_not_collide() {
        let dir = Path::new("/out");
        let a = ArtifactPaths::new(dir, &MachinePartition::new("pump", "id_00"), "k");
        let b = ArtifactPaths::new(dir, &MachinePartition::new("pump", "id_02"), "k");
        assert_ne!(a.model_file, b.model_file);
        assert_ne!(a.history_file, b.history_file);
    }

    #[test]
    fn test_dotted_machine_name_keeps_extensions_intact() {
        let paths = ArtifactPaths::new(
            Path::new("/out"),
            &MachinePartition::new("slide.rail", "id_01"),
            "k",
        );
        assert_eq!(paths.model_file, PathBuf::from("/out/model_slide_rail_id_01_k.mpk"));
        assert_eq!(paths.model_stem.with_extension("mpk"), paths.model_file);
    }

    #[test]
    fn test_is_complete_requires_every_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = ArtifactPaths::new(tmp.path(), &MachinePartition::new("valve", "id_04"), "k");
        assert!(!paths.is_complete());

        std::fs::write(&paths.model_file, b"weights").unwrap();
        std::fs::write(&paths.meta_file, b"{}").unwrap();
        assert!(!paths.is_complete());

        std::fs::write(&paths.history_file, b"{}").unwrap();
        assert!(paths.is_complete());
    }
}
