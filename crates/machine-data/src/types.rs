use std::fmt;
use std::path::PathBuf;

/// Errors raised while reading or featurizing machine sound clips.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// The WAV decoder rejected the file.
    #[error("Failed to decode {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// The file decoded but its sample layout cannot be used.
    #[error("Unsupported audio format in {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// The resampler could not be built or failed mid-clip.
    #[error("Failed to resample {path} from {from_rate} Hz to {to_rate} Hz: {reason}")]
    Resample {
        path: PathBuf,
        from_rate: u32,
        to_rate: u32,
        reason: String,
    },

    /// Feature extraction parameters are inconsistent.
    #[error("Invalid feature config: {0}")]
    InvalidConfig(String),

    /// Filesystem error while scanning directories.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One independent training problem: a machine type and one unit of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachinePartition {
    /// Machine type, i.e. the directory name under the dataset base (e.g. `fan`).
    pub machine: String,
    /// Machine identifier token as it appears in file names (e.g. `id_00`).
    pub machine_id: String,
}

impl MachinePartition {
    pub fn new(machine: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            machine_id: machine_id.into(),
        }
    }

    /// File-name-safe stem identifying the partition, e.g. `fan_id_00`.
    pub fn stem(&self) -> String {
        format!("{}_{}", self.machine, self.machine_id)
    }
}

impl fmt::Display for MachinePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.machine, self.machine_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_display_and_stem() {
        let p = MachinePartition::new("valve", "id_04");
        assert_eq!(p.to_string(), "valve/id_04");
        assert_eq!(p.stem(), "valve_id_04");
    }

    #[test]
    fn test_partition_ordering() {
        let mut parts = vec![
            MachinePartition::new("pump", "id_02"),
            MachinePartition::new("fan", "id_06"),
            MachinePartition::new("fan", "id_00"),
        ];
        parts.sort();
        assert_eq!(parts[0], MachinePartition::new("fan", "id_00"));
        assert_eq!(parts[2], MachinePartition::new("pump", "id_02"));
    }
}
