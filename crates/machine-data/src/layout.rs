//! Directory layout scanning for `<base>/<machine>/<train|test>/*.wav`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::DataError;

/// Which dataset tree a run reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Development data (`dev_directory`).
    Development,
    /// Evaluation data (`eval_directory`).
    Evaluation,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Development => write!(f, "development"),
            RunMode::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// Sub-directory of a machine directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirType {
    Train,
    Test,
}

impl DirType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirType::Train => "train",
            DirType::Test => "test",
        }
    }
}

/// List the machine types available under a dataset base directory.
///
/// Only directories count; names are returned sorted so runs are ordered
/// deterministically.
pub fn machine_list(base: &Path) -> Result<Vec<String>, DataError> {
    let mut machines = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            machines.push(name.to_string());
        }
    }
    machines.sort();
    tracing::debug!(base = %base.display(), count = machines.len(), "Scanned machine list");
    Ok(machines)
}

/// Sorted `.wav` files of `<base>/<machine>/<dir_type>/`.
///
/// A missing directory yields an empty list rather than an error; the caller
/// decides whether an empty partition is fatal.
pub fn select_files(
    base: &Path,
    machine: &str,
    dir_type: DirType,
) -> Result<Vec<PathBuf>, DataError> {
    let dir = base.join(machine).join(dir_type.as_str());
    wav_files_in(&dir)
}

fn wav_files_in(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "Directory not found");
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Extract the sorted, de-duplicated `id_NN` tokens found in `names`.
///
/// A token is the literal `id_` followed by exactly two ASCII digits; any
/// number of tokens may appear in one name.
pub fn extract_machine_ids<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids = BTreeSet::new();
    for name in names {
        let bytes = name.as_ref().as_bytes();
        let mut i = 0;
        while i + 5 <= bytes.len() {
            if &bytes[i..i + 3] == b"id_"
                && bytes[i + 3].is_ascii_digit()
                && bytes[i + 4].is_ascii_digit()
            {
                // Safe to slice: the five bytes are all ASCII.
                ids.insert(name.as_ref()[i..i + 5].to_string());
                i += 5;
            } else {
                i += 1;
            }
        }
    }
    ids.into_iter().collect()
}

/// Machine ids present among the `.wav` files of `<machine_dir>/<dir_type>/`.
pub fn machine_id_list(machine_dir: &Path, dir_type: DirType) -> Result<Vec<String>, DataError> {
    let files = wav_files_in(&machine_dir.join(dir_type.as_str()))?;
    let names = files
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string));
    Ok(extract_machine_ids(names))
}
