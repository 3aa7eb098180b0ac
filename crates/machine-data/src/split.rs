//! Per-file train/validation split.

use std::path::PathBuf;

use rand::Rng;

/// Fraction of clips kept for training when the config does not say otherwise.
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.85;

/// Split `files` into `(train, val)` by an independent draw per file.
///
/// Each file goes to training with probability `train_fraction`, so the
/// split sizes are only approximately proportional. Input order is kept
/// within each side.
pub fn split_train_val(
    files: &[PathBuf],
    train_fraction: f64,
    rng: &mut impl Rng,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let fraction = train_fraction.clamp(0.0, 1.0);
    let mut train = Vec::with_capacity(files.len());
    let mut val = Vec::new();
    for path in files {
        if rng.gen::<f64>() < fraction {
            train.push(path.clone());
        } else {
            val.push(path.clone());
        }
    }
    tracing::debug!(train = train.len(), val = val.len(), "Split clip list");
    (train, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("clip_{i:04}.wav"))).collect()
    }

    #[test]
    fn test_split_partitions_all_files() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let all = files(200);
        let (train, val) = split_train_val(&all, DEFAULT_TRAIN_FRACTION, &mut rng);
        assert_eq!(train.len() + val.len(), 200);
        // 85% expected; allow wide slack for a 200-draw sample.
        assert!(train.len() > 150 && train.len() < 195, "train={}", train.len());
        for p in &val {
            assert!(!train.contains(p));
        }
    }

    #[test]
    fn test_split_is_reproducible_with_seed() {
        let all = files(50);
        let a = split_train_val(&all, 0.5, &mut rand::rngs::StdRng::seed_from_u64(3));
        let b = split_train_val(&all, 0.5, &mut rand::rngs::StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_extremes() {
        let all = files(10);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let (train, val) = split_train_val(&all, 1.0, &mut rng);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());

        let (train, val) = split_train_val(&all, 0.0, &mut rng);
        assert!(train.is_empty());
        assert_eq!(val, all);
    }
}
