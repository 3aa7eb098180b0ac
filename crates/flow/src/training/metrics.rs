//! Per-epoch loss history with health checks.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Losses and schedule state recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean training NLL over the epoch's batches.
    pub train_loss: f64,
    /// Mean validation NLL, if a validation set was given.
    pub val_loss: Option<f64>,
    /// Learning rate at the epoch's last step.
    pub lr: f64,
    pub elapsed_secs: f64,
}

impl EpochMetrics {
    /// The loss early stopping watches: validation if present, else train.
    pub fn monitored(&self) -> f64 {
        self.val_loss.unwrap_or(self.train_loss)
    }
}

/// Ordered epoch metrics: the loss curve of one training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl LossHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn train_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|m| m.train_loss).collect()
    }

    pub fn val_losses(&self) -> Vec<Option<f64>> {
        self.epochs.iter().map(|m| m.val_loss).collect()
    }

    /// Epoch with the lowest monitored loss. Non-finite entries are ignored.
    pub fn best_epoch(&self) -> Option<&EpochMetrics> {
        self.epochs
            .iter()
            .filter(|m| m.monitored().is_finite())
            .min_by(|a, b| a.monitored().total_cmp(&b.monitored()))
    }

    /// Return warnings for suspicious training dynamics.
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(last) = self.last() else {
            return warnings;
        };

        if !last.train_loss.is_finite() || last.val_loss.is_some_and(|v| !v.is_finite()) {
            warnings.push(format!("Non-finite loss at epoch {}", last.epoch));
            return warnings;
        }

        if let Some(first) = self.epochs.first() {
            if self.epochs.len() > 1 && last.train_loss > first.train_loss {
                warnings.push(format!(
                    "Train loss diverging: {:.4} at epoch {} > {:.4} at epoch {}",
                    last.train_loss, last.epoch, first.train_loss, first.epoch
                ));
            }
        }

        if let Some(val) = last.val_loss {
            let gap = val - last.train_loss;
            if gap > last.train_loss.abs().max(1.0) {
                warnings.push(format!(
                    "Large validation gap ({gap:.4}): val={val:.4} train={:.4}, likely overfitting",
                    last.train_loss
                ));
            }
        }

        warnings
    }

    pub fn save_json(&self, path: &Path) -> std::io::Result<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> std::io::Result<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(epoch: usize, train: f64, val: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: train,
            val_loss: val,
            lr: 1e-3,
            elapsed_secs: 0.1,
        }
    }

    #[test]
    fn test_best_epoch_prefers_validation() {
        let mut h = LossHistory::new();
        h.push(m(0, 5.0, Some(6.0)));
        h.push(m(1, 3.0, Some(4.0)));
        h.push(m(2, 1.0, Some(4.5)));
        assert_eq!(h.best_epoch().unwrap().epoch, 1);
        assert_eq!(h.len(), 3);
        assert_eq!(h.train_losses(), vec![5.0, 3.0, 1.0]);
    }

    #[test]
    fn test_best_epoch_falls_back_to_train() {
        let mut h = LossHistory::new();
        h.push(m(0, 5.0, None));
        h.push(m(1, f64::NAN, None));
        h.push(m(2, 2.0, None));
        assert_eq!(h.best_epoch().unwrap().epoch, 2);
        assert!(LossHistory::new().best_epoch().is_none());
    }

    #[test]
    fn test_healthy_history_no_warnings() {
        let mut h = LossHistory::new();
        h.push(m(0, 5.0, Some(5.2)));
        h.push(m(1, 4.0, Some(4.3)));
        assert!(h.health_check().is_empty());
        assert!(LossHistory::new().health_check().is_empty());
    }

    #[test]
    fn test_health_check_flags_problems() {
        let mut diverging = LossHistory::new();
        diverging.push(m(0, 1.0, None));
        diverging.push(m(1, 2.0, None));
        let w = diverging.health_check();
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("diverging"));

        let mut gap = LossHistory::new();
        gap.push(m(0, 2.0, Some(10.0)));
        assert!(gap.health_check()[0].contains("validation gap"));

        let mut nan = LossHistory::new();
        nan.push(m(0, f64::INFINITY, None));
        assert!(nan.health_check()[0].contains("Non-finite"));
    }

    #[test]
    fn test_json_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        let mut h = LossHistory::new();
        h.push(m(0, 3.5, Some(3.7)));
        h.push(m(1, 2.5, None));
        h.save_json(&path).unwrap();
        assert_eq!(LossHistory::load_json(&path).unwrap(), h);
    }

    #[test]
    fn test_json_round_trip_is_bit_exact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        let mut h = LossHistory::new();
        // Values from a cosine lr schedule and running loss means, whose
        // shortest decimal form needs all 17 significant digits.
        h.push(EpochMetrics {
            epoch: 0,
            train_loss: 0.1 + 0.2,
            val_loss: Some(1.0 / 3.0),
            lr: 9.513254770636137e-6,
            elapsed_secs: std::f64::consts::PI,
        });
        h.push(EpochMetrics {
            epoch: 1,
            train_loss: 2.0_f64.sqrt() * 1e-7,
            val_loss: None,
            lr: 1e-3 * 0.5 * (1.0 + (std::f64::consts::PI * 0.37).cos()),
            elapsed_secs: 12.345678901234567,
        });
        h.save_json(&path).unwrap();

        let back = LossHistory::load_json(&path).unwrap();
        for (a, b) in back.epochs.iter().zip(&h.epochs) {
            assert_eq!(a.lr.to_bits(), b.lr.to_bits());
            assert_eq!(a.train_loss.to_bits(), b.train_loss.to_bits());
            assert_eq!(a.elapsed_secs.to_bits(), b.elapsed_secs.to_bits());
        }
        assert_eq!(back, h);
    }
}
