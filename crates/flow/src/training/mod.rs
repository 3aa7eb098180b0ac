//! Flow training pipeline: feature tables and mini-batching, the NLL loss,
//! per-epoch loss history with health checks, and the AdamW epoch loop with
//! early stopping and checkpointing.

pub mod data;
pub mod loss;
pub mod metrics;
pub mod trainer;

pub use trainer::TrainError;
