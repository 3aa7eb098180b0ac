//! Per-(machine, id) flow training for acoustic anomaly detection.
//!
//! Reads `baseline.toml`, walks the development or evaluation dataset tree,
//! and fits one normalizing flow per machine type and machine id, skipping
//! partitions whose artifacts already exist for the current configuration.

pub mod artifacts;
pub mod config;
pub mod logging;
pub mod pipeline;
