//! Flow model components: conditioner MLP, affine coupling layer, diagonal
//! Gaussian base distribution, the full flow stack, and the tensor bridge
//! between feature rows and burn tensors.

pub mod base;
pub mod bridge;
pub mod conditioner;
pub mod coupling;
pub mod flow_model;
