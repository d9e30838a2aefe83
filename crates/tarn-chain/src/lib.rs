//! # tarn-chain
//! Chain state machine over a pluggable block store: validation,
//! reorganization, checkpoints, and transaction confidence.

pub mod chain;
pub mod checkpoint;
pub mod confidence;

pub use chain::{Accepted, Chain};
