//! The max-sum propagation engine.
//!
//! This module provides:
//! - **errors**: Error types for construction and propagation failures
//! - **dissimilarity**: Validated M×N dissimilarity input
//! - **graph**: Factor-graph data model, topology assembly, and readout
//! - **propagation**: Damped message updates and the iteration driver

pub mod dissimilarity;
pub mod errors;
pub mod graph;
pub mod propagation;
