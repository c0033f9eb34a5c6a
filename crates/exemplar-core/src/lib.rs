//! # Exemplar Core
//!
//! Max-sum belief-propagation engine for exemplar-selection clustering.
//!
//! Given an M×N dissimilarity matrix between points and candidate
//! exemplars plus a regularization scalar, the engine builds a bipartite
//! factor graph (one variable per candidate pair, three factor roles)
//! and passes damped messages between nodes until the exchange reaches a
//! fixed point or an iteration cap. The converged per-edge messages are
//! exposed for a downstream decision step that selects the exemplars;
//! that step, along with input loading and output formatting, lives
//! outside this crate.
//!
//! ```rust,ignore
//! use exemplar_core::{propagate, DissimilarityMatrix, PropagationConfig};
//!
//! let matrix = DissimilarityMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]])?;
//! let (graph, report) = propagate(matrix, 1.0, &PropagationConfig::default())?;
//! assert!(report.converged());
//! let readout = graph.readout();
//! ```

pub mod engine;

// Re-export commonly used types
pub use engine::dissimilarity::DissimilarityMatrix;
pub use engine::errors::PropagationError;
pub use engine::graph::{
    EdgeReadout, EdgeSlot, FactorGraph, GraphPhase, MessageReadout, Node, NodeId, NodeKind,
    NodeRole,
};
pub use engine::propagation::{
    run_max_sum, PropagationConfig, PropagationReport, PropagationStatus,
};

/// Assembles the factor graph for `matrix` and runs damped max-sum to a
/// terminal state.
///
/// This is a convenience function that combines [`FactorGraph::assemble`]
/// and [`run_max_sum`]. Hitting the iteration cap is reported in the
/// returned diagnostics, not raised as an error.
pub fn propagate(
    matrix: DissimilarityMatrix,
    regularization: f64,
    config: &PropagationConfig,
) -> Result<(FactorGraph, PropagationReport), PropagationError> {
    let mut graph = FactorGraph::assemble(matrix, regularization, config)?;
    let report = run_max_sum(&mut graph, config)?;
    Ok((graph, report))
}
