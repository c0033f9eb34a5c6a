//! Damped max-sum message updates and the synchronous iteration driver.
//!
//! Each round is strictly two-phase: every node recomputes its outgoing
//! messages from the previous round's incoming values, then every node
//! broadcasts, then convergence is checked. Interleaving the phases would
//! let an update observe partially updated neighbors and break the
//! fixed-point equations, so the driver never mixes them. A parallel
//! variant would have to preserve exactly that structure (data-parallel
//! compute, barrier, single-writer-per-slot delivery); this engine stays
//! single-threaded.
//!
//! Every role damps identically: `out = damp * prev + (1 - damp) * fresh`
//! per edge, with `prev` snapshotted immediately before the update.

use smallvec::{smallvec, SmallVec};

use crate::engine::errors::PropagationError;
use crate::engine::graph::{
    FactorGraph, GraphPhase, Node, NodeId, NodeKind, NodeRole, INLINE_EDGE_SLOTS,
};

/// Default damping factor.
pub const DEFAULT_DAMPING: f64 = 0.5;

/// Default hard stop on the number of rounds.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Default convergence tolerance on absolute per-edge message change.
///
/// The test is absolute, not relative, so convergence is scale-dependent
/// on the magnitude of the dissimilarity values.
pub const DEFAULT_EPSILON: f64 = 1e-4;

/// Configuration for a max-sum propagation run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropagationConfig {
    /// Damping factor in [0, 1]. 0 disables damping; values near 1 slow
    /// and stabilize the exchange. Stamped into every node at graph
    /// construction.
    pub damping: f64,
    /// Hard stop on the number of rounds.
    pub max_iterations: usize,
    /// Convergence tolerance on absolute per-edge message change.
    pub epsilon: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            damping: DEFAULT_DAMPING,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl PropagationConfig {
    /// Validates ranges. Every propagation entrypoint calls this first.
    pub fn validate(self) -> Result<Self, PropagationError> {
        if !self.damping.is_finite() || !(0.0..=1.0).contains(&self.damping) {
            return Err(PropagationError::Validation(
                "damping must be in [0, 1]".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(PropagationError::Validation(
                "max_iterations must be > 0".into(),
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(PropagationError::Validation(
                "epsilon must be finite and > 0".into(),
            ));
        }
        Ok(self)
    }
}

/// Terminal outcome of a propagation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropagationStatus {
    /// Every node's outgoing messages moved by at most epsilon in the
    /// same round.
    Converged,
    /// The iteration cap was hit first. Not an error: the message state
    /// is best-effort and may not be a fixed point.
    MaxIterationsReached,
}

/// Diagnostics for a completed propagation run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropagationReport {
    /// Terminal state the run ended in.
    pub status: PropagationStatus,
    /// Number of rounds actually executed.
    pub iterations_run: usize,
    /// Largest absolute message change in the final round.
    pub final_max_delta: f64,
    /// Iteration cap configured for this run.
    pub max_iterations: usize,
    /// Convergence tolerance configured for this run.
    pub epsilon: f64,
}

impl PropagationReport {
    /// True when the run reached a fixed point within tolerance.
    pub fn converged(&self) -> bool {
        self.status == PropagationStatus::Converged
    }
}

/// Runs damped max-sum rounds until convergence or the iteration cap.
///
/// One round is: (a) every node recomputes its outgoing messages from
/// the previous round's incoming values, (b) every node broadcasts, (c)
/// the convergence test runs over all nodes. Hitting the cap is a soft
/// outcome reported in the returned diagnostics, never an error; callers
/// decide whether to rerun with more iterations or different damping.
///
/// Deterministic: nodes update in id order, no randomness anywhere, so
/// repeated runs over the same inputs produce identical messages.
pub fn run_max_sum(
    graph: &mut FactorGraph,
    config: &PropagationConfig,
) -> Result<PropagationReport, PropagationError> {
    let config = config.validate()?;
    graph.set_phase(GraphPhase::Running);

    let mut iterations_run = 0;
    let mut final_max_delta = 0.0;
    for _ in 0..config.max_iterations {
        graph.compute_messages()?;
        graph.exchange_messages()?;
        iterations_run += 1;
        final_max_delta = graph.max_delta();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            iteration = iterations_run,
            max_delta = final_max_delta,
            "max-sum round"
        );

        if final_max_delta <= config.epsilon {
            graph.set_phase(GraphPhase::Converged);
            return Ok(PropagationReport {
                status: PropagationStatus::Converged,
                iterations_run,
                final_max_delta,
                max_iterations: config.max_iterations,
                epsilon: config.epsilon,
            });
        }
    }

    graph.set_phase(GraphPhase::MaxIterationsReached);
    Ok(PropagationReport {
        status: PropagationStatus::MaxIterationsReached,
        iterations_run,
        final_max_delta,
        max_iterations: config.max_iterations,
        epsilon: config.epsilon,
    })
}

/// Computes the undamped outgoing messages for one node from the
/// previous round's state, one value per edge slot.
///
/// Reads are confined to the node's own slots, its neighbors' inboxes,
/// and the shared dissimilarity matrix; nothing is mutated here.
pub(crate) fn fresh_messages(
    graph: &FactorGraph,
    id: NodeId,
) -> Result<SmallVec<[f64; INLINE_EDGE_SLOTS]>, PropagationError> {
    let node = graph
        .node(id)
        .ok_or_else(|| PropagationError::Internal(format!("no node with id {}", id.0)))?;
    match node.kind() {
        // No update rule of its own: the damped update leaves the
        // outgoing messages unchanged.
        NodeKind::Generic => Ok(node.edges().iter().map(|slot| slot.out_msg).collect()),

        // A variable tells each factor the total belief contributed by
        // all of its other factors.
        NodeKind::Variable { .. } => {
            let edges = node.edges();
            let mut fresh = SmallVec::with_capacity(edges.len());
            for target in 0..edges.len() {
                let mut sum = 0.0;
                for (slot_index, slot) in edges.iter().enumerate() {
                    if slot_index != target {
                        sum += slot.in_msg;
                    }
                }
                fresh.push(sum);
            }
            Ok(fresh)
        }

        // Constant similarity term for the pair.
        NodeKind::PairwiseLink { row, col } => {
            if node.edges().len() != 1 {
                return Err(PropagationError::MalformedTopology(format!(
                    "pairwise-link factor {} has {} edges, needs exactly 1",
                    id.0,
                    node.edges().len()
                )));
            }
            Ok(smallvec![-graph.dissimilarity().get(row, col)])
        }

        // A candidate's message to each row is the negated best competing
        // score, excluding that row itself.
        NodeKind::RowUniqueness { col } => {
            let scores = competing_scores(graph, node, NodeRole::ColumnBudget, |var_row, _| {
                graph.dissimilarity().get(var_row, col)
            })?;
            let mut fresh = SmallVec::with_capacity(scores.len());
            for target in 0..scores.len() {
                let mut best = f64::NEG_INFINITY;
                for (k, &score) in scores.iter().enumerate() {
                    if k != target {
                        best = best.max(score);
                    }
                }
                fresh.push(-best);
            }
            Ok(fresh)
        }

        // Accumulated positive evidence from the other columns, bounded
        // by the regularization budget and clamped non-positive. Every
        // leave-one-out sum is taken over the same per-round score
        // array; targets never see a mutated copy.
        NodeKind::ColumnBudget { row } => {
            let scores = competing_scores(graph, node, NodeRole::RowUniqueness, |_, var_col| {
                graph.dissimilarity().get(row, var_col)
            })?;
            let budget = -graph.regularization();
            let mut fresh = SmallVec::with_capacity(scores.len());
            for target in 0..scores.len() {
                let mut positive_sum = 0.0;
                for (k, &score) in scores.iter().enumerate() {
                    if k != target {
                        positive_sum += score.max(0.0);
                    }
                }
                fresh.push((budget + positive_sum).min(0.0));
            }
            Ok(fresh)
        }
    }
}

/// Per-neighbor competing score for a constraint factor: what the
/// neighbor variable last heard from its `inbox_role` factor, minus the
/// dissimilarity term selected by `dissimilarity_of(var_row, var_col)`.
///
/// Constraint factors need at least two neighbors; the leave-one-out
/// reductions above are undefined otherwise.
fn competing_scores(
    graph: &FactorGraph,
    factor: &Node,
    inbox_role: NodeRole,
    dissimilarity_of: impl Fn(usize, usize) -> f64,
) -> Result<SmallVec<[f64; INLINE_EDGE_SLOTS]>, PropagationError> {
    let edges = factor.edges();
    if edges.len() < 2 {
        return Err(PropagationError::MalformedTopology(format!(
            "{} factor {} has {} edges, needs at least 2",
            factor.role(),
            factor.id().0,
            edges.len()
        )));
    }
    let mut scores = SmallVec::with_capacity(edges.len());
    for slot in edges {
        let variable = graph.node(slot.peer).ok_or_else(|| {
            PropagationError::Internal(format!("dangling edge to node {}", slot.peer.0))
        })?;
        let NodeKind::Variable { row, col } = variable.kind() else {
            return Err(PropagationError::MalformedTopology(format!(
                "{} factor {} is wired to non-variable node {}",
                factor.role(),
                factor.id().0,
                slot.peer.0
            )));
        };
        let inbox = variable.incoming_from(inbox_role).ok_or_else(|| {
            PropagationError::MalformedTopology(format!(
                "variable ({row}, {col}) has no {inbox_role} edge"
            ))
        })?;
        scores.push(inbox - dissimilarity_of(row, col));
    }
    Ok(scores)
}
