//! Factor-graph data model and topology.
//!
//! ## Key components
//!
//! - **Node**: role payload, damping factor, and per-edge message slots
//! - **FactorGraph**: arena that owns every node plus the shared
//!   dissimilarity matrix and regularization scalar
//! - **MessageReadout**: converged per-edge values keyed by
//!   (factor role, row, column) for the downstream decision step
//!
//! ## Design
//!
//! The bipartite Variable/Factor graph is inherently cyclic, so nodes
//! live in flat arena storage and reference their neighbors by stable
//! `NodeId` index instead of owning pointers. Each undirected edge is a
//! pair of reciprocal slots, one per endpoint, and each slot carries the
//! incoming, outgoing, and previous-outgoing message for its direction —
//! a single record per edge rather than four parallel arrays, so the
//! alignment invariant holds structurally. Slots are tagged with the
//! peer's role, letting factor updates locate a neighbor's inbox by role
//! instead of by construction-order position.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::engine::dissimilarity::DissimilarityMatrix;
use crate::engine::errors::PropagationError;
use crate::engine::propagation::{self, PropagationConfig};

/// Inline capacity for per-node edge-slot storage.
///
/// Variables carry exactly three edges (pairwise link, column budget,
/// row uniqueness); constraint factors on larger problems spill to the
/// heap.
pub(crate) const INLINE_EDGE_SLOTS: usize = 4;

/// A unique identifier for a node in the factor graph.
///
/// NodeId implements Ord/PartialOrd for stable, deterministic iteration.
/// Uses u32 internally for efficient storage and indexing.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Role tag for a node.
///
/// Used for readout keys, diagnostics, and textual configuration. The
/// role-specific payload lives in [`NodeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeRole {
    /// Base-contract node with no update rule of its own.
    Generic,
    /// One (point, candidate-exemplar) pair.
    Variable,
    /// Constant similarity term for one pair.
    PairwiseLink,
    /// Competition among the candidate rows of one column.
    RowUniqueness,
    /// Budgeted evidence across the columns of one row.
    ColumnBudget,
}

impl NodeRole {
    /// Parses a textual role tag.
    ///
    /// Accepts exactly `generic`, `variable`, `pairwise-link`,
    /// `row-uniqueness`, and `column-budget`; anything else fails with
    /// `PropagationError::InvalidRole`.
    pub fn parse(tag: &str) -> Result<Self, PropagationError> {
        match tag {
            "generic" => Ok(Self::Generic),
            "variable" => Ok(Self::Variable),
            "pairwise-link" => Ok(Self::PairwiseLink),
            "row-uniqueness" => Ok(Self::RowUniqueness),
            "column-budget" => Ok(Self::ColumnBudget),
            other => Err(PropagationError::InvalidRole(format!(
                "`{other}` is not one of generic, variable, pairwise-link, \
                 row-uniqueness, column-budget"
            ))),
        }
    }

    /// The textual tag for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Variable => "variable",
            Self::PairwiseLink => "pairwise-link",
            Self::RowUniqueness => "row-uniqueness",
            Self::ColumnBudget => "column-budget",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeRole {
    type Err = PropagationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Role-specific node payload.
///
/// The three factor behaviors are variants of one tagged union rather
/// than subclasses of a common base, so the message-update dispatch in
/// the propagation module stays exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// Base-contract node: participates in the exchange and convergence
    /// test but has no update rule of its own.
    Generic,
    /// The binary assignment variable for pair (`row`, `col`).
    Variable { row: usize, col: usize },
    /// Similarity factor for pair (`row`, `col`). Exactly one edge.
    PairwiseLink { row: usize, col: usize },
    /// Uniqueness factor over all candidate rows of column `col`.
    RowUniqueness { col: usize },
    /// Budget factor over all columns of row `row`.
    ColumnBudget { row: usize },
}

impl NodeKind {
    /// The role tag of this payload.
    pub fn role(self) -> NodeRole {
        match self {
            Self::Generic => NodeRole::Generic,
            Self::Variable { .. } => NodeRole::Variable,
            Self::PairwiseLink { .. } => NodeRole::PairwiseLink,
            Self::RowUniqueness { .. } => NodeRole::RowUniqueness,
            Self::ColumnBudget { .. } => NodeRole::ColumnBudget,
        }
    }

    fn is_variable(self) -> bool {
        matches!(self, Self::Variable { .. })
    }

    fn is_factor(self) -> bool {
        matches!(
            self,
            Self::PairwiseLink { .. } | Self::RowUniqueness { .. } | Self::ColumnBudget { .. }
        )
    }
}

/// One directed message slot of an undirected edge.
///
/// The reciprocal slot lives at `peer_slot` in the peer's edge list; the
/// two indices are assigned independently when the edge is created.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeSlot {
    /// The node on the other end of the edge.
    pub peer: NodeId,
    /// Index of the reciprocal slot in the peer's edge list.
    pub peer_slot: usize,
    /// Role of the peer, so an inbox can be located by role rather than
    /// by construction-order position.
    pub peer_role: NodeRole,
    /// Latest message received from the peer.
    pub in_msg: f64,
    /// Current outgoing message toward the peer.
    pub out_msg: f64,
    /// Outgoing message before the most recent update, kept for damping
    /// and the convergence test.
    pub prev_out: f64,
}

/// A single graph node: role payload, damping factor, and edge slots.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    damp: f64,
    edges: SmallVec<[EdgeSlot; INLINE_EDGE_SLOTS]>,
}

impl Node {
    fn new(id: NodeId, kind: NodeKind, damp: f64) -> Self {
        Self {
            id,
            kind,
            damp,
            edges: SmallVec::new(),
        }
    }

    /// This node's identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// This node's role payload.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// This node's role tag.
    pub fn role(&self) -> NodeRole {
        self.kind.role()
    }

    /// This node's damping factor.
    pub fn damp(&self) -> f64 {
        self.damp
    }

    /// The edge slots, in edge-creation order.
    pub fn edges(&self) -> &[EdgeSlot] {
        &self.edges
    }

    /// Latest incoming message on the edge whose peer has `role`, if any
    /// such edge exists.
    pub fn incoming_from(&self, role: NodeRole) -> Option<f64> {
        self.edges
            .iter()
            .find(|slot| slot.peer_role == role)
            .map(|slot| slot.in_msg)
    }

    /// Records `value` as the latest message from `sender`.
    pub(crate) fn receive(&mut self, sender: NodeId, value: f64) -> Result<(), PropagationError> {
        let slot = self
            .edges
            .iter_mut()
            .find(|slot| slot.peer == sender)
            .ok_or_else(|| {
                PropagationError::UnknownNeighbor(format!(
                    "node {} received a message from node {}, which is not a neighbor",
                    self.id.0, sender.0
                ))
            })?;
        slot.in_msg = value;
        Ok(())
    }

    /// Snapshots `out_msg` into `prev_out` on every slot, then folds the
    /// freshly computed values in under this node's damping factor.
    pub(crate) fn apply_update(&mut self, fresh: &[f64]) {
        debug_assert_eq!(fresh.len(), self.edges.len());
        for (slot, &value) in self.edges.iter_mut().zip(fresh) {
            slot.prev_out = slot.out_msg;
            slot.out_msg = self.damp * slot.prev_out + (1.0 - self.damp) * value;
        }
    }

    /// True when every outgoing message moved by at most `epsilon` in the
    /// last update. Trivially true for a node with no edges.
    pub fn has_converged(&self, epsilon: f64) -> bool {
        self.edges
            .iter()
            .all(|slot| (slot.out_msg - slot.prev_out).abs() <= epsilon)
    }

    /// Largest absolute outgoing-message change from the last update.
    pub fn max_delta(&self) -> f64 {
        self.edges
            .iter()
            .map(|slot| (slot.out_msg - slot.prev_out).abs())
            .fold(0.0, f64::max)
    }
}

/// Lifecycle phase of a factor graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GraphPhase {
    /// Topology may still be mutated.
    Constructing,
    /// Message rounds are in flight; topology is sealed.
    Running,
    /// Every node's last update moved by at most the configured epsilon.
    Converged,
    /// The iteration cap was hit before convergence. A soft outcome: the
    /// message state is best-effort, not a verified fixed point.
    MaxIterationsReached,
}

/// Converged message values for one factor-variable edge.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeReadout {
    /// Role of the factor endpoint.
    pub factor_role: NodeRole,
    /// Row index of the variable endpoint.
    pub row: usize,
    /// Column index of the variable endpoint.
    pub col: usize,
    /// The factor's outgoing message toward the variable.
    pub to_variable: f64,
    /// The factor's latest incoming message from the variable.
    pub from_variable: f64,
}

/// Snapshot of every factor-variable edge, keyed by
/// (factor role, row, column).
///
/// Sufficient for the downstream decision step to reconstruct
/// availability/responsibility-style values; the decision step itself is
/// outside this crate.
#[derive(Debug, Clone, Default)]
pub struct MessageReadout {
    entries: FxHashMap<(NodeRole, usize, usize), EdgeReadout>,
}

impl MessageReadout {
    /// The readout for the edge between the `role` factor and the
    /// variable at (`row`, `col`).
    pub fn get(&self, role: NodeRole, row: usize, col: usize) -> Option<&EdgeReadout> {
        self.entries.get(&(role, row, col))
    }

    /// All recorded factor-variable edges, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &EdgeReadout> {
        self.entries.values()
    }

    /// Number of recorded edges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bipartite max-sum factor graph over an M×N dissimilarity matrix.
///
/// The graph exclusively owns its node set and the dissimilarity matrix;
/// nodes refer to each other only by [`NodeId`]. Lifecycle: construct the
/// topology, run message rounds, read the converged messages, discard.
#[derive(Debug, Clone)]
pub struct FactorGraph {
    nodes: Vec<Node>,
    dissimilarity: DissimilarityMatrix,
    regularization: f64,
    damping: f64,
    phase: GraphPhase,
    variables: FxHashMap<(usize, usize), NodeId>,
    pairwise: FxHashMap<(usize, usize), NodeId>,
    row_uniqueness: FxHashMap<usize, NodeId>,
    column_budget: FxHashMap<usize, NodeId>,
}

impl FactorGraph {
    /// Creates an empty graph over `dissimilarity` with no nodes.
    ///
    /// Most callers want [`FactorGraph::assemble`]; this constructor
    /// exists for hand-built topologies.
    pub fn new(
        dissimilarity: DissimilarityMatrix,
        regularization: f64,
        config: &PropagationConfig,
    ) -> Result<Self, PropagationError> {
        let config = config.validate()?;
        if !regularization.is_finite() {
            return Err(PropagationError::Validation(
                "regularization must be finite".into(),
            ));
        }
        Ok(Self {
            nodes: Vec::new(),
            dissimilarity,
            regularization,
            damping: config.damping,
            phase: GraphPhase::Constructing,
            variables: FxHashMap::default(),
            pairwise: FxHashMap::default(),
            row_uniqueness: FxHashMap::default(),
            column_budget: FxHashMap::default(),
        })
    }

    /// Builds the full exemplar-selection topology for the matrix:
    /// one variable and one pairwise-link factor per (row, column) pair,
    /// one column-budget factor per row spanning that row's variables,
    /// and one row-uniqueness factor per column spanning that column's
    /// variables.
    ///
    /// Node ids and edge order are deterministic, so repeated runs over
    /// the same inputs reproduce identical message values.
    pub fn assemble(
        dissimilarity: DissimilarityMatrix,
        regularization: f64,
        config: &PropagationConfig,
    ) -> Result<Self, PropagationError> {
        let mut graph = Self::new(dissimilarity, regularization, config)?;
        let rows = graph.dissimilarity.rows();
        let cols = graph.dissimilarity.cols();

        let mut variable_ids = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                variable_ids.push(graph.add_node(NodeKind::Variable { row, col })?);
            }
        }
        for row in 0..rows {
            for col in 0..cols {
                let factor = graph.add_node(NodeKind::PairwiseLink { row, col })?;
                graph.add_edge(variable_ids[row * cols + col], factor)?;
            }
        }
        for row in 0..rows {
            let factor = graph.add_node(NodeKind::ColumnBudget { row })?;
            for col in 0..cols {
                graph.add_edge(variable_ids[row * cols + col], factor)?;
            }
        }
        for col in 0..cols {
            let factor = graph.add_node(NodeKind::RowUniqueness { col })?;
            for row in 0..rows {
                graph.add_edge(variable_ids[row * cols + col], factor)?;
            }
        }
        Ok(graph)
    }

    /// Adds a node during construction.
    ///
    /// Coordinates must be unique per role; the graph must still be in
    /// the constructing phase.
    pub fn add_node(&mut self, kind: NodeKind) -> Result<NodeId, PropagationError> {
        if self.phase != GraphPhase::Constructing {
            return Err(PropagationError::MalformedTopology(
                "nodes can only be added before the run starts".into(),
            ));
        }
        let (rows, cols) = (self.dissimilarity.rows(), self.dissimilarity.cols());
        let in_range = match kind {
            NodeKind::Generic => true,
            NodeKind::Variable { row, col } | NodeKind::PairwiseLink { row, col } => {
                row < rows && col < cols
            }
            NodeKind::RowUniqueness { col } => col < cols,
            NodeKind::ColumnBudget { row } => row < rows,
        };
        if !in_range {
            return Err(PropagationError::Validation(format!(
                "{} coordinates fall outside the {}x{} dissimilarity matrix",
                kind.role(),
                rows,
                cols
            )));
        }
        let id = NodeId(u32::try_from(self.nodes.len()).map_err(|_| {
            PropagationError::Validation("node count exceeds u32 capacity".into())
        })?);
        let occupied = match kind {
            NodeKind::Generic => None,
            NodeKind::Variable { row, col } => self.variables.insert((row, col), id),
            NodeKind::PairwiseLink { row, col } => self.pairwise.insert((row, col), id),
            NodeKind::RowUniqueness { col } => self.row_uniqueness.insert(col, id),
            NodeKind::ColumnBudget { row } => self.column_budget.insert(row, id),
        };
        if let Some(existing) = occupied {
            return Err(PropagationError::MalformedTopology(format!(
                "duplicate {} node: id {} already covers those coordinates",
                kind.role(),
                existing.0
            )));
        }
        self.nodes.push(Node::new(id, kind, self.damping));
        Ok(id)
    }

    /// Registers a bidirectional edge between `a` and `b`, appending a
    /// zero-initialized message slot to both endpoints.
    ///
    /// Fails once the run has started, on self-edges, and on pairings
    /// the bipartite structure forbids (variable-variable or
    /// factor-factor). Generic nodes pair freely.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) -> Result<(), PropagationError> {
        if self.phase != GraphPhase::Constructing {
            return Err(PropagationError::MalformedTopology(
                "edges can only be added before the run starts".into(),
            ));
        }
        if a == b {
            return Err(PropagationError::MalformedTopology(format!(
                "self-edge on node {}",
                a.0
            )));
        }
        let kind_a = self.node(a).map(Node::kind).ok_or_else(|| no_such_node(a))?;
        let kind_b = self.node(b).map(Node::kind).ok_or_else(|| no_such_node(b))?;
        if kind_a.is_variable() && kind_b.is_variable() {
            return Err(PropagationError::MalformedTopology(format!(
                "nodes {} and {} are both variables; variables connect only to factors",
                a.0, b.0
            )));
        }
        if kind_a.is_factor() && kind_b.is_factor() {
            return Err(PropagationError::MalformedTopology(format!(
                "nodes {} and {} are both factors; factors connect only to variables",
                a.0, b.0
            )));
        }
        let slot_in_a = self.nodes[a.index()].edges.len();
        let slot_in_b = self.nodes[b.index()].edges.len();
        self.nodes[a.index()].edges.push(EdgeSlot {
            peer: b,
            peer_slot: slot_in_b,
            peer_role: kind_b.role(),
            in_msg: 0.0,
            out_msg: 0.0,
            prev_out: 0.0,
        });
        self.nodes[b.index()].edges.push(EdgeSlot {
            peer: a,
            peer_slot: slot_in_a,
            peer_role: kind_a.role(),
            in_msg: 0.0,
            out_msg: 0.0,
            prev_out: 0.0,
        });
        Ok(())
    }

    /// The node with the given id, if it exists.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The shared dissimilarity matrix.
    pub fn dissimilarity(&self) -> &DissimilarityMatrix {
        &self.dissimilarity
    }

    /// The regularization scalar.
    pub fn regularization(&self) -> f64 {
        self.regularization
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> GraphPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: GraphPhase) {
        self.phase = phase;
    }

    /// Id of the variable node for (`row`, `col`).
    pub fn variable_id(&self, row: usize, col: usize) -> Option<NodeId> {
        self.variables.get(&(row, col)).copied()
    }

    /// Id of the pairwise-link factor for (`row`, `col`).
    pub fn pairwise_id(&self, row: usize, col: usize) -> Option<NodeId> {
        self.pairwise.get(&(row, col)).copied()
    }

    /// Id of the row-uniqueness factor for column `col`.
    pub fn row_uniqueness_id(&self, col: usize) -> Option<NodeId> {
        self.row_uniqueness.get(&col).copied()
    }

    /// Id of the column-budget factor for row `row`.
    pub fn column_budget_id(&self, row: usize) -> Option<NodeId> {
        self.column_budget.get(&row).copied()
    }

    /// Delivers one message from `sender` into `recipient`'s inbox.
    ///
    /// This is the single-edge form of the exchange phase; it fails with
    /// an unknown-neighbor error when `sender` has no edge to
    /// `recipient`.
    pub fn deliver(
        &mut self,
        sender: NodeId,
        recipient: NodeId,
        value: f64,
    ) -> Result<(), PropagationError> {
        let node = self
            .nodes
            .get_mut(recipient.index())
            .ok_or_else(|| no_such_node(recipient))?;
        node.receive(sender, value)
    }

    /// Phase (a) of a round: every node snapshots its outgoing messages
    /// and recomputes them from the previous round's incoming values.
    ///
    /// Seals the topology on first use. Must complete for all nodes
    /// before any exchange begins; the update rules assume synchronous
    /// rounds.
    pub fn compute_messages(&mut self) -> Result<(), PropagationError> {
        if self.phase == GraphPhase::Constructing {
            self.phase = GraphPhase::Running;
        }
        for index in 0..self.nodes.len() {
            let fresh = propagation::fresh_messages(self, NodeId(index as u32))?;
            self.nodes[index].apply_update(&fresh);
        }
        Ok(())
    }

    /// Phase (b) of a round: every node delivers each outgoing message to
    /// the matching neighbor inbox.
    ///
    /// All neighbors are updated before this returns; delivery order
    /// across neighbors carries no semantic weight.
    pub fn exchange_messages(&mut self) -> Result<(), PropagationError> {
        if self.phase == GraphPhase::Constructing {
            self.phase = GraphPhase::Running;
        }
        for index in 0..self.nodes.len() {
            let sender = self.nodes[index].id;
            for slot_index in 0..self.nodes[index].edges.len() {
                let slot = self.nodes[index].edges[slot_index];
                self.nodes
                    .get_mut(slot.peer.index())
                    .ok_or_else(|| no_such_node(slot.peer))?
                    .receive(sender, slot.out_msg)?;
            }
        }
        Ok(())
    }

    /// True when every node's last update moved by at most `epsilon`.
    pub fn has_converged(&self, epsilon: f64) -> bool {
        self.nodes.iter().all(|node| node.has_converged(epsilon))
    }

    /// Largest absolute outgoing-message change across the whole graph
    /// from the last update.
    pub fn max_delta(&self) -> f64 {
        self.nodes.iter().map(Node::max_delta).fold(0.0, f64::max)
    }

    /// Max-sum assignment score for pair (`row`, `col`): the sum of the
    /// variable's incoming messages. The downstream decision step selects
    /// exemplars by thresholding these.
    pub fn belief(&self, row: usize, col: usize) -> Option<f64> {
        let id = self.variable_id(row, col)?;
        let node = self.node(id)?;
        Some(node.edges().iter().map(|slot| slot.in_msg).sum())
    }

    /// Snapshots every factor-variable edge into a readout keyed by
    /// (factor role, row, column).
    pub fn readout(&self) -> MessageReadout {
        let mut entries = FxHashMap::default();
        for node in &self.nodes {
            if !node.kind.is_factor() {
                continue;
            }
            for slot in node.edges() {
                let Some(peer) = self.node(slot.peer) else {
                    continue;
                };
                let NodeKind::Variable { row, col } = peer.kind() else {
                    continue;
                };
                entries.insert(
                    (node.role(), row, col),
                    EdgeReadout {
                        factor_role: node.role(),
                        row,
                        col,
                        to_variable: slot.out_msg,
                        from_variable: slot.in_msg,
                    },
                );
            }
        }
        MessageReadout { entries }
    }
}

fn no_such_node(id: NodeId) -> PropagationError {
    PropagationError::Validation(format!("no node with id {}", id.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PropagationConfig {
        PropagationConfig::default()
    }

    fn small_matrix() -> DissimilarityMatrix {
        DissimilarityMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap()
    }

    #[test]
    fn role_tags_round_trip() {
        for role in [
            NodeRole::Generic,
            NodeRole::Variable,
            NodeRole::PairwiseLink,
            NodeRole::RowUniqueness,
            NodeRole::ColumnBudget,
        ] {
            assert_eq!(NodeRole::parse(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_tag_is_rejected() {
        let err = NodeRole::parse("exemplar").unwrap_err();
        assert!(matches!(err, PropagationError::InvalidRole(_)));
    }

    #[test]
    fn add_edge_is_symmetric_with_independent_slot_indices() {
        let mut graph = FactorGraph::new(small_matrix(), 1.0, &test_config()).unwrap();
        let a = graph.add_node(NodeKind::Generic).unwrap();
        let b = graph.add_node(NodeKind::Generic).unwrap();
        let c = graph.add_node(NodeKind::Generic).unwrap();
        graph.add_edge(a, b).unwrap();
        graph.add_edge(c, b).unwrap();

        let slot_of = |x: NodeId, peer: NodeId| {
            graph
                .node(x)
                .unwrap()
                .edges()
                .iter()
                .position(|s| s.peer == peer)
        };
        assert_eq!(slot_of(a, b), Some(0));
        assert_eq!(slot_of(b, a), Some(0));
        // c sits at index 1 in b's list but b sits at index 0 in c's.
        assert_eq!(slot_of(b, c), Some(1));
        assert_eq!(slot_of(c, b), Some(0));
    }

    #[test]
    fn deliver_from_non_neighbor_fails() {
        let mut graph = FactorGraph::new(small_matrix(), 1.0, &test_config()).unwrap();
        let a = graph.add_node(NodeKind::Generic).unwrap();
        let b = graph.add_node(NodeKind::Generic).unwrap();
        let stranger = graph.add_node(NodeKind::Generic).unwrap();
        graph.add_edge(a, b).unwrap();
        let err = graph.deliver(stranger, a, 1.0).unwrap_err();
        assert!(matches!(err, PropagationError::UnknownNeighbor(_)));
    }

    #[test]
    fn fresh_node_has_converged_trivially() {
        let mut graph = FactorGraph::new(small_matrix(), 1.0, &test_config()).unwrap();
        let isolated = graph.add_node(NodeKind::Generic).unwrap();
        let a = graph.add_node(NodeKind::Generic).unwrap();
        let b = graph.add_node(NodeKind::Generic).unwrap();
        graph.add_edge(a, b).unwrap();
        // Zero edges: trivially converged. Fresh slots: delta is exactly 0.
        assert!(graph.node(isolated).unwrap().has_converged(1e-4));
        assert!(graph.node(a).unwrap().has_converged(1e-4));
        assert!(graph.has_converged(1e-4));
    }

    #[test]
    fn topology_is_sealed_once_running() {
        let mut graph = FactorGraph::assemble(small_matrix(), 1.0, &test_config()).unwrap();
        graph.compute_messages().unwrap();
        assert_eq!(graph.phase(), GraphPhase::Running);
        let err = graph.add_node(NodeKind::Generic).unwrap_err();
        assert!(matches!(err, PropagationError::MalformedTopology(_)));
        let a = graph.variable_id(0, 0).unwrap();
        let b = graph.row_uniqueness_id(1).unwrap();
        let err = graph.add_edge(a, b).unwrap_err();
        assert!(matches!(err, PropagationError::MalformedTopology(_)));
    }

    #[test]
    fn bipartite_pairing_is_enforced() {
        let mut graph = FactorGraph::new(small_matrix(), 1.0, &test_config()).unwrap();
        let v0 = graph.add_node(NodeKind::Variable { row: 0, col: 0 }).unwrap();
        let v1 = graph.add_node(NodeKind::Variable { row: 0, col: 1 }).unwrap();
        let f0 = graph.add_node(NodeKind::PairwiseLink { row: 0, col: 0 }).unwrap();
        let f1 = graph.add_node(NodeKind::ColumnBudget { row: 0 }).unwrap();
        assert!(matches!(
            graph.add_edge(v0, v1).unwrap_err(),
            PropagationError::MalformedTopology(_)
        ));
        assert!(matches!(
            graph.add_edge(f0, f1).unwrap_err(),
            PropagationError::MalformedTopology(_)
        ));
        graph.add_edge(v0, f0).unwrap();
        graph.add_edge(v0, f1).unwrap();
    }

    #[test]
    fn duplicate_coordinates_are_rejected() {
        let mut graph = FactorGraph::new(small_matrix(), 1.0, &test_config()).unwrap();
        graph.add_node(NodeKind::Variable { row: 0, col: 0 }).unwrap();
        let err = graph
            .add_node(NodeKind::Variable { row: 0, col: 0 })
            .unwrap_err();
        assert!(matches!(err, PropagationError::MalformedTopology(_)));
    }

    #[test]
    fn assemble_builds_the_expected_topology() {
        let graph = FactorGraph::assemble(small_matrix(), 1.0, &test_config()).unwrap();
        // 4 variables, 4 pairwise links, 2 column budgets, 2 row
        // uniqueness factors.
        assert_eq!(graph.node_count(), 12);
        for row in 0..2 {
            for col in 0..2 {
                let variable = graph.node(graph.variable_id(row, col).unwrap()).unwrap();
                let mut roles: Vec<NodeRole> =
                    variable.edges().iter().map(|s| s.peer_role).collect();
                roles.sort();
                assert_eq!(
                    roles,
                    vec![
                        NodeRole::PairwiseLink,
                        NodeRole::RowUniqueness,
                        NodeRole::ColumnBudget
                    ]
                );
                let pairwise = graph.node(graph.pairwise_id(row, col).unwrap()).unwrap();
                assert_eq!(pairwise.edges().len(), 1);
            }
        }
        for row in 0..2 {
            let budget = graph.node(graph.column_budget_id(row).unwrap()).unwrap();
            assert_eq!(budget.edges().len(), 2);
        }
        for col in 0..2 {
            let uniqueness = graph.node(graph.row_uniqueness_id(col).unwrap()).unwrap();
            assert_eq!(uniqueness.edges().len(), 2);
        }
    }

    #[test]
    fn readout_covers_every_factor_edge() {
        let mut graph = FactorGraph::assemble(small_matrix(), 1.0, &test_config()).unwrap();
        graph.compute_messages().unwrap();
        graph.exchange_messages().unwrap();
        let readout = graph.readout();
        assert_eq!(readout.len(), 12);
        for role in [
            NodeRole::PairwiseLink,
            NodeRole::RowUniqueness,
            NodeRole::ColumnBudget,
        ] {
            for row in 0..2 {
                for col in 0..2 {
                    let entry = readout.get(role, row, col).unwrap();
                    assert_eq!(entry.factor_role, role);
                    assert!(entry.to_variable.is_finite());
                    assert!(entry.from_variable.is_finite());
                }
            }
        }
    }
}
