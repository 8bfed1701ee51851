//! Cross-layer mask conflict resolution.
//!
//! Independently allocated masks disagree wherever layers are structurally
//! coupled. The resolver reconciles them to a fixed point:
//!
//! - **Edges**: a consumer's input-port mask and its producer's output mask
//!   describe the same tensor, so zeros flow both ways along every
//!   [`DependencyEdge`]. A dense conv or linear layer's own output mask is
//!   never touched through its input.
//! - **Tied ops** (norm, activation, pooling, depthwise conv, add, output):
//!   every port and the output share one zero set (their union).
//! - **Concat**: port `p` owns output range `offset_p..offset_p + C_p`.
//! - **Flatten**: channel `c` owns output block `c·S..(c+1)·S`; a channel
//!   and its block are dropped together.
//!
//! Zero sets only grow, so the worklist empties after at most one visit per
//! mask position plus one per layer. Resolving a resolved set is a no-op.
//!
//! # Toyota Way: Andon
//! A layer left with no output channels is reported as a
//! [`MaskConflictWarning`] rather than failing the round.
//!
//! # References
//! - Fang, G., et al. (2023). `DepGraph`: Towards any structural pruning. CVPR.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::graph::{ChannelRule, DependencyEdge, EdgeKind, Graph, LayerId, Op};
use crate::mask::{ChannelMask, LayerMasks, MaskSet};

/// What a [`MaskConflictWarning`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Every output channel of the layer was zeroed.
    FullyPruned,
    /// A graph input lost channels through a tied junction.
    InputNarrowed {
        /// Channels removed from the input.
        removed: usize,
    },
    /// The graph output lost channels.
    OutputNarrowed {
        /// Channels removed from the output.
        removed: usize,
    },
    /// A layer kept dense by configuration was narrowed by a dependency.
    ExcludedNarrowed {
        /// Channels removed from the layer.
        removed: usize,
    },
}

/// Non-fatal observation made while resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskConflictWarning {
    /// Affected layer.
    pub layer: String,
    /// What happened to it.
    pub kind: ConflictKind,
}

impl fmt::Display for MaskConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConflictKind::FullyPruned => {
                write!(f, "layer '{}' has every output channel pruned", self.layer)
            }
            ConflictKind::InputNarrowed { removed } => {
                write!(f, "graph input '{}' loses {removed} channel(s)", self.layer)
            }
            ConflictKind::OutputNarrowed { removed } => {
                write!(f, "graph output '{}' loses {removed} channel(s)", self.layer)
            }
            ConflictKind::ExcludedNarrowed { removed } => write!(
                f,
                "excluded layer '{}' loses {removed} channel(s) through a dependency",
                self.layer
            ),
        }
    }
}

/// Result of resolving a mask set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Mutually consistent masks for every layer.
    pub masks: MaskSet,
    /// Warnings in graph order.
    pub warnings: Vec<MaskConflictWarning>,
    /// Layer visits the worklist needed.
    pub visits: usize,
}

/// Worklist fixed-point solver over a graph's dependency edges.
#[derive(Debug)]
pub struct ConflictResolver<'g> {
    graph: &'g Graph,
    incoming: Vec<Vec<DependencyEdge>>,
}

impl<'g> ConflictResolver<'g> {
    /// Derive the dependency edges of `graph`.
    #[must_use]
    pub fn new(graph: &'g Graph) -> Self {
        let mut incoming = vec![Vec::new(); graph.len()];
        for edge in graph.dependency_edges() {
            incoming[edge.consumer.index()].push(edge);
        }
        Self { graph, incoming }
    }

    /// Install allocated output masks on a dense set and resolve it.
    pub fn resolve_outputs(&self, outputs: &BTreeMap<String, ChannelMask>) -> Result<Resolution> {
        self.resolve(MaskSet::from_output_masks(self.graph, outputs)?)
    }

    /// Resolve `masks` in place to a fixed point.
    ///
    /// # Errors
    /// `ShapeMismatch` or `InvalidMask` if `masks` does not fit the graph.
    pub fn resolve(&self, mut masks: MaskSet) -> Result<Resolution> {
        masks.validate(self.graph)?;

        let n = self.graph.len();
        let mut queue: VecDeque<usize> = (0..n).collect();
        let mut queued = vec![true; n];
        let mut visits = 0usize;

        while let Some(i) = queue.pop_front() {
            queued[i] = false;
            visits += 1;
            for touched in self.visit(i, &mut masks) {
                if !queued[touched] {
                    queued[touched] = true;
                    queue.push_back(touched);
                }
            }
        }

        debug!(layers = n, visits, "resolved masks");
        let warnings = self.warnings(&masks);
        for w in &warnings {
            warn!(layer = %w.layer, "{w}");
        }
        Ok(Resolution {
            masks,
            warnings,
            visits,
        })
    }

    /// Apply every constraint touching layer `i`; returns layers to revisit.
    fn visit(&self, i: usize, masks: &mut MaskSet) -> Vec<usize> {
        let id = LayerId(i);
        let edges = &self.incoming[i];

        // producer -> consumer
        for edge in edges {
            let produced = masks.get(edge.producer).output.clone();
            masks.get_mut(id).inputs[edge.port].absorb_zeros(&produced);
        }

        let out_changed = apply_rule(self.graph.layer(id).op(), edges, masks.get_mut(id));

        let mut touched = Vec::new();
        if out_changed {
            touched.extend(self.graph.consumers(id).iter().map(|(c, _)| c.index()));
        }

        // consumer -> producer
        for edge in edges {
            let consumed = masks.get(id).inputs[edge.port].clone();
            if masks.get_mut(edge.producer).output.absorb_zeros(&consumed) {
                touched.push(edge.producer.index());
                // `i` itself only needs another pass if it reads this
                // producer on a port other than the one just absorbed.
                touched.extend(
                    self.graph
                        .consumers(edge.producer)
                        .iter()
                        .filter(|&&(c, port)| c.index() != i || port != edge.port)
                        .map(|(c, _)| c.index()),
                );
            }
        }
        touched
    }

    fn warnings(&self, masks: &MaskSet) -> Vec<MaskConflictWarning> {
        let mut warnings = Vec::new();
        for (i, layer) in self.graph.layers().iter().enumerate() {
            let output = &masks.get(LayerId(i)).output;
            let kind = match layer.op() {
                _ if output.is_fully_pruned() => Some(ConflictKind::FullyPruned),
                Op::Input if !output.is_dense() => Some(ConflictKind::InputNarrowed {
                    removed: output.num_zeros(),
                }),
                Op::Output if !output.is_dense() => Some(ConflictKind::OutputNarrowed {
                    removed: output.num_zeros(),
                }),
                _ => None,
            };
            if let Some(kind) = kind {
                warnings.push(MaskConflictWarning {
                    layer: layer.name().to_string(),
                    kind,
                });
            }
        }
        warnings
    }
}

/// Apply the op's internal channel rule. Returns whether the output changed.
fn apply_rule(op: &Op, edges: &[DependencyEdge], m: &mut LayerMasks) -> bool {
    match op.channel_rule() {
        ChannelRule::Independent => false,
        ChannelRule::Tied => {
            let mut union = m.output.clone();
            for input in &m.inputs {
                union.absorb_zeros(input);
            }
            for input in &mut m.inputs {
                input.absorb_zeros(&union);
            }
            m.output.absorb_zeros(&union)
        }
        ChannelRule::Concat => {
            let mut changed = false;
            let mut offset = 0;
            for input in &mut m.inputs {
                for j in 0..input.len() {
                    if !input.is_kept(j) {
                        changed |= m.output.zero(offset + j);
                    } else if !m.output.is_kept(offset + j) {
                        input.zero(j);
                    }
                }
                offset += input.len();
            }
            changed
        }
        ChannelRule::Flatten => {
            let spatial = match edges.first().map(|e| e.kind) {
                Some(EdgeKind::Flatten { spatial }) => spatial,
                _ => return false,
            };
            let mut changed = false;
            let input = &mut m.inputs[0];
            for c in 0..input.len() {
                let block = c * spatial..(c + 1) * spatial;
                let dead = !input.is_kept(c) || block.clone().any(|j| !m.output.is_kept(j));
                if dead {
                    input.zero(c);
                    for j in block {
                        changed |= m.output.zero(j);
                    }
                }
            }
            changed
        }
    }
}
