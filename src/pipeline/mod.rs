//! Pruning rounds: score, allocate, resolve, rewrite.
//!
//! A round borrows the graph immutably and returns a new, smaller graph.
//! Configuration problems stop the round before any weight is scored, and
//! nothing is rewritten unless the whole mask set resolved.

mod report;

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, info_span, warn};

pub use report::{LayerWidth, PruningReport};

use crate::allocate::{Allocation, MaskAllocator};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::graph::Graph;
use crate::importance::{score_layers, Importance};
use crate::mask::{LayerMasks, MaskSet};
use crate::resolve::{ConflictKind, ConflictResolver, MaskConflictWarning};
use crate::rewrite::{ChannelRemap, GraphRewriter};

/// Everything a round produces.
#[derive(Debug, Clone)]
pub struct PruningOutcome {
    /// The rewritten graph.
    pub graph: Graph,
    /// Resolved masks of every original layer, by name.
    pub masks: BTreeMap<String, LayerMasks>,
    /// Output masks as allocated, before resolution.
    pub allocation: Allocation,
    /// Index maps for transplanting external state.
    pub remap: ChannelRemap,
    /// Non-fatal observations from resolution.
    pub warnings: Vec<MaskConflictWarning>,
    /// Size before and after.
    pub report: PruningReport,
}

/// Runs pruning rounds with a fixed configuration.
pub struct PruningPipeline {
    config: PipelineConfig,
    importance: Box<dyn Importance>,
}

impl fmt::Debug for PruningPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PruningPipeline")
            .field("config", &self.config)
            .field("importance", &self.importance.name())
            .finish()
    }
}

impl PruningPipeline {
    /// Validate `config` and build its scorer.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let importance = config.importance.build();
        Ok(Self { config, importance })
    }

    /// Replace the configured scorer with a custom one.
    #[must_use]
    pub fn with_importance(mut self, importance: Box<dyn Importance>) -> Self {
        self.importance = importance;
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one round on `graph`.
    ///
    /// # Errors
    /// `Configuration` if the rules do not fit the graph, `NoParameters` or
    /// `NumericalInstability` from scoring, `ShapeMismatch` if masks cannot
    /// be applied.
    pub fn run_round(&self, graph: &Graph) -> Result<PruningOutcome> {
        let _span = info_span!("pruning_round", layers = graph.len()).entered();

        let allocator = MaskAllocator::new().with_normalization(self.config.normalization);
        let plan = allocator.plan(graph, &self.config.rules)?;

        let layers = plan.layers(graph);
        let scores = score_layers(self.importance.as_ref(), &layers)?;
        debug!(layers = layers.len(), method = self.importance.name(), "scored layers");

        let allocation = allocator.allocate(graph, &plan, &scores)?;
        let mut resolution = ConflictResolver::new(graph).resolve_outputs(&allocation.masks)?;
        resolution
            .warnings
            .extend(excluded_narrowed(graph, &allocation, &resolution.masks));
        let rewrite = GraphRewriter::new(graph).rewrite(&resolution.masks)?;

        let report = PruningReport::new(graph, &rewrite.graph);
        info!(
            params_before = report.params_before,
            params_after = report.params_after,
            flops_before = report.flops_before,
            flops_after = report.flops_after,
            warnings = resolution.warnings.len(),
            "pruning round complete"
        );

        Ok(PruningOutcome {
            masks: resolution.masks.to_named(graph),
            graph: rewrite.graph,
            allocation,
            remap: rewrite.remap,
            warnings: resolution.warnings,
            report,
        })
    }

    /// Run `rounds` rounds, feeding each rewritten graph into the next.
    ///
    /// Stops at the first failing round.
    pub fn run_iterative(&self, graph: &Graph, rounds: usize) -> Result<Vec<PruningOutcome>> {
        let mut outcomes: Vec<PruningOutcome> = Vec::with_capacity(rounds);
        for round in 0..rounds {
            let current = outcomes.last().map_or(graph, |o| &o.graph);
            debug!(round, "starting iterative round");
            let outcome = self.run_round(current)?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Excluded layers that coupling forced to lose channels.
///
/// Exclusion keeps the allocated mask all-ones; it does not pin the
/// resolved mask, which a residual partner can still narrow.
fn excluded_narrowed(
    graph: &Graph,
    allocation: &Allocation,
    masks: &MaskSet,
) -> Vec<MaskConflictWarning> {
    let mut warnings = Vec::new();
    for name in &allocation.excluded {
        let Some(id) = graph.id_of(name) else {
            continue;
        };
        let output = &masks.get(id).output;
        if !output.is_dense() {
            let w = MaskConflictWarning {
                layer: name.clone(),
                kind: ConflictKind::ExcludedNarrowed {
                    removed: output.num_zeros(),
                },
            };
            warn!(layer = %w.layer, "{w}");
            warnings.push(w);
        }
    }
    warnings
}
