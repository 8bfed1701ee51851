//! Mask allocation: scores plus sparsity rules to per-layer output masks.
//!
//! Allocation is split in two so that every configuration error surfaces
//! before any weight is scored:
//!
//! 1. [`MaskAllocator::plan`] resolves the rule list against the graph.
//! 2. [`MaskAllocator::allocate`] turns the planned layers' scores into masks.
//!
//! # Tie-break
//! Units are ranked by score ascending; equal scores prune the higher
//! index first, so the lower index is retained. In a total-sparsity group
//! units are ordered by graph position, then by index within the layer.
//!
//! # Toyota Way: Jidoka
//! A rule that selects nothing, or selects a layer that cannot be pruned,
//! stops the round instead of being silently ignored.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::{SparsityConfig, SparsityRule, SparsityTarget};
use crate::error::{PruningError, Result};
use crate::graph::{Graph, Layer, LayerId, PrunableDim};
use crate::importance::{score_layers, Importance, ImportanceScores, ScoreNormalization};
use crate::mask::ChannelMask;

/// One selected layer and the rule that decided its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanEntry {
    /// Selected layer.
    pub layer: LayerId,
    /// Index of the deciding rule.
    pub rule: usize,
    /// Target taken from that rule.
    pub target: SparsityTarget,
    /// Dimension the layer is pruned along.
    pub dim: PrunableDim,
}

/// The rule list resolved against one graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationPlan {
    entries: Vec<PlanEntry>,
    excluded: Vec<LayerId>,
}

impl AllocationPlan {
    /// Selected layers in graph order.
    #[must_use]
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Layers kept dense by an exclusion rule.
    #[must_use]
    pub fn excluded(&self) -> &[LayerId] {
        &self.excluded
    }

    /// Selected layers, in the order scores must be supplied.
    #[must_use]
    pub fn layers<'g>(&self, graph: &'g Graph) -> Vec<&'g Layer> {
        self.entries.iter().map(|e| graph.layer(e.layer)).collect()
    }
}

/// Output masks for the selected layers.
///
/// Excluded layers have no entry in `masks`, so their allocated mask is
/// all-ones. Resolution may still narrow them through a tied junction;
/// the pipeline reports that as `ExcludedNarrowed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Output mask per selected layer name.
    pub masks: BTreeMap<String, ChannelMask>,
    /// Names of excluded layers.
    pub excluded: BTreeSet<String>,
}

impl Allocation {
    /// Mask allocated to `layer`, if any.
    #[must_use]
    pub fn get(&self, layer: &str) -> Option<&ChannelMask> {
        self.masks.get(layer)
    }

    /// Whether `layer` was excluded.
    #[must_use]
    pub fn is_excluded(&self, layer: &str) -> bool {
        self.excluded.contains(layer)
    }

    /// Total units dropped across all masks.
    #[must_use]
    pub fn num_zeros(&self) -> usize {
        self.masks.values().map(ChannelMask::num_zeros).sum()
    }
}

/// Allocates binary output masks from importance scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskAllocator {
    normalization: ScoreNormalization,
}

impl MaskAllocator {
    /// Allocator with the default normalization.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how total-sparsity groups compare scores across layers.
    #[must_use]
    pub fn with_normalization(mut self, normalization: ScoreNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Normalization in use.
    #[must_use]
    pub fn normalization(&self) -> ScoreNormalization {
        self.normalization
    }

    /// Resolve `config` against `graph`.
    ///
    /// # Errors
    /// `Configuration` naming the rule when it is malformed, references an
    /// op type or name with no layer, selects a layer with no prunable
    /// dimension, or groups incomparable layers under a raw total.
    pub fn plan(&self, graph: &Graph, config: &SparsityConfig) -> Result<AllocationPlan> {
        config.validate()?;

        let mut assigned: Vec<Option<(usize, SparsityTarget)>> = vec![None; graph.len()];
        let mut excluded = vec![false; graph.len()];

        for (i, rule) in config.rules().iter().enumerate() {
            check_references(graph, i, rule)?;
            let target = rule.target(i)?;
            let mut matched = 0usize;
            for (id, layer) in graph.layers().iter().enumerate() {
                if !rule.matches(layer) {
                    continue;
                }
                matched += 1;
                match target {
                    None => excluded[id] = true,
                    Some(t) => assigned[id] = Some((i, t)),
                }
            }
            if matched == 0 {
                return Err(PruningError::config(
                    i,
                    "op_types and op_names together match no layer",
                ));
            }
        }

        let mut plan = AllocationPlan::default();
        for (id, slot) in assigned.into_iter().enumerate() {
            let layer_id = LayerId(id);
            if excluded[id] {
                plan.excluded.push(layer_id);
                continue;
            }
            let Some((rule, target)) = slot else {
                continue;
            };
            let layer = graph.layer(layer_id);
            let dim = layer.op().prunable_dim().ok_or_else(|| {
                PruningError::config(
                    rule,
                    format!(
                        "selects layer '{}' of type {}, which has no prunable dimension",
                        layer.name(),
                        layer.op_type()
                    ),
                )
            })?;
            plan.entries.push(PlanEntry {
                layer: layer_id,
                rule,
                target,
                dim,
            });
        }

        if self.normalization == ScoreNormalization::Raw {
            for group in total_groups(&plan.entries).values() {
                let first = plan.entries[group[0]].dim;
                if let Some(&odd) = group.iter().find(|&&e| plan.entries[e].dim != first) {
                    let entry = plan.entries[odd];
                    return Err(PruningError::config(
                        entry.rule,
                        format!(
                            "total_sparsity with raw scores mixes {:?} and {:?} (layer '{}')",
                            first,
                            entry.dim,
                            graph.layer(entry.layer).name()
                        ),
                    ));
                }
            }
        }

        debug!(
            selected = plan.entries.len(),
            excluded = plan.excluded.len(),
            "planned mask allocation"
        );
        Ok(plan)
    }

    /// Allocate masks from scores given in [`AllocationPlan::layers`] order.
    pub fn allocate(
        &self,
        graph: &Graph,
        plan: &AllocationPlan,
        scores: &[ImportanceScores],
    ) -> Result<Allocation> {
        if scores.len() != plan.entries.len() {
            return Err(PruningError::ShapeMismatch {
                context: "scores per planned layer".to_string(),
                expected: vec![plan.entries.len()],
                got: vec![scores.len()],
            });
        }
        for (entry, s) in plan.entries.iter().zip(scores) {
            let layer = graph.layer(entry.layer);
            if s.len() != layer.out_channels() {
                return Err(PruningError::ShapeMismatch {
                    context: format!("scores for '{}'", layer.name()),
                    expected: vec![layer.out_channels()],
                    got: vec![s.len()],
                });
            }
        }

        let mut masks: Vec<Option<ChannelMask>> = vec![None; plan.entries.len()];

        for (e, entry) in plan.entries.iter().enumerate() {
            if let SparsityTarget::PerLayer(ratio) = entry.target {
                let values = &scores[e].values;
                let n_prune = prune_count(ratio, values.len());
                let mut mask = ChannelMask::ones(values.len());
                for i in lowest_ranked(values, n_prune) {
                    mask.zero(i);
                }
                masks[e] = Some(mask);
            }
        }

        for (rule, group) in total_groups(&plan.entries) {
            let ratio = plan.entries[group[0]].target.ratio();
            // (score, position in group, unit)
            let mut units: Vec<(f32, usize, usize)> = Vec::new();
            for (pos, &e) in group.iter().enumerate() {
                let normalized = scores[e].normalized(self.normalization);
                units.extend(normalized.into_iter().enumerate().map(|(i, v)| (v, pos, i)));
            }
            let n_prune = prune_count(ratio, units.len());
            units.sort_by(|a, b| a.0.total_cmp(&b.0).then((b.1, b.2).cmp(&(a.1, a.2))));

            let mut group_masks: Vec<ChannelMask> = group
                .iter()
                .map(|&e| ChannelMask::ones(scores[e].len()))
                .collect();
            for &(_, pos, unit) in units.iter().take(n_prune) {
                group_masks[pos].zero(unit);
            }
            debug!(rule, layers = group.len(), pruned = n_prune, "allocated total group");
            for (&e, mask) in group.iter().zip(group_masks) {
                masks[e] = Some(mask);
            }
        }

        let mut allocation = Allocation::default();
        for (entry, mask) in plan.entries.iter().zip(masks) {
            let name = graph.layer(entry.layer).name().to_string();
            let mask = mask.unwrap_or_else(|| ChannelMask::ones(graph.layer(entry.layer).out_channels()));
            debug!(
                layer = %name,
                rule = entry.rule,
                pruned = mask.num_zeros(),
                total = mask.len(),
                "allocated mask"
            );
            allocation.masks.insert(name, mask);
        }
        allocation.excluded = plan
            .excluded
            .iter()
            .map(|&id| graph.layer(id).name().to_string())
            .collect();
        Ok(allocation)
    }

    /// Plan, score the planned layers with `importance`, and allocate.
    pub fn allocate_graph(
        &self,
        graph: &Graph,
        config: &SparsityConfig,
        importance: &dyn Importance,
    ) -> Result<Allocation> {
        let plan = self.plan(graph, config)?;
        let scores = score_layers(importance, &plan.layers(graph))?;
        self.allocate(graph, &plan, &scores)
    }
}

/// Each listed op type and op name must exist somewhere in the graph.
fn check_references(graph: &Graph, index: usize, rule: &SparsityRule) -> Result<()> {
    for op_type in &rule.op_types {
        if graph.layers_of_type(*op_type).next().is_none() {
            return Err(PruningError::config(
                index,
                format!("op_types entry '{op_type}' matches no layer"),
            ));
        }
    }
    for name in &rule.op_names {
        if graph.id_of(name).is_none() {
            return Err(PruningError::config(
                index,
                format!("op_names entry '{name}' matches no layer"),
            ));
        }
    }
    Ok(())
}

/// Entry indices of total-sparsity targets, grouped by deciding rule.
fn total_groups(entries: &[PlanEntry]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (e, entry) in entries.iter().enumerate() {
        if let SparsityTarget::Total(_) = entry.target {
            groups.entry(entry.rule).or_default().push(e);
        }
    }
    groups
}

/// `round(ratio * n)`, never more than `n`.
fn prune_count(ratio: f32, n: usize) -> usize {
    ((ratio * n as f32).round() as usize).min(n)
}

/// Indices of the `k` lowest scores; on ties the higher index comes first.
fn lowest_ranked(values: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(b.cmp(&a)));
    order.truncate(k);
    order
}
