//! One entry of a sparsity configuration.

use serde::{Deserialize, Serialize};

use super::check_ratio;
use crate::error::{PruningError, Result};
use crate::graph::{Layer, OpType};

/// Resolved sparsity target of an inclusion rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SparsityTarget {
    /// Each selected layer independently loses this fraction of units.
    PerLayer(f32),
    /// The selected layers jointly lose this fraction of their units.
    Total(f32),
}

impl SparsityTarget {
    /// The ratio regardless of mode.
    #[must_use]
    pub fn ratio(&self) -> f32 {
        match self {
            SparsityTarget::PerLayer(r) | SparsityTarget::Total(r) => *r,
        }
    }
}

/// Selection predicate plus either a sparsity target or an exclusion.
///
/// A layer is selected when it matches every non-empty predicate list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SparsityRule {
    /// Operation types to select.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub op_types: Vec<OpType>,
    /// Layer names to select.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub op_names: Vec<String>,
    /// Keep matched layers dense, overriding every other rule.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclude: bool,
    /// Per-layer ratio.
    #[serde(default, alias = "sparsity", skip_serializing_if = "Option::is_none")]
    pub sparsity_per_layer: Option<f32>,
    /// Group-total ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_sparsity: Option<f32>,
}

impl SparsityRule {
    /// Rule pruning each selected layer by `ratio`.
    #[must_use]
    pub fn per_layer(ratio: f32) -> Self {
        Self {
            sparsity_per_layer: Some(ratio),
            ..Self::default()
        }
    }

    /// Rule pruning the selected group by `ratio` overall.
    #[must_use]
    pub fn total(ratio: f32) -> Self {
        Self {
            total_sparsity: Some(ratio),
            ..Self::default()
        }
    }

    /// Exclusion rule.
    #[must_use]
    pub fn exclude() -> Self {
        Self {
            exclude: true,
            ..Self::default()
        }
    }

    /// Restrict to operation types.
    #[must_use]
    pub fn op_types(mut self, types: impl IntoIterator<Item = OpType>) -> Self {
        self.op_types = types.into_iter().collect();
        self
    }

    /// Restrict to layer names.
    #[must_use]
    pub fn op_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.op_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `layer` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, layer: &Layer) -> bool {
        (self.op_types.is_empty() || self.op_types.contains(&layer.op_type()))
            && (self.op_names.is_empty() || self.op_names.iter().any(|n| n == layer.name()))
    }

    /// The sparsity target, `None` for exclusion rules.
    ///
    /// `index` is the rule's position, used in error messages.
    pub fn target(&self, index: usize) -> Result<Option<SparsityTarget>> {
        match (self.exclude, self.sparsity_per_layer, self.total_sparsity) {
            (true, None, None) => Ok(None),
            (true, _, _) => Err(PruningError::config(
                index,
                "an exclude rule cannot also set a sparsity target",
            )),
            (false, Some(r), None) => {
                check_ratio(index, "sparsity_per_layer", r)?;
                Ok(Some(SparsityTarget::PerLayer(r)))
            }
            (false, None, Some(r)) => {
                check_ratio(index, "total_sparsity", r)?;
                Ok(Some(SparsityTarget::Total(r)))
            }
            (false, Some(_), Some(_)) => Err(PruningError::config(
                index,
                "set either sparsity_per_layer or total_sparsity, not both",
            )),
            (false, None, None) => Err(PruningError::config(
                index,
                "rule has no sparsity target and is not an exclusion",
            )),
        }
    }

    /// Graph-independent checks.
    pub fn validate(&self, index: usize) -> Result<()> {
        if self.op_types.is_empty() && self.op_names.is_empty() {
            return Err(PruningError::config(
                index,
                "rule selects nothing: set op_types and/or op_names",
            ));
        }
        self.target(index).map(|_| ())
    }
}
