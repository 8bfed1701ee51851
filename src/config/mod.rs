//! Pruning configuration.
//!
//! A [`SparsityConfig`] is an ordered rule list in the same shape the
//! training framework's compression configs use:
//!
//! ```json
//! [
//!   { "sparsity_per_layer": 0.5, "op_types": ["Conv2d"] },
//!   { "exclude": true, "op_names": ["fc3"] }
//! ]
//! ```
//!
//! Rules are applied in order. A later inclusion rule overrides an
//! earlier one for the same layer; an exclusion always wins.

mod rule;

pub use rule::{SparsityRule, SparsityTarget};

use serde::{Deserialize, Serialize};

use crate::error::{PruningError, Result};
use crate::importance::{ImportanceStrategy, ScoreNormalization};

/// Ordered list of sparsity rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparsityConfig {
    rules: Vec<SparsityRule>,
}

impl SparsityConfig {
    /// Empty configuration (prunes nothing).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: SparsityRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Build from a rule list.
    #[must_use]
    pub fn from_rules(rules: Vec<SparsityRule>) -> Self {
        Self { rules }
    }

    /// Parse a JSON rule list.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialise to a JSON rule list.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rules in application order.
    #[must_use]
    pub fn rules(&self) -> &[SparsityRule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Graph-independent validation of every rule.
    pub fn validate(&self) -> Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            rule.validate(i)?;
        }
        Ok(())
    }
}

/// Everything one pruning round needs besides the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sparsity rules.
    pub rules: SparsityConfig,
    /// Scoring method.
    #[serde(default)]
    pub importance: ImportanceStrategy,
    /// Cross-layer score normalization for total-sparsity groups.
    #[serde(default)]
    pub normalization: ScoreNormalization,
}

impl PipelineConfig {
    /// Config with the given rules and default scoring.
    #[must_use]
    pub fn new(rules: SparsityConfig) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Set the scoring method.
    #[must_use]
    pub fn with_importance(mut self, importance: ImportanceStrategy) -> Self {
        self.importance = importance;
        self
    }

    /// Set the normalization policy.
    #[must_use]
    pub fn with_normalization(mut self, normalization: ScoreNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Validate the rule list.
    pub fn validate(&self) -> Result<()> {
        self.rules.validate()
    }
}

impl From<SparsityConfig> for PipelineConfig {
    fn from(rules: SparsityConfig) -> Self {
        Self::new(rules)
    }
}

pub(crate) fn check_ratio(rule: usize, key: &str, ratio: f32) -> Result<()> {
    if !(0.0..1.0).contains(&ratio) {
        return Err(PruningError::config(
            rule,
            format!("{key} = {ratio} must be in [0, 1)"),
        ));
    }
    Ok(())
}
