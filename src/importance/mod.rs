//! Per-unit importance scoring.
//!
//! A scorer maps a prunable layer to one score per output unit (conv
//! filter, linear row, norm channel); higher means more important.
//! Scoring is deterministic and side-effect free.
//!
//! # References
//! - Li, H., et al. (2017). Pruning filters for efficient `ConvNets`. ICLR.
//! - He, Y., et al. (2019). Filter pruning via geometric median. CVPR.

mod fpgm;
mod magnitude;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use fpgm::GeometricMedianImportance;
pub use magnitude::{MagnitudeImportance, NormType};

use crate::error::{PruningError, Result};
use crate::graph::Layer;
use crate::tensor::Tensor;

/// Importance estimator for structured pruning.
///
/// # Object Safety
/// This trait is object-safe and can be used with `dyn Importance`.
pub trait Importance: Send + Sync {
    /// Score every output unit of `layer`.
    ///
    /// # Errors
    /// - `NoParameters` if the layer has no prunable dimension
    /// - `NumericalInstability` if weights or scores are not finite
    fn score(&self, layer: &Layer) -> Result<ImportanceScores>;

    /// Name of this estimator for logging.
    fn name(&self) -> &'static str;
}

/// Summary statistics of a score vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportanceStats {
    /// Minimum score
    pub min: f32,
    /// Maximum score
    pub max: f32,
    /// Mean score
    pub mean: f32,
    /// Population standard deviation
    pub std: f32,
}

impl ImportanceStats {
    /// Compute statistics; all zeros for an empty slice.
    #[must_use]
    pub fn from_values(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std: 0.0,
            };
        }
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        Self {
            min,
            max,
            mean,
            std: var.sqrt(),
        }
    }

    /// Compute statistics over a tensor's elements.
    #[must_use]
    pub fn from_tensor(t: &Tensor) -> Self {
        Self::from_values(t.data())
    }
}

/// Scores for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportanceScores {
    /// One score per output unit.
    pub values: Vec<f32>,
    /// Number of weights feeding each unit.
    pub units_per_score: usize,
    /// Estimator that produced the scores.
    pub method: String,
    /// Summary statistics.
    pub stats: ImportanceStats,
}

impl ImportanceScores {
    /// Wrap raw scores, rejecting non-finite values.
    pub fn new(values: Vec<f32>, units_per_score: usize, method: impl Into<String>) -> Result<Self> {
        let method = method.into();
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(PruningError::NumericalInstability {
                method,
                details: format!("non-finite score {} at unit {pos}", values[pos]),
            });
        }
        let stats = ImportanceStats::from_values(&values);
        Ok(Self {
            values,
            units_per_score,
            method,
            stats,
        })
    }

    /// Number of scored units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no units were scored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Scores rescaled so that different layers can be ranked together.
    #[must_use]
    pub fn normalized(&self, normalization: ScoreNormalization) -> Vec<f32> {
        match normalization {
            ScoreNormalization::Raw => self.values.clone(),
            ScoreNormalization::Mean => {
                let n = self.units_per_score.max(1) as f32;
                self.values.iter().map(|v| v / n).collect()
            }
            ScoreNormalization::Max => {
                let max = self.stats.max;
                if max > 0.0 {
                    self.values.iter().map(|v| v / max).collect()
                } else {
                    vec![0.0; self.values.len()]
                }
            }
        }
    }
}

/// How scores from different layers are made comparable when ranked
/// jointly for a total-sparsity group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreNormalization {
    /// Scores as computed. Only comparable within one prunable dimension.
    Raw,
    /// Score divided by the number of weights feeding the unit.
    #[default]
    Mean,
    /// Score divided by the layer's largest score.
    Max,
}

/// Scoring method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceStrategy {
    /// Sum of absolute weights per unit.
    #[default]
    L1Norm,
    /// Euclidean norm of weights per unit.
    L2Norm,
    /// Distance to the other filters (geometric median).
    Fpgm,
}

impl ImportanceStrategy {
    /// Instantiate the scorer.
    #[must_use]
    pub fn build(self) -> Box<dyn Importance> {
        match self {
            ImportanceStrategy::L1Norm => Box::new(MagnitudeImportance::l1()),
            ImportanceStrategy::L2Norm => Box::new(MagnitudeImportance::l2()),
            ImportanceStrategy::Fpgm => Box::new(GeometricMedianImportance::new()),
        }
    }
}

/// Score several layers, in parallel, returning results in input order.
///
/// On failure the error of the first failing layer in input order is
/// returned, whichever worker finished first.
pub fn score_layers(importance: &dyn Importance, layers: &[&Layer]) -> Result<Vec<ImportanceScores>> {
    let results: Vec<Result<ImportanceScores>> =
        layers.par_iter().map(|layer| importance.score(layer)).collect();
    results.into_iter().collect()
}

/// Prunable weight of `layer` after finiteness checks.
pub(crate) fn checked_weight<'a>(layer: &'a Layer, method: &str) -> Result<&'a Tensor> {
    let weight = layer
        .op()
        .scoring_weight()
        .ok_or_else(|| PruningError::NoParameters {
            layer: layer.name().to_string(),
        })?;
    if !weight.is_finite() {
        return Err(PruningError::NumericalInstability {
            method: method.to_string(),
            details: format!("non-finite weight in '{}'", layer.name()),
        });
    }
    Ok(weight)
}
