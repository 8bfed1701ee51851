//! Filter pruning via geometric median (He et al., 2019).
//!
//! A filter close to every other filter is replaceable by them, so the
//! score of unit i is Σ_j ‖w_i − w_j‖₂.

use super::{checked_weight, Importance, ImportanceScores};
use crate::error::Result;
use crate::graph::Layer;

/// Geometric-median importance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometricMedianImportance;

impl GeometricMedianImportance {
    /// Create the scorer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Importance for GeometricMedianImportance {
    fn score(&self, layer: &Layer) -> Result<ImportanceScores> {
        let weight = checked_weight(layer, self.name())?;
        let units = weight.units();
        let per_unit = units.first().map_or(0, |u| u.len());
        let values = units
            .iter()
            .map(|a| {
                units
                    .iter()
                    .map(|b| {
                        a.iter()
                            .zip(b.iter())
                            .map(|(x, y)| (x - y) * (x - y))
                            .sum::<f32>()
                            .sqrt()
                    })
                    .sum()
            })
            .collect();
        ImportanceScores::new(values, per_unit, self.name())
    }

    fn name(&self) -> &'static str {
        "fpgm"
    }
}
