//! Magnitude-based importance (Li et al., 2017).

use super::{checked_weight, Importance, ImportanceScores};
use crate::error::Result;
use crate::graph::Layer;

/// Norm applied to each unit's weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormType {
    /// Σ |w|
    L1,
    /// sqrt(Σ w²)
    L2,
}

/// Unit importance as the norm of its weights.
///
/// For conv filters the unit is the whole `(in, kh, kw)` block; for
/// linear layers a weight row; for batch norm the |γ| of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagnitudeImportance {
    norm: NormType,
}

impl MagnitudeImportance {
    /// Create with an explicit norm.
    #[must_use]
    pub fn new(norm: NormType) -> Self {
        Self { norm }
    }

    /// L1 magnitude.
    #[must_use]
    pub fn l1() -> Self {
        Self::new(NormType::L1)
    }

    /// L2 magnitude.
    #[must_use]
    pub fn l2() -> Self {
        Self::new(NormType::L2)
    }

    /// Norm in use.
    #[must_use]
    pub fn norm(&self) -> NormType {
        self.norm
    }
}

impl Default for MagnitudeImportance {
    fn default() -> Self {
        Self::l1()
    }
}

impl Importance for MagnitudeImportance {
    fn score(&self, layer: &Layer) -> Result<ImportanceScores> {
        let weight = checked_weight(layer, self.name())?;
        let units = weight.units();
        let per_unit = units.first().map_or(0, |u| u.len());
        let values = units
            .iter()
            .map(|unit| match self.norm {
                NormType::L1 => unit.iter().map(|w| w.abs()).sum(),
                NormType::L2 => unit.iter().map(|w| w * w).sum::<f32>().sqrt(),
            })
            .collect();
        ImportanceScores::new(values, per_unit, self.name())
    }

    fn name(&self) -> &'static str {
        match self.norm {
            NormType::L1 => "l1_norm",
            NormType::L2 => "l2_norm",
        }
    }
}
