//! Before/after structure of one pruning round.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::Graph;

/// Output width of one layer across a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerWidth {
    /// Units before the rewrite.
    pub before: usize,
    /// Units after the rewrite.
    pub after: usize,
}

impl LayerWidth {
    /// Fraction of units removed.
    #[must_use]
    pub fn sparsity(&self) -> f32 {
        if self.before == 0 {
            0.0
        } else {
            1.0 - self.after as f32 / self.before as f32
        }
    }
}

/// Size of a network before and after a pruning round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningReport {
    /// Learnable parameters before.
    pub params_before: usize,
    /// Learnable parameters after.
    pub params_after: usize,
    /// Multiply-accumulates per sample before.
    pub flops_before: usize,
    /// Multiply-accumulates per sample after.
    pub flops_after: usize,
    /// Output width of every prunable layer.
    pub layer_widths: BTreeMap<String, LayerWidth>,
    /// Estimated memory savings in bytes (assumes FP32).
    pub memory_savings_bytes: usize,
}

impl PruningReport {
    /// Compare `after` against `before`, matching layers by name.
    #[must_use]
    pub fn new(before: &Graph, after: &Graph) -> Self {
        let params_before = before.num_parameters();
        let params_after = after.num_parameters();
        let layer_widths = before
            .prunable_layers()
            .map(|layer| {
                let width = LayerWidth {
                    before: layer.out_channels(),
                    after: after.get(layer.name()).map_or(0, |l| l.out_channels()),
                };
                (layer.name().to_string(), width)
            })
            .collect();
        Self {
            params_before,
            params_after,
            flops_before: before.flops(),
            flops_after: after.flops(),
            layer_widths,
            memory_savings_bytes: params_before.saturating_sub(params_after) * 4,
        }
    }

    /// Parameters removed.
    #[must_use]
    pub fn parameters_pruned(&self) -> usize {
        self.params_before.saturating_sub(self.params_after)
    }

    /// Fraction of parameters removed.
    #[must_use]
    pub fn achieved_sparsity(&self) -> f32 {
        if self.params_before == 0 {
            0.0
        } else {
            self.parameters_pruned() as f32 / self.params_before as f32
        }
    }

    /// Original size over pruned size.
    #[must_use]
    pub fn compression_ratio(&self) -> f32 {
        if self.params_after == 0 {
            return f32::INFINITY;
        }
        self.params_before as f32 / self.params_after as f32
    }

    /// Fraction of FLOPs removed.
    #[must_use]
    pub fn flops_reduction(&self) -> f32 {
        if self.flops_before == 0 {
            0.0
        } else {
            1.0 - self.flops_after as f32 / self.flops_before as f32
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for PruningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "params {} -> {} ({:.2}x), flops {} -> {}",
            self.params_before,
            self.params_after,
            self.compression_ratio(),
            self.flops_before,
            self.flops_after
        )?;
        for (name, w) in &self.layer_widths {
            writeln!(f, "  {name:<16} {:>5} -> {:<5}", w.before, w.after)?;
        }
        Ok(())
    }
}
