//! Structured channel masks.
//!
//! # Toyota Way: Poka-Yoke
//! Masks validate their length against the graph before they are used,
//! and resolution can only add zeros, never remove them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PruningError, Result};
use crate::graph::{Graph, LayerId};
use crate::tensor::Tensor;

/// Keep/drop flags along one dimension (`true` = keep).
///
/// # Invariants
/// - Length equals the extent of the dimension it masks
/// - Zeros only grow while a round resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMask {
    keep: Vec<bool>,
}

impl ChannelMask {
    /// All-ones (dense) mask.
    #[must_use]
    pub fn ones(len: usize) -> Self {
        Self {
            keep: vec![true; len],
        }
    }

    /// Build from explicit keep flags.
    #[must_use]
    pub fn from_keep(keep: Vec<bool>) -> Self {
        Self { keep }
    }

    /// Dense mask of `len` with `zeros` dropped.
    pub fn with_zeros(len: usize, zeros: &[usize]) -> Result<Self> {
        let mut mask = Self::ones(len);
        for &i in zeros {
            if i >= len {
                return Err(PruningError::InvalidMask {
                    reason: format!("zero index {i} out of range for length {len}"),
                });
            }
            mask.keep[i] = false;
        }
        Ok(mask)
    }

    /// Build from a 0/1 tensor of rank 1.
    pub fn from_tensor(t: &Tensor) -> Result<Self> {
        if t.ndim() != 1 {
            return Err(PruningError::InvalidMask {
                reason: format!("channel mask must be rank 1, got shape {:?}", t.shape()),
            });
        }
        let mut keep = Vec::with_capacity(t.numel());
        for &v in t.data() {
            if v.abs() < 1e-6 {
                keep.push(false);
            } else if (v - 1.0).abs() < 1e-6 {
                keep.push(true);
            } else {
                return Err(PruningError::InvalidMask {
                    reason: format!("Mask contains non-binary value: {v}"),
                });
            }
        }
        Ok(Self { keep })
    }

    /// As a 0/1 tensor.
    #[must_use]
    pub fn to_tensor(&self) -> Tensor {
        let data: Vec<f32> = self.keep.iter().map(|&k| if k { 1.0 } else { 0.0 }).collect();
        Tensor::from_slice(&data)
    }

    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keep.len()
    }

    /// Whether the mask covers nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    /// Whether position `i` survives.
    #[must_use]
    pub fn is_kept(&self, i: usize) -> bool {
        self.keep[i]
    }

    /// Flags as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.keep
    }

    /// Count of surviving positions.
    #[must_use]
    pub fn num_kept(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    /// Count of dropped positions.
    #[must_use]
    pub fn num_zeros(&self) -> usize {
        self.len() - self.num_kept()
    }

    /// Fraction dropped (0.0 = dense).
    #[must_use]
    pub fn sparsity(&self) -> f32 {
        if self.keep.is_empty() {
            0.0
        } else {
            self.num_zeros() as f32 / self.len() as f32
        }
    }

    /// Surviving indices in ascending order.
    #[must_use]
    pub fn kept_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.keep[i]).collect()
    }

    /// Dropped indices in ascending order.
    #[must_use]
    pub fn zero_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| !self.keep[i]).collect()
    }

    /// No position dropped.
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.keep.iter().all(|&k| k)
    }

    /// Non-empty and every position dropped.
    #[must_use]
    pub fn is_fully_pruned(&self) -> bool {
        !self.keep.is_empty() && self.keep.iter().all(|&k| !k)
    }

    /// Drop position `i`. Returns whether the mask changed.
    pub fn zero(&mut self, i: usize) -> bool {
        std::mem::replace(&mut self.keep[i], false)
    }

    /// Drop every position `other` drops. Returns whether the mask changed.
    ///
    /// Both masks must have the same length.
    pub fn absorb_zeros(&mut self, other: &ChannelMask) -> bool {
        debug_assert_eq!(self.len(), other.len());
        let mut changed = false;
        for (k, &o) in self.keep.iter_mut().zip(&other.keep) {
            if *k && !o {
                *k = false;
                changed = true;
            }
        }
        changed
    }
}

/// Masks attached to one layer: one per input port, one for the output.
///
/// A dense conv's input masks are distinct from its output mask; a
/// channel-preserving op ends up with identical input and output masks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMasks {
    /// Input-side masks, one per port.
    pub inputs: Vec<ChannelMask>,
    /// Output-side mask.
    pub output: ChannelMask,
}

impl LayerMasks {
    /// Whether every mask is dense.
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.output.is_dense() && self.inputs.iter().all(ChannelMask::is_dense)
    }
}

/// Masks for every layer of a graph, indexed in graph order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSet {
    masks: Vec<LayerMasks>,
}

impl MaskSet {
    /// All-dense masks shaped to `graph`.
    #[must_use]
    pub fn dense(graph: &Graph) -> Self {
        let masks = graph
            .layers()
            .iter()
            .enumerate()
            .map(|(i, layer)| LayerMasks {
                inputs: (0..layer.inputs().len())
                    .map(|p| ChannelMask::ones(graph.input_shape(LayerId(i), p)[0]))
                    .collect(),
                output: ChannelMask::ones(layer.out_channels()),
            })
            .collect();
        Self { masks }
    }

    /// Dense masks with the given output masks installed.
    ///
    /// Fails on unknown layer names or length mismatches.
    pub fn from_output_masks(graph: &Graph, outputs: &BTreeMap<String, ChannelMask>) -> Result<Self> {
        let mut set = Self::dense(graph);
        for (name, mask) in outputs {
            let id = graph.id_of(name).ok_or_else(|| PruningError::InvalidMask {
                reason: format!("mask given for unknown layer '{name}'"),
            })?;
            let expected = graph.layer(id).out_channels();
            if mask.len() != expected {
                return Err(PruningError::ShapeMismatch {
                    context: format!("output mask for '{name}'"),
                    expected: vec![expected],
                    got: vec![mask.len()],
                });
            }
            set.masks[id.0].output = mask.clone();
        }
        Ok(set)
    }

    /// Rebuild a set from a name-keyed map covering every layer.
    pub fn from_named(graph: &Graph, named: &BTreeMap<String, LayerMasks>) -> Result<Self> {
        let mut masks = Vec::with_capacity(graph.len());
        for layer in graph.layers() {
            let m = named.get(layer.name()).ok_or_else(|| PruningError::InvalidMask {
                reason: format!("no masks for layer '{}'", layer.name()),
            })?;
            masks.push(m.clone());
        }
        let set = Self { masks };
        set.validate(graph)?;
        Ok(set)
    }

    /// Check every mask length against the graph.
    pub fn validate(&self, graph: &Graph) -> Result<()> {
        if self.masks.len() != graph.len() {
            return Err(PruningError::ShapeMismatch {
                context: "mask set size".to_string(),
                expected: vec![graph.len()],
                got: vec![self.masks.len()],
            });
        }
        for (i, (layer, m)) in graph.layers().iter().zip(&self.masks).enumerate() {
            if m.output.len() != layer.out_channels() {
                return Err(PruningError::ShapeMismatch {
                    context: format!("output mask for '{}'", layer.name()),
                    expected: vec![layer.out_channels()],
                    got: vec![m.output.len()],
                });
            }
            if m.inputs.len() != layer.inputs().len() {
                return Err(PruningError::InvalidMask {
                    reason: format!(
                        "layer '{}' has {} input port(s) but {} input mask(s)",
                        layer.name(),
                        layer.inputs().len(),
                        m.inputs.len()
                    ),
                });
            }
            for (p, mask) in m.inputs.iter().enumerate() {
                let expected = graph.input_shape(LayerId(i), p)[0];
                if mask.len() != expected {
                    return Err(PruningError::ShapeMismatch {
                        context: format!("mask for '{}' input {p}", layer.name()),
                        expected: vec![expected],
                        got: vec![mask.len()],
                    });
                }
            }
        }
        Ok(())
    }

    /// Masks of one layer.
    #[must_use]
    pub fn get(&self, id: LayerId) -> &LayerMasks {
        &self.masks[id.0]
    }

    /// Mutable masks of one layer.
    pub fn get_mut(&mut self, id: LayerId) -> &mut LayerMasks {
        &mut self.masks[id.0]
    }

    /// Number of layers covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    /// Whether the set covers no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Total mask positions across all layers and ports.
    #[must_use]
    pub fn total_positions(&self) -> usize {
        self.masks
            .iter()
            .map(|m| m.output.len() + m.inputs.iter().map(ChannelMask::len).sum::<usize>())
            .sum()
    }

    /// Name-keyed copy for reporting.
    #[must_use]
    pub fn to_named(&self, graph: &Graph) -> BTreeMap<String, LayerMasks> {
        graph
            .layers()
            .iter()
            .zip(&self.masks)
            .map(|(layer, m)| (layer.name().to_string(), m.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests;
