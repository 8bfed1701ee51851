//! Index maps from original to rewritten tensors.

use std::collections::BTreeMap;

use crate::error::{PruningError, Result};
use crate::graph::{Graph, LayerId, Op};
use crate::mask::MaskSet;
use crate::tensor::Tensor;

/// Surviving indices of one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRemap {
    /// Kept output units, ascending.
    pub output: Vec<usize>,
    /// Output extent before the rewrite.
    pub output_len: usize,
    /// Kept input channels per port, ascending.
    pub inputs: Vec<Vec<usize>>,
    /// Input extents before the rewrite.
    pub input_lens: Vec<usize>,
    /// Whether parameters also shrink along dimension 1 (dense conv, linear).
    pub gathers_input: bool,
}

impl LayerRemap {
    /// Whether nothing was removed.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.output.len() == self.output_len
            && self
                .inputs
                .iter()
                .zip(&self.input_lens)
                .all(|(kept, &n)| kept.len() == n)
    }
}

/// Transplants tensors shaped like an original layer's parameters into
/// the rewritten layer's shape.
///
/// Callers use this for state the graph does not own, such as optimizer
/// moments or gradient accumulators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRemap {
    layers: BTreeMap<String, LayerRemap>,
}

impl ChannelRemap {
    /// Build from resolved masks.
    #[must_use]
    pub fn from_masks(graph: &Graph, masks: &MaskSet) -> Self {
        let layers = graph
            .layers()
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let m = masks.get(LayerId(i));
                let gathers_input = match layer.op() {
                    Op::Conv2d(c) => !c.is_depthwise(),
                    Op::Linear(_) => true,
                    _ => false,
                };
                let remap = LayerRemap {
                    output: m.output.kept_indices(),
                    output_len: m.output.len(),
                    inputs: m.inputs.iter().map(|mask| mask.kept_indices()).collect(),
                    input_lens: m.inputs.iter().map(|mask| mask.len()).collect(),
                    gathers_input,
                };
                (layer.name().to_string(), remap)
            })
            .collect();
        Self { layers }
    }

    /// Index map of `layer`.
    #[must_use]
    pub fn get(&self, layer: &str) -> Option<&LayerRemap> {
        self.layers.get(layer)
    }

    /// Iterate `(layer name, remap)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LayerRemap)> {
        self.layers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Gather `tensor` (shaped like a parameter of `layer`) to the
    /// surviving indices.
    ///
    /// Dimension 0 follows the output mask. Dimension 1 of rank-2+
    /// tensors follows the input mask for dense convs and linear layers.
    ///
    /// # Errors
    /// `InvalidMask` for an unknown layer, `ShapeMismatch` if the tensor
    /// does not have the layer's original extents.
    pub fn transplant(&self, layer: &str, tensor: &Tensor) -> Result<Tensor> {
        let remap = self.get(layer).ok_or_else(|| PruningError::InvalidMask {
            reason: format!("no channel remap for layer '{layer}'"),
        })?;
        if tensor.ndim() == 0 || tensor.dim(0) != remap.output_len {
            return Err(PruningError::ShapeMismatch {
                context: format!("transplant into '{layer}' (dim 0)"),
                expected: vec![remap.output_len],
                got: tensor.shape().to_vec(),
            });
        }
        let gathered = tensor.index_select(0, &remap.output)?;
        if !remap.gathers_input || tensor.ndim() < 2 {
            return Ok(gathered);
        }
        let (kept, &len) = match (remap.inputs.first(), remap.input_lens.first()) {
            (Some(kept), Some(len)) => (kept, len),
            _ => return Ok(gathered),
        };
        if tensor.dim(1) != len {
            return Err(PruningError::ShapeMismatch {
                context: format!("transplant into '{layer}' (dim 1)"),
                expected: vec![len],
                got: tensor.shape().to_vec(),
            });
        }
        gathered.index_select(1, kept)
    }
}
