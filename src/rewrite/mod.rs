//! Physical network shrinking ("speed-up").
//!
//! Given resolved masks, every layer is rebuilt with only its surviving
//! units: conv and linear weights are gathered along dimension 0 by the
//! output mask and along dimension 1 by the input mask, and biases and
//! normalization vectors along dimension 0. Depthwise convolutions shrink
//! their group count with their channels. All other attributes are copied
//! verbatim, and layer names and order are preserved.
//!
//! The new graph is re-traced through [`GraphBuilder`], so its shapes are
//! checked exactly like a freshly traced network.
//!
//! [`apply_masks`] is the shape-preserving alternative: it zeroes the
//! pruned weights in place and leaves every dimension untouched.

mod remap;

use tracing::debug;

pub use remap::{ChannelRemap, LayerRemap};

use crate::error::{PruningError, Result};
use crate::graph::{ChannelRule, Graph, GraphBuilder, Layer, LayerId, Op};
use crate::mask::{ChannelMask, LayerMasks, MaskSet};
use crate::tensor::Tensor;

/// A rewritten graph and the index maps that produced it.
#[derive(Debug, Clone)]
pub struct Rewrite {
    /// The smaller graph.
    pub graph: Graph,
    /// Original-to-new index maps per layer.
    pub remap: ChannelRemap,
}

/// Rebuilds a graph at the shape its resolved masks describe.
#[derive(Debug, Clone, Copy)]
pub struct GraphRewriter<'g> {
    graph: &'g Graph,
}

impl<'g> GraphRewriter<'g> {
    /// Rewriter over `graph`.
    #[must_use]
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// Shrink every layer to its kept units.
    ///
    /// # Errors
    /// `ShapeMismatch` if `masks` is not a resolved, consistent set for
    /// this graph.
    pub fn rewrite(&self, masks: &MaskSet) -> Result<Rewrite> {
        masks.validate(self.graph)?;
        check_consistent(self.graph, masks)?;

        let remap = ChannelRemap::from_masks(self.graph, masks);
        let graph = rebuild(self.graph, |_, layer| {
            let name = layer.name();
            let op = match layer.op() {
                Op::Conv2d(conv) => {
                    let mut conv = conv.clone();
                    let depthwise = conv.is_depthwise();
                    conv.weight = remap.transplant(name, &conv.weight)?;
                    conv.bias = conv
                        .bias
                        .as_ref()
                        .map(|b| remap.transplant(name, b))
                        .transpose()?;
                    if depthwise {
                        conv.groups = conv.weight.dim(0);
                    }
                    Op::Conv2d(conv)
                }
                Op::Linear(linear) => {
                    let mut linear = linear.clone();
                    linear.weight = remap.transplant(name, &linear.weight)?;
                    linear.bias = linear
                        .bias
                        .as_ref()
                        .map(|b| remap.transplant(name, b))
                        .transpose()?;
                    Op::Linear(linear)
                }
                Op::BatchNorm2d(bn) => {
                    let mut bn = bn.clone();
                    bn.weight = remap.transplant(name, &bn.weight)?;
                    bn.bias = remap.transplant(name, &bn.bias)?;
                    bn.running_mean = remap.transplant(name, &bn.running_mean)?;
                    bn.running_var = remap.transplant(name, &bn.running_var)?;
                    Op::BatchNorm2d(bn)
                }
                other => other.clone(),
            };
            let kept = remap.get(name).map_or(0, |r| r.output.len());
            Ok((op, kept))
        })?;

        debug!(
            params_before = self.graph.num_parameters(),
            params_after = graph.num_parameters(),
            "rewrote graph"
        );
        Ok(Rewrite { graph, remap })
    }
}

/// Zero the pruned weights of every layer without changing any shape.
///
/// Conv and linear layers zero masked output rows and masked input
/// columns; batch norm zeroes gamma and beta of masked channels.
pub fn apply_masks(graph: &Graph, masks: &MaskSet) -> Result<Graph> {
    masks.validate(graph)?;
    rebuild(graph, |id, layer| {
        let m = masks.get(id);
        let op = match layer.op() {
            Op::Conv2d(conv) => {
                let mut conv = conv.clone();
                let depthwise = conv.is_depthwise();
                zero_rows(&mut conv.weight, &m.output)?;
                if let Some(bias) = conv.bias.as_mut() {
                    zero_rows(bias, &m.output)?;
                }
                if !depthwise {
                    zero_columns(&mut conv.weight, &m.inputs[0])?;
                }
                Op::Conv2d(conv)
            }
            Op::Linear(linear) => {
                let mut linear = linear.clone();
                zero_rows(&mut linear.weight, &m.output)?;
                if let Some(bias) = linear.bias.as_mut() {
                    zero_rows(bias, &m.output)?;
                }
                zero_columns(&mut linear.weight, &m.inputs[0])?;
                Op::Linear(linear)
            }
            Op::BatchNorm2d(bn) => {
                let mut bn = bn.clone();
                zero_rows(&mut bn.weight, &m.output)?;
                zero_rows(&mut bn.bias, &m.output)?;
                Op::BatchNorm2d(bn)
            }
            other => other.clone(),
        };
        Ok((op, layer.out_channels()))
    })
}

fn zero_rows(t: &mut Tensor, mask: &ChannelMask) -> Result<()> {
    for i in mask.zero_indices() {
        t.fill_index(0, i, 0.0)?;
    }
    Ok(())
}

fn zero_columns(t: &mut Tensor, mask: &ChannelMask) -> Result<()> {
    for j in mask.zero_indices() {
        t.fill_index(1, j, 0.0)?;
    }
    Ok(())
}

/// Re-trace `graph` layer by layer with replacement ops.
///
/// `f` returns the new op and, for input layers, the new channel count.
fn rebuild<F>(graph: &Graph, mut f: F) -> Result<Graph>
where
    F: FnMut(LayerId, &Layer) -> Result<(Op, usize)>,
{
    let mut builder = GraphBuilder::new();
    let mut ids: Vec<LayerId> = Vec::with_capacity(graph.len());
    for (i, layer) in graph.layers().iter().enumerate() {
        let (op, kept) = f(LayerId(i), layer)?;
        let id = match op {
            Op::Input => {
                let mut shape = layer.output_shape().to_vec();
                shape[0] = kept;
                builder.input(layer.name(), &shape)?
            }
            op => {
                let inputs: Vec<LayerId> = layer.inputs().iter().map(|p| ids[p.index()]).collect();
                builder.add_layer(layer.name(), op, &inputs)?
            }
        };
        ids.push(id);
    }
    builder.build()
}

/// Every edge and every tied, concat and flatten junction must agree.
fn check_consistent(graph: &Graph, masks: &MaskSet) -> Result<()> {
    for (i, layer) in graph.layers().iter().enumerate() {
        let m = masks.get(LayerId(i));
        for (p, &producer) in layer.inputs().iter().enumerate() {
            let produced = &masks.get(producer).output;
            if &m.inputs[p] != produced {
                return Err(unresolved(
                    format!(
                        "edge '{}' -> '{}' port {p}",
                        graph.layer(producer).name(),
                        layer.name()
                    ),
                    produced,
                    &m.inputs[p],
                ));
            }
        }
        if let Some(expected) = expected_output(layer, m) {
            if expected != m.output {
                return Err(unresolved(
                    format!("junction '{}'", layer.name()),
                    &expected,
                    &m.output,
                ));
            }
        }
    }
    Ok(())
}

/// The output mask a junction's input masks imply, if the op constrains it.
fn expected_output(layer: &Layer, m: &LayerMasks) -> Option<ChannelMask> {
    match layer.op().channel_rule() {
        ChannelRule::Independent => None,
        ChannelRule::Tied => {
            if let Some(odd) = m.inputs.iter().find(|input| **input != m.output) {
                return Some(odd.clone());
            }
            None
        }
        ChannelRule::Concat => {
            let keep = m
                .inputs
                .iter()
                .flat_map(|input| input.as_slice().iter().copied())
                .collect();
            Some(ChannelMask::from_keep(keep))
        }
        ChannelRule::Flatten => {
            let input = m.inputs.first()?;
            if input.is_empty() {
                return None;
            }
            let spatial = m.output.len() / input.len();
            let keep = input
                .as_slice()
                .iter()
                .flat_map(|&k| std::iter::repeat(k).take(spatial))
                .collect();
            Some(ChannelMask::from_keep(keep))
        }
    }
}

fn unresolved(context: String, expected: &ChannelMask, got: &ChannelMask) -> PruningError {
    PruningError::ShapeMismatch {
        context: format!("unresolved masks at {context}"),
        expected: vec![expected.num_kept()],
        got: vec![got.num_kept()],
    }
}
