//! Static compute graph for structured pruning.
//!
//! # Toyota Way: Poka-Yoke (Mistake-Proofing)
//! Every layer's output shape is inferred when it is added, so a graph
//! that exists is a graph whose channel counts line up. Dependency edges
//! are derived from the layers, never edited by hand.
//!
//! # Problem
//! When pruning channel j from layer L, we must also:
//! - Remove input channel j from every consumer of L
//! - Keep residual and concatenation junctions aligned
//! - Map j onto a block of features across a flatten boundary
//!
//! # Conventions
//! Shapes exclude the batch dimension. Dimension 0 of every value is its
//! channel (or feature) dimension.
//!
//! # References
//! - Fang, G., et al. (2023). `DepGraph`: Towards any structural pruning. CVPR.

mod builder;
mod dependency;
mod op;

use std::collections::HashMap;

pub use builder::{GraphBuilder, Traceable};
pub use dependency::{DependencyEdge, EdgeKind};
pub use op::{
    ActivationKind, BatchNorm2d, ChannelRule, Conv2d, Linear, Op, OpType, PoolKind, Pool2d,
    PrunableDim,
};

use crate::error::Result;

/// Index of a layer in its graph (also identifies the layer's output value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) usize);

impl LayerId {
    /// Position in graph order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node of the graph: one operation producing one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    name: String,
    op: Op,
    inputs: Vec<LayerId>,
    output_shape: Vec<usize>,
}

impl Layer {
    /// Unique layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation and parameters.
    #[must_use]
    pub fn op(&self) -> &Op {
        &self.op
    }

    /// Fieldless operation type.
    #[must_use]
    pub fn op_type(&self) -> OpType {
        self.op.op_type()
    }

    /// Producers, one per input port.
    #[must_use]
    pub fn inputs(&self) -> &[LayerId] {
        &self.inputs
    }

    /// Shape of the value this layer produces.
    #[must_use]
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    /// Extent of the output's dimension 0.
    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.output_shape.first().copied().unwrap_or(0)
    }
}

/// A traced network: layers in topological (insertion) order.
#[derive(Debug, Clone)]
pub struct Graph {
    layers: Vec<Layer>,
    index: HashMap<String, LayerId>,
    consumers: Vec<Vec<(LayerId, usize)>>,
}

impl Graph {
    pub(crate) fn from_layers(layers: Vec<Layer>, index: HashMap<String, LayerId>) -> Self {
        let mut consumers = vec![Vec::new(); layers.len()];
        for (i, layer) in layers.iter().enumerate() {
            for (port, producer) in layer.inputs.iter().enumerate() {
                consumers[producer.0].push((LayerId(i), port));
            }
        }
        Self {
            layers,
            index,
            consumers,
        }
    }

    /// Trace a collaborator's network from a representative input shape.
    ///
    /// Adds an `input` layer, lets the model record its layers, and
    /// terminates the returned value with an `output` layer. Both names
    /// are reserved; a model that uses either must go through
    /// [`Graph::trace_named`].
    pub fn trace<M: Traceable + ?Sized>(model: &M, input_shape: &[usize]) -> Result<Graph> {
        Self::trace_named(model, input_shape, "input", "output")
    }

    /// [`Graph::trace`] with caller-chosen names for the boundary layers.
    ///
    /// # Errors
    /// `GraphTracing` if a model layer reuses `input_name` or `output_name`.
    pub fn trace_named<M: Traceable + ?Sized>(
        model: &M,
        input_shape: &[usize],
        input_name: &str,
        output_name: &str,
    ) -> Result<Graph> {
        let mut builder = GraphBuilder::new();
        let x = builder.input(input_name, input_shape)?;
        let y = model.trace(&mut builder, x)?;
        builder.output(output_name, y)?;
        builder.build()
    }

    /// All layers in graph order.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the graph has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer by id.
    ///
    /// # Panics
    /// Panics if `id` did not come from this graph.
    #[must_use]
    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id.0]
    }

    /// Layer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.id_of(name).map(|id| self.layer(id))
    }

    /// Id of the layer called `name`.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<LayerId> {
        self.index.get(name).copied()
    }

    /// Consumers of a layer's output as `(consumer, port)` pairs, in graph order.
    #[must_use]
    pub fn consumers(&self, id: LayerId) -> &[(LayerId, usize)] {
        &self.consumers[id.0]
    }

    /// Shape of the value entering `port` of `id`.
    #[must_use]
    pub fn input_shape(&self, id: LayerId, port: usize) -> &[usize] {
        let producer = self.layers[id.0].inputs[port];
        &self.layers[producer.0].output_shape
    }

    /// Layers of the given type, in graph order.
    pub fn layers_of_type(&self, op_type: OpType) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(move |l| l.op_type() == op_type)
    }

    /// Layers that can be scored and pruned.
    pub fn prunable_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|l| l.op.prunable_dim().is_some())
    }

    /// Total learnable parameters.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.op.num_params()).sum()
    }

    /// Multiply-accumulate count of one forward pass (batch size 1).
    ///
    /// Convolutions and linear layers count one MAC per weight use, plus
    /// one per output element when biased; normalization counts two per
    /// element. Parameter-free ops are free.
    #[must_use]
    pub fn flops(&self) -> usize {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| self.layer_flops(LayerId(i), layer))
            .sum()
    }

    fn layer_flops(&self, id: LayerId, layer: &Layer) -> usize {
        let out_numel: usize = layer.output_shape.iter().product();
        match &layer.op {
            Op::Conv2d(c) => {
                let (kh, kw) = c.kernel_size();
                let per_output = c.weight.dim(1) * kh * kw;
                out_numel * per_output + c.bias.as_ref().map_or(0, |_| out_numel)
            }
            Op::Linear(l) => {
                let in_features: usize = self.input_shape(id, 0).iter().product();
                l.out_features() * in_features + l.bias.as_ref().map_or(0, |_| out_numel)
            }
            Op::BatchNorm2d(_) => 2 * out_numel,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests;
