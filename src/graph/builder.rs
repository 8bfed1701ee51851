//! Symbolic tracing with shape inference.

use std::collections::HashMap;

use tracing::debug;

use super::op::{ActivationKind, BatchNorm2d, Conv2d, Linear, Op, Pool2d};
use super::{Graph, Layer, LayerId};
use crate::error::{PruningError, Result};

/// A network definition that can describe itself to a [`GraphBuilder`].
///
/// This is the seam to the training framework: implementing `trace` is
/// the symbolic forward pass that enumerates layers, their weights and
/// the data flow between them.
pub trait Traceable {
    /// Record this network's layers, consuming `input` and returning the
    /// value that should become the graph output.
    fn trace(&self, builder: &mut GraphBuilder, input: LayerId) -> Result<LayerId>;
}

/// Records layers in order, inferring every output shape as it goes.
///
/// # Example
///
/// ```
/// use podar::graph::{Conv2d, GraphBuilder, Linear, Pool2d};
/// use podar::tensor::Tensor;
///
/// let mut b = GraphBuilder::new();
/// let x = b.input("input", &[1, 8, 8]).unwrap();
/// let c = b.conv2d("conv1", x, Conv2d::new(Tensor::ones(&[4, 1, 3, 3]), None)).unwrap();
/// let r = b.relu("relu1", c).unwrap();
/// let p = b.pool2d("pool1", r, Pool2d::max(2, 2)).unwrap();
/// let f = b.flatten("flatten", p).unwrap();
/// let y = b.linear("fc", f, Linear::new(Tensor::ones(&[10, 36]), None)).unwrap();
/// b.output("output", y).unwrap();
/// let graph = b.build().unwrap();
/// assert_eq!(graph.get("fc").unwrap().output_shape(), &[10]);
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    layers: Vec<Layer>,
    index: HashMap<String, LayerId>,
}

impl GraphBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a graph input with the given per-sample shape.
    pub fn input(&mut self, name: &str, shape: &[usize]) -> Result<LayerId> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(PruningError::tracing(
                name,
                format!("input shape {shape:?} must be non-empty with non-zero extents"),
            ));
        }
        self.push(name, Op::Input, Vec::new(), shape.to_vec())
    }

    /// Add a 2D convolution.
    pub fn conv2d(&mut self, name: &str, x: LayerId, conv: Conv2d) -> Result<LayerId> {
        self.add_layer(name, Op::Conv2d(conv), &[x])
    }

    /// Add a fully connected layer.
    pub fn linear(&mut self, name: &str, x: LayerId, linear: Linear) -> Result<LayerId> {
        self.add_layer(name, Op::Linear(linear), &[x])
    }

    /// Add batch normalization.
    pub fn batch_norm2d(&mut self, name: &str, x: LayerId, bn: BatchNorm2d) -> Result<LayerId> {
        self.add_layer(name, Op::BatchNorm2d(bn), &[x])
    }

    /// Add an element-wise activation.
    pub fn activation(&mut self, name: &str, x: LayerId, kind: ActivationKind) -> Result<LayerId> {
        self.add_layer(name, Op::Activation(kind), &[x])
    }

    /// Add a ReLU.
    pub fn relu(&mut self, name: &str, x: LayerId) -> Result<LayerId> {
        self.activation(name, x, ActivationKind::Relu)
    }

    /// Add spatial pooling.
    pub fn pool2d(&mut self, name: &str, x: LayerId, pool: Pool2d) -> Result<LayerId> {
        self.add_layer(name, Op::Pool2d(pool), &[x])
    }

    /// Flatten to a feature vector.
    pub fn flatten(&mut self, name: &str, x: LayerId) -> Result<LayerId> {
        self.add_layer(name, Op::Flatten, &[x])
    }

    /// Element-wise sum (residual junction).
    pub fn add(&mut self, name: &str, xs: &[LayerId]) -> Result<LayerId> {
        self.add_layer(name, Op::Add, xs)
    }

    /// Concatenate along dimension 0.
    pub fn concat(&mut self, name: &str, xs: &[LayerId]) -> Result<LayerId> {
        self.add_layer(name, Op::Concat, xs)
    }

    /// Mark a value as a graph output.
    pub fn output(&mut self, name: &str, x: LayerId) -> Result<LayerId> {
        self.add_layer(name, Op::Output, &[x])
    }

    /// Add any non-input layer, inferring its output shape.
    pub fn add_layer(&mut self, name: &str, op: Op, inputs: &[LayerId]) -> Result<LayerId> {
        if matches!(op, Op::Input) {
            return Err(PruningError::tracing(name, "inputs are added with `input`"));
        }
        if let Some(bad) = inputs.iter().find(|id| id.0 >= self.layers.len()) {
            return Err(PruningError::tracing(
                name,
                format!("references unknown layer id {}", bad.0),
            ));
        }
        let shapes: Vec<&[usize]> = inputs
            .iter()
            .map(|id| self.layers[id.0].output_shape.as_slice())
            .collect();
        let output_shape = infer_shape(name, &op, &shapes)?;
        self.push(name, op, inputs.to_vec(), output_shape)
    }

    /// Finish tracing.
    pub fn build(self) -> Result<Graph> {
        if !self.layers.iter().any(|l| matches!(l.op, Op::Input)) {
            return Err(PruningError::tracing("<graph>", "graph has no input layer"));
        }
        if !self.layers.iter().any(|l| matches!(l.op, Op::Output)) {
            return Err(PruningError::tracing("<graph>", "graph has no output layer"));
        }
        debug!(layers = self.layers.len(), "traced graph");
        Ok(Graph::from_layers(self.layers, self.index))
    }

    fn push(
        &mut self,
        name: &str,
        op: Op,
        inputs: Vec<LayerId>,
        output_shape: Vec<usize>,
    ) -> Result<LayerId> {
        if self.index.contains_key(name) {
            return Err(PruningError::tracing(name, "duplicate layer name"));
        }
        let id = LayerId(self.layers.len());
        self.index.insert(name.to_string(), id);
        self.layers.push(Layer {
            name: name.to_string(),
            op,
            inputs,
            output_shape,
        });
        Ok(id)
    }
}

fn expect_arity(name: &str, shapes: &[&[usize]], n: usize) -> Result<()> {
    if shapes.len() != n {
        return Err(PruningError::tracing(
            name,
            format!("expected {n} input(s), got {}", shapes.len()),
        ));
    }
    Ok(())
}

fn expect_rank(name: &str, shape: &[usize], rank: usize) -> Result<()> {
    if shape.len() != rank {
        return Err(PruningError::tracing(
            name,
            format!("expected a rank-{rank} input, got shape {shape:?}"),
        ));
    }
    Ok(())
}

fn check_vector(name: &str, what: &str, t: &crate::tensor::Tensor, len: usize) -> Result<()> {
    if t.shape() != [len] {
        return Err(PruningError::tracing(
            name,
            format!("{what} has shape {:?}, expected [{len}]", t.shape()),
        ));
    }
    Ok(())
}

/// Output shape of `op` applied to inputs of the given shapes.
fn infer_shape(name: &str, op: &Op, shapes: &[&[usize]]) -> Result<Vec<usize>> {
    match op {
        Op::Input => Err(PruningError::tracing(name, "input layers take no inputs")),
        Op::Conv2d(conv) => {
            expect_arity(name, shapes, 1)?;
            let x = shapes[0];
            expect_rank(name, x, 3)?;
            if conv.weight.ndim() != 4 {
                return Err(PruningError::tracing(
                    name,
                    format!("conv weight must be rank 4, got {:?}", conv.weight.shape()),
                ));
            }
            if conv.groups == 0 {
                return Err(PruningError::tracing(name, "groups must be non-zero"));
            }
            if conv.groups > 1 && !conv.is_depthwise() {
                return Err(PruningError::tracing(
                    name,
                    format!(
                        "grouped convolution with {} groups is not supported (only dense or depthwise)",
                        conv.groups
                    ),
                ));
            }
            if x[0] != conv.in_channels() {
                return Err(PruningError::tracing(
                    name,
                    format!("expected {} input channels, got {}", conv.in_channels(), x[0]),
                ));
            }
            if let Some(bias) = &conv.bias {
                check_vector(name, "bias", bias, conv.out_channels())?;
            }
            let (oh, ow) = conv.output_hw(x[1], x[2]).ok_or_else(|| {
                PruningError::tracing(
                    name,
                    format!(
                        "kernel {:?} does not fit input {}x{}",
                        conv.kernel_size(),
                        x[1],
                        x[2]
                    ),
                )
            })?;
            Ok(vec![conv.out_channels(), oh, ow])
        }
        Op::Linear(linear) => {
            expect_arity(name, shapes, 1)?;
            let x = shapes[0];
            expect_rank(name, x, 1)?;
            if linear.weight.ndim() != 2 {
                return Err(PruningError::tracing(
                    name,
                    format!("linear weight must be rank 2, got {:?}", linear.weight.shape()),
                ));
            }
            if x[0] != linear.in_features() {
                return Err(PruningError::tracing(
                    name,
                    format!(
                        "expected {} input features, got {}",
                        linear.in_features(),
                        x[0]
                    ),
                ));
            }
            if let Some(bias) = &linear.bias {
                check_vector(name, "bias", bias, linear.out_features())?;
            }
            Ok(vec![linear.out_features()])
        }
        Op::BatchNorm2d(bn) => {
            expect_arity(name, shapes, 1)?;
            let x = shapes[0];
            let c = bn.num_features();
            for (what, t) in ["weight", "bias", "running_mean", "running_var"]
                .iter()
                .zip(bn.vectors())
            {
                check_vector(name, what, t, c)?;
            }
            if x.first() != Some(&c) {
                return Err(PruningError::tracing(
                    name,
                    format!("expected {c} channels, got shape {x:?}"),
                ));
            }
            Ok(x.to_vec())
        }
        Op::Activation(_) | Op::Output => {
            expect_arity(name, shapes, 1)?;
            Ok(shapes[0].to_vec())
        }
        Op::Pool2d(pool) => {
            expect_arity(name, shapes, 1)?;
            let x = shapes[0];
            expect_rank(name, x, 3)?;
            let (oh, ow) = pool.output_hw(x[1], x[2]).ok_or_else(|| {
                PruningError::tracing(
                    name,
                    format!("pool window {:?} does not fit input {}x{}", pool.kernel_size, x[1], x[2]),
                )
            })?;
            Ok(vec![x[0], oh, ow])
        }
        Op::Flatten => {
            expect_arity(name, shapes, 1)?;
            Ok(vec![shapes[0].iter().product()])
        }
        Op::Add => {
            if shapes.len() < 2 {
                return Err(PruningError::tracing(name, "add needs at least 2 inputs"));
            }
            if let Some(other) = shapes.iter().find(|s| **s != shapes[0]) {
                return Err(PruningError::tracing(
                    name,
                    format!("cannot add shapes {:?} and {other:?}", shapes[0]),
                ));
            }
            Ok(shapes[0].to_vec())
        }
        Op::Concat => {
            if shapes.len() < 2 {
                return Err(PruningError::tracing(name, "concat needs at least 2 inputs"));
            }
            if shapes.iter().any(|s| s.is_empty()) {
                return Err(PruningError::tracing(name, "cannot concatenate scalars"));
            }
            let rest = &shapes[0][1..];
            if let Some(other) = shapes.iter().find(|s| &s[1..] != rest) {
                return Err(PruningError::tracing(
                    name,
                    format!(
                        "cannot concatenate {:?} with {other:?} along dimension 0",
                        shapes[0]
                    ),
                ));
            }
            let mut out = shapes[0].to_vec();
            out[0] = shapes.iter().map(|s| s[0]).sum();
            Ok(out)
        }
    }
}
