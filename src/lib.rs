//! Podar: structured channel pruning for static compute graphs.
//!
//! Podar removes whole output channels from convolutional and dense
//! networks. A pruning round runs five stages, each owning one concern:
//!
//! 1. [`graph`]: trace the network into layers and derive the dependency
//!    edges that couple channel counts across layers.
//! 2. [`importance`]: score every output unit of every selected layer.
//! 3. [`allocate`]: turn scores and [`config`] rules into binary masks.
//! 4. [`resolve`]: reconcile masks across coupled layers to a fixed point.
//! 5. [`rewrite`]: emit a smaller graph with gathered weights.
//!
//! [`pipeline`] chains the stages and reports what shrank.
//!
//! # Quick Start
//!
//! ```
//! use podar::prelude::*;
//! use podar::graph::{Conv2d, Linear};
//!
//! let mut b = GraphBuilder::new();
//! let x = b.input("input", &[1, 6, 6]).unwrap();
//! let weight = Tensor::uniform(&[8, 1, 3, 3], -1.0, 1.0, Some(7));
//! let c = b.conv2d("conv1", x, Conv2d::new(weight, None)).unwrap();
//! let r = b.relu("relu1", c).unwrap();
//! let f = b.flatten("flatten", r).unwrap();
//! let fc = Linear::new(Tensor::uniform(&[4, 8 * 16], -1.0, 1.0, Some(8)), None);
//! let y = b.linear("fc", f, fc).unwrap();
//! b.output("output", y).unwrap();
//! let graph = b.build().unwrap();
//!
//! let rules = SparsityConfig::new()
//!     .with_rule(SparsityRule::per_layer(0.5).op_types([OpType::Conv2d]));
//! let pipeline = PruningPipeline::new(PipelineConfig::new(rules)).unwrap();
//! let outcome = pipeline.run_round(&graph).unwrap();
//!
//! assert_eq!(outcome.graph.get("conv1").unwrap().out_channels(), 4);
//! assert_eq!(outcome.graph.get("fc").unwrap().output_shape(), &[4]);
//! assert!(outcome.report.params_after < outcome.report.params_before);
//! ```
//!
//! # Modules
//!
//! - [`tensor`]: Dense row-major `f32` tensor for weights
//! - [`graph`]: Layers, tracing, shape inference and dependency edges
//! - [`mask`]: Channel masks and per-graph mask sets
//! - [`importance`]: L1/L2 magnitude and geometric-median scoring
//! - [`config`]: Sparsity rules and pipeline configuration (JSON)
//! - [`allocate`]: Per-layer and total-budget mask allocation
//! - [`resolve`]: Fixed-point mask conflict resolution
//! - [`rewrite`]: Graph shrinking, in-place masking and index remaps
//! - [`pipeline`]: Pruning rounds and reports
//! - [`error`]: Error type shared by every stage

pub mod allocate;
pub mod config;
pub mod error;
pub mod graph;
pub mod importance;
pub mod mask;
pub mod pipeline;
pub mod prelude;
pub mod resolve;
pub mod rewrite;
pub mod tensor;

#[cfg(test)]
mod fixtures;

pub use error::{PruningError, Result};
pub use graph::{Graph, GraphBuilder, Traceable};
pub use mask::{ChannelMask, MaskSet};
pub use pipeline::{PruningOutcome, PruningPipeline, PruningReport};
