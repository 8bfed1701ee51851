//! Structural dependencies between layers.

use super::op::{ChannelRule, Op};
use super::{Graph, LayerId};

/// How a producer's output channel set constrains a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Consumer shrinks its own input side (dense conv, linear).
    Direct,
    /// Consumer carries the channel set through (norm, activation,
    /// pooling, depthwise conv, add, concat, output).
    PassThrough,
    /// Consumer flattens `[C, ...]`; each channel owns `spatial`
    /// consecutive output positions.
    Flatten {
        /// Positions per channel (product of the non-channel dims).
        spatial: usize,
    },
}

/// Directed dependency from a producer's output to one consumer port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    /// Layer whose output is consumed.
    pub producer: LayerId,
    /// Consuming layer.
    pub consumer: LayerId,
    /// Input port of the consumer.
    pub port: usize,
    /// Propagation behaviour.
    pub kind: EdgeKind,
}

impl Graph {
    /// Derive every dependency edge, ordered by consumer then port.
    #[must_use]
    pub fn dependency_edges(&self) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        for (i, layer) in self.layers().iter().enumerate() {
            let consumer = LayerId(i);
            for (port, &producer) in layer.inputs().iter().enumerate() {
                let kind = match (layer.op(), layer.op().channel_rule()) {
                    (Op::Flatten, _) => {
                        let shape = self.layer(producer).output_shape();
                        EdgeKind::Flatten {
                            spatial: shape.iter().skip(1).product(),
                        }
                    }
                    (_, ChannelRule::Independent) => EdgeKind::Direct,
                    _ => EdgeKind::PassThrough,
                };
                edges.push(DependencyEdge {
                    producer,
                    consumer,
                    port,
                    kind,
                });
            }
        }
        edges
    }
}
