//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use podar::prelude::*;
//! ```

pub use crate::allocate::{Allocation, MaskAllocator};
pub use crate::config::{PipelineConfig, SparsityConfig, SparsityRule};
pub use crate::error::{PruningError, Result};
pub use crate::graph::{Graph, GraphBuilder, OpType, Traceable};
pub use crate::importance::{Importance, ImportanceStrategy, ScoreNormalization};
pub use crate::mask::{ChannelMask, LayerMasks, MaskSet};
pub use crate::pipeline::{PruningOutcome, PruningPipeline, PruningReport};
pub use crate::resolve::{ConflictResolver, MaskConflictWarning};
pub use crate::rewrite::{apply_masks, ChannelRemap, GraphRewriter};
pub use crate::tensor::Tensor;
