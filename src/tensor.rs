//! Dense parameter tensor.
//!
//! A row-major `f32` buffer with a shape. Pruning never needs gradients,
//! only the ability to read units along dimension 0 and to gather or
//! zero slices along an arbitrary dimension.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{PruningError, Result};

/// A dense row-major tensor of `f32` values.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    /// Underlying data storage
    data: Vec<f32>,

    /// Shape of the tensor
    shape: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor from a slice with the given shape.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the product of shape dimensions.
    #[must_use]
    pub fn new(data: &[f32], shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );
        Self {
            data: data.to_vec(),
            shape: shape.to_vec(),
        }
    }

    /// Create a tensor from an owned buffer, checking the shape.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(PruningError::ShapeMismatch {
                context: "tensor construction".to_string(),
                expected: vec![expected_len],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    /// Create a tensor from a 1D slice (vector).
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self::new(data, &[data.len()])
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with `value`.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: vec![value; len],
            shape: shape.to_vec(),
        }
    }

    /// Sample from U(low, high) with an optional seed for reproducibility.
    #[must_use]
    pub fn uniform(shape: &[usize], low: f32, high: f32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| rng.gen_range(low..high)).collect();
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    /// Kaiming-style uniform initialisation: U(-b, b), b = sqrt(6 / fan_in).
    #[must_use]
    pub fn kaiming_uniform(shape: &[usize], fan_in: usize, seed: Option<u64>) -> Self {
        let bound = (6.0 / fan_in.max(1) as f32).sqrt();
        Self::uniform(shape, -bound, bound, seed)
    }

    /// Get the shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Extent of dimension `dim`, or 0 if out of range.
    #[must_use]
    pub fn dim(&self, dim: usize) -> usize {
        self.shape.get(dim).copied().unwrap_or(0)
    }

    /// Raw data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Whether every element is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Slices of the tensor along dimension 0, one per unit.
    ///
    /// Unit `i` holds every weight contributing to output unit `i`.
    #[must_use]
    pub fn units(&self) -> Vec<&[f32]> {
        let n = self.dim(0);
        if n == 0 {
            return Vec::new();
        }
        let stride = self.data.len() / n;
        (0..n)
            .map(|i| &self.data[i * stride..(i + 1) * stride])
            .collect()
    }

    /// Gather `indices` along `dim`, in the given order.
    pub fn index_select(&self, dim: usize, indices: &[usize]) -> Result<Tensor> {
        let (outer, extent, inner) = self.split_at_dim(dim)?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= extent) {
            return Err(PruningError::ShapeMismatch {
                context: format!("index_select on dim {dim}: index {bad} out of range"),
                expected: vec![extent],
                got: vec![bad + 1],
            });
        }

        let mut data = Vec::with_capacity(outer * indices.len() * inner);
        for o in 0..outer {
            for &i in indices {
                let start = (o * extent + i) * inner;
                data.extend_from_slice(&self.data[start..start + inner]);
            }
        }
        let mut shape = self.shape.clone();
        shape[dim] = indices.len();
        Ok(Tensor { data, shape })
    }

    /// Set every element at position `index` of `dim` to `value`.
    pub fn fill_index(&mut self, dim: usize, index: usize, value: f32) -> Result<()> {
        let (outer, extent, inner) = self.split_at_dim(dim)?;
        if index >= extent {
            return Err(PruningError::ShapeMismatch {
                context: format!("fill_index on dim {dim}"),
                expected: vec![extent],
                got: vec![index + 1],
            });
        }
        for o in 0..outer {
            let start = (o * extent + index) * inner;
            self.data[start..start + inner].fill(value);
        }
        Ok(())
    }

    /// Returns `(outer, extent, inner)` element counts around `dim`.
    fn split_at_dim(&self, dim: usize) -> Result<(usize, usize, usize)> {
        if dim >= self.shape.len() {
            return Err(PruningError::ShapeMismatch {
                context: format!("dimension {dim} of a rank-{} tensor", self.shape.len()),
                expected: vec![dim + 1],
                got: self.shape.clone(),
            });
        }
        let outer = self.shape[..dim].iter().product();
        let inner = self.shape[dim + 1..].iter().product();
        Ok((outer, self.shape[dim], inner))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("numel", &self.data.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "tensor_tests.rs"]
mod tests;
