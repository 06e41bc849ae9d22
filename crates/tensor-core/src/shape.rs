// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Row-major shapes as seen by the device operator library.
//!
//! Graph descriptors list extents innermost-first (`ne[0]` is the fastest
//! varying dimension). The device API wants the opposite order, outermost
//! first. [`Shape`] is always in device order; [`Shape::from_graph_order`]
//! performs the flip.

use std::fmt;

/// Row-major (outermost-first) dimensions of a device tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a shape from row-major dimensions.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![2, 3, 4]);
    /// assert_eq!(s.rank(), 3);
    /// assert_eq!(s.num_elements(), 24);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Builds a row-major shape from the first `rank` graph-order extents.
    ///
    /// ```
    /// use tensor_core::Shape;
    /// // ne = [cols, rows, 1, 1] -> [rows, cols]
    /// let s = Shape::from_graph_order(&[3, 2, 1, 1], 2);
    /// assert_eq!(s.dims(), &[2, 3]);
    /// ```
    pub fn from_graph_order(ne: &[usize], rank: usize) -> Self {
        let rank = rank.min(ne.len());
        Self {
            dims: ne[..rank].iter().rev().copied().collect(),
        }
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements (1 for rank 0).
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the size of a specific dimension, or `None` if out of bounds.
    pub fn dim(&self, index: usize) -> Option<usize> {
        self.dims.get(index).copied()
    }

    /// Returns the last (innermost) dimension, or 1 for a scalar.
    pub fn last_dim(&self) -> usize {
        self.dims.last().copied().unwrap_or(1)
    }

    /// Computes densely packed row-major strides, in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.dims.len()];
        let mut acc = 1;
        for (stride, &dim) in strides.iter_mut().zip(&self.dims).rev() {
            *stride = acc;
            acc *= dim;
        }
        strides
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::new(vec![]);
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
        assert!(s.strides().is_empty());
        assert_eq!(s.last_dim(), 1);
    }

    #[test]
    fn test_strides() {
        assert_eq!(Shape::new(vec![5]).strides(), vec![1]);
        assert_eq!(Shape::new(vec![3, 4]).strides(), vec![4, 1]);
        assert_eq!(Shape::new(vec![2, 3, 4]).strides(), vec![12, 4, 1]);
    }

    #[test]
    fn test_from_graph_order() {
        let s = Shape::from_graph_order(&[4, 3, 2, 1], 3);
        assert_eq!(s.dims(), &[2, 3, 4]);
        let full = Shape::from_graph_order(&[4, 3, 2, 1], 4);
        assert_eq!(full.dims(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_display() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(format!("{s}"), "[2, 3, 4]");
    }
}
