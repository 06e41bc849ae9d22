// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device tensor descriptions and opaque runtime handles.

use crate::Status;
use std::fmt;
use tensor_core::{DType, DevicePtr, Shape};

/// What the runtime needs to build a device tensor handle.
///
/// Unlike the graph engine's descriptors, dimensions are row-major
/// (outermost first) and strides, offset and storage length are counted in
/// elements. A stride of 0 repeats one element along that dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub dtype: DType,
    pub dims: Shape,
    pub strides: Vec<usize>,
    pub offset: usize,
    /// Elements addressable from `data`.
    pub storage_len: usize,
    pub data: DevicePtr,
}

impl TensorSpec {
    /// A packed tensor occupying exactly its own elements.
    pub fn contiguous(dtype: DType, dims: &[usize], data: DevicePtr) -> Self {
        let dims = Shape::new(dims.to_vec());
        Self {
            dtype,
            strides: dims.strides(),
            storage_len: dims.num_elements(),
            dims,
            offset: 0,
            data,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.dims.num_elements()
    }

    /// Index of the furthest reachable element, or `None` for empty tensors.
    pub fn max_index(&self) -> Option<usize> {
        if self.num_elements() == 0 {
            return None;
        }
        let reach: usize = self
            .dims
            .dims()
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        Some(self.offset + reach)
    }

    /// Checks internal consistency. Does not look at device memory.
    pub fn validate(&self) -> Result<(), Status> {
        if self.data.is_null() {
            return Err(Status::NULL_POINTER);
        }
        if self.strides.len() != self.rank() {
            return Err(Status::INVALID_PARAM);
        }
        match self.max_index() {
            Some(max) if max >= self.storage_len => Err(Status::INVALID_ADDRESS),
            _ => Ok(()),
        }
    }

    /// Storage index of every logical element, in row-major order.
    pub fn element_indices(&self) -> Vec<usize> {
        let total = self.num_elements();
        let dims = self.dims.dims();
        let mut out = Vec::with_capacity(total);
        if total == 0 {
            return out;
        }
        let mut idx = vec![0usize; dims.len()];
        for _ in 0..total {
            let pos: usize = idx.iter().zip(&self.strides).map(|(&i, &s)| i * s).sum();
            out.push(self.offset + pos);
            for axis in (0..dims.len()).rev() {
                idx[axis] += 1;
                if idx[axis] < dims[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
        out
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} strides {:?} +{} @ {}",
            self.dtype, self.dims, self.strides, self.offset, self.data
        )
    }
}

/// Opaque handle to a tensor registered with the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawTensor(pub u64);

impl fmt::Display for RawTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor#{}", self.0)
    }
}

/// Opaque handle to an in-order execution stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_indices() {
        let spec = TensorSpec::contiguous(DType::F32, &[2, 3], DevicePtr(0x10));
        assert_eq!(spec.strides, vec![3, 1]);
        assert_eq!(spec.element_indices(), vec![0, 1, 2, 3, 4, 5]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_broadcast_indices() {
        let spec = TensorSpec {
            dtype: DType::F32,
            dims: Shape::new(vec![2, 3]),
            strides: vec![1, 0],
            offset: 0,
            storage_len: 2,
            data: DevicePtr(0x10),
        };
        assert_eq!(spec.element_indices(), vec![0, 0, 0, 1, 1, 1]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_out_of_storage_rejected() {
        let mut spec = TensorSpec::contiguous(DType::F32, &[4], DevicePtr(0x10));
        spec.offset = 1;
        assert_eq!(spec.validate(), Err(Status::INVALID_ADDRESS));
    }

    #[test]
    fn test_null_data_rejected() {
        let spec = TensorSpec::contiguous(DType::F32, &[4], DevicePtr::NULL);
        assert_eq!(spec.validate(), Err(Status::NULL_POINTER));
    }
}
