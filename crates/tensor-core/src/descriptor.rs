// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph-engine tensor descriptors.
//!
//! A [`TensorDescriptor`] is the host-side view of a tensor as the graph
//! engine hands it to the dispatch layer: element type, up to
//! [`MAX_DIMS`] extents listed innermost-first, per-dimension byte strides,
//! the base address of the backing device allocation and a byte offset into
//! it. Descriptors are plain `Copy` values; building a view never touches
//! tensor data.
//!
//! ```text
//!   ne = [ne0, ne1, ne2, ne3]      ne0 varies fastest
//!   nb = [nb0, nb1, nb2, nb3]      bytes between neighbours along each dim
//!   address(i0..i3) = data + offset + Σ ik * nbk
//! ```

use crate::{DType, Shape, TensorError};
use std::fmt;

/// Maximum tensor rank understood by the graph engine.
pub const MAX_DIMS: usize = 4;

/// An address in device memory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The null device address.
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Returns `true` for the null address.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `bytes` past this one.
    pub fn add(self, bytes: usize) -> DevicePtr {
        DevicePtr(self.0 + bytes as u64)
    }

    /// Returns the raw address.
    pub fn addr(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Host-side view of one tensor owned by the graph engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorDescriptor {
    /// Element type.
    pub dtype: DType,
    /// Logical rank (1..=4). Extents past the rank are 1.
    pub n_dims: usize,
    /// Extents, innermost dimension first.
    pub ne: [usize; MAX_DIMS],
    /// Byte strides, parallel to `ne`. A stride of 0 repeats the same element.
    pub nb: [usize; MAX_DIMS],
    /// Base address of the backing allocation.
    pub data: DevicePtr,
    /// Byte offset of element (0, 0, 0, 0) from `data`.
    pub offset: usize,
}

impl TensorDescriptor {
    /// Describes a densely packed tensor at the start of `data`.
    ///
    /// `ne` is in graph order and may have fewer than [`MAX_DIMS`] entries;
    /// missing extents are 1.
    ///
    /// ```
    /// use tensor_core::{DType, DevicePtr, TensorDescriptor};
    /// let d = TensorDescriptor::contiguous(DType::F32, &[3, 2], DevicePtr(0x1000)).unwrap();
    /// assert_eq!(d.ne, [3, 2, 1, 1]);
    /// assert_eq!(d.nb, [4, 12, 24, 24]);
    /// ```
    pub fn contiguous(dtype: DType, ne: &[usize], data: DevicePtr) -> Result<Self, TensorError> {
        let padded = pad_extents(ne)?;
        Ok(Self {
            dtype,
            n_dims: ne.len().max(1),
            ne: padded,
            nb: packed_strides(dtype, &padded),
            data,
            offset: 0,
        })
    }

    /// Creates a view sharing this descriptor's storage.
    ///
    /// `offset` is relative to this descriptor's own offset. Strides are
    /// taken as given; a stride of 0 expresses a broadcast dimension.
    pub fn view(&self, ne: &[usize], nb: &[usize], offset: usize) -> Result<Self, TensorError> {
        if ne.len() != nb.len() {
            return Err(TensorError::InvalidReshape {
                from: ne.to_vec(),
                to: nb.to_vec(),
            });
        }
        let padded_ne = pad_extents(ne)?;
        let mut padded_nb = [0usize; MAX_DIMS];
        padded_nb[..nb.len()].copy_from_slice(nb);
        for i in nb.len()..MAX_DIMS {
            padded_nb[i] = if i == 0 {
                self.dtype.size_bytes()
            } else {
                padded_nb[i - 1] * padded_ne[i - 1]
            };
        }
        let view = Self {
            dtype: self.dtype,
            n_dims: ne.len().max(1),
            ne: padded_ne,
            nb: padded_nb,
            data: self.data,
            offset: self.offset + offset,
        };
        view.validate()?;
        Ok(view)
    }

    /// Reinterprets a contiguous descriptor with new extents.
    pub fn reshape(&self, ne: &[usize]) -> Result<Self, TensorError> {
        if !self.is_contiguous() {
            return Err(TensorError::NotContiguous { op: "reshape" });
        }
        let padded = pad_extents(ne)?;
        if padded.iter().product::<usize>() != self.num_elements() {
            return Err(TensorError::InvalidReshape {
                from: self.ne.to_vec(),
                to: ne.to_vec(),
            });
        }
        Ok(Self {
            n_dims: ne.len().max(1),
            ne: padded,
            nb: packed_strides(self.dtype, &padded),
            ..*self
        })
    }

    /// Returns a copy with a different element type and packed strides.
    ///
    /// Used for intermediates that share a shape but not a dtype.
    pub fn with_dtype(&self, dtype: DType, data: DevicePtr) -> Self {
        Self {
            dtype,
            nb: packed_strides(dtype, &self.ne),
            data,
            offset: 0,
            ..*self
        }
    }

    /// Total number of logical elements.
    pub fn num_elements(&self) -> usize {
        self.ne.iter().product()
    }

    /// Number of rows, i.e. elements divided by the innermost extent.
    pub fn nrows(&self) -> usize {
        self.ne[1] * self.ne[2] * self.ne[3]
    }

    /// Returns `true` if the extents match `other`'s.
    pub fn same_shape(&self, other: &TensorDescriptor) -> bool {
        self.ne == other.ne
    }

    /// Returns `true` if elements are densely packed in graph order.
    ///
    /// Dimensions of extent 1 are ignored, since their stride is never used.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = self.dtype.size_bytes();
        for i in 0..MAX_DIMS {
            if self.ne[i] != 1 && self.nb[i] != expected {
                return false;
            }
            expected *= self.ne[i];
        }
        true
    }

    /// Number of bytes from the first to one past the last reachable element.
    pub fn span_bytes(&self) -> usize {
        if self.ne.iter().any(|&n| n == 0) {
            return 0;
        }
        let last: usize = (0..MAX_DIMS).map(|i| (self.ne[i] - 1) * self.nb[i]).sum();
        last + self.dtype.size_bytes()
    }

    /// Size in bytes of a packed tensor with this shape and dtype.
    pub fn packed_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_bytes()
    }

    /// Row-major device shape covering the descriptor's rank.
    pub fn row_major_shape(&self) -> Shape {
        Shape::from_graph_order(&self.ne, self.n_dims)
    }

    /// Checks rank and stride alignment.
    pub fn validate(&self) -> Result<(), TensorError> {
        if self.n_dims > MAX_DIMS {
            return Err(TensorError::RankTooLarge {
                rank: self.n_dims,
                max: MAX_DIMS,
            });
        }
        let elem = self.dtype.size_bytes();
        for &nb in &self.nb {
            if nb % elem != 0 {
                return Err(TensorError::Misaligned {
                    what: "stride",
                    bytes: nb,
                    dtype: self.dtype,
                });
            }
        }
        if self.offset % elem != 0 {
            return Err(TensorError::Misaligned {
                what: "offset",
                bytes: self.offset,
                dtype: self.dtype,
            });
        }
        Ok(())
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}, {}, {}, {}] @ {}+{}",
            self.dtype, self.ne[0], self.ne[1], self.ne[2], self.ne[3], self.data, self.offset
        )
    }
}

/// Packed byte strides for graph-order extents.
pub fn packed_strides(dtype: DType, ne: &[usize; MAX_DIMS]) -> [usize; MAX_DIMS] {
    let mut nb = [0usize; MAX_DIMS];
    nb[0] = dtype.size_bytes();
    for i in 1..MAX_DIMS {
        nb[i] = nb[i - 1] * ne[i - 1];
    }
    nb
}

fn pad_extents(ne: &[usize]) -> Result<[usize; MAX_DIMS], TensorError> {
    if ne.len() > MAX_DIMS {
        return Err(TensorError::RankTooLarge {
            rank: ne.len(),
            max: MAX_DIMS,
        });
    }
    let mut padded = [1usize; MAX_DIMS];
    padded[..ne.len()].copy_from_slice(ne);
    Ok(padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: DevicePtr = DevicePtr(0x1000);

    #[test]
    fn test_contiguous_layout() {
        let d = TensorDescriptor::contiguous(DType::F16, &[4, 3, 2], BASE).unwrap();
        assert_eq!(d.n_dims, 3);
        assert_eq!(d.ne, [4, 3, 2, 1]);
        assert_eq!(d.nb, [2, 8, 24, 48]);
        assert!(d.is_contiguous());
        assert_eq!(d.span_bytes(), 48);
        assert_eq!(d.nrows(), 6);
    }

    #[test]
    fn test_rank_too_large() {
        let err = TensorDescriptor::contiguous(DType::F32, &[1, 2, 3, 4, 5], BASE).unwrap_err();
        assert!(matches!(err, TensorError::RankTooLarge { rank: 5, .. }));
    }

    #[test]
    fn test_view_with_zero_stride() {
        let d = TensorDescriptor::contiguous(DType::F32, &[1, 2], BASE).unwrap();
        let v = d.view(&[3, 2], &[0, 4], 0).unwrap();
        assert!(!v.is_contiguous());
        assert_eq!(v.span_bytes(), 8);
        assert_eq!(v.num_elements(), 6);
    }

    #[test]
    fn test_view_offset_accumulates() {
        let d = TensorDescriptor::contiguous(DType::F32, &[8], BASE).unwrap();
        let v = d.view(&[4], &[4], 8).unwrap();
        let w = v.view(&[2], &[4], 4).unwrap();
        assert_eq!(w.offset, 12);
    }

    #[test]
    fn test_misaligned_stride() {
        let d = TensorDescriptor::contiguous(DType::F32, &[8], BASE).unwrap();
        let err = d.view(&[2], &[6], 0).unwrap_err();
        assert!(matches!(err, TensorError::Misaligned { what: "stride", .. }));
    }

    #[test]
    fn test_reshape() {
        let d = TensorDescriptor::contiguous(DType::F32, &[6], BASE).unwrap();
        let r = d.reshape(&[3, 2]).unwrap();
        assert_eq!(r.ne, [3, 2, 1, 1]);
        assert!(d.reshape(&[4, 2]).is_err());
    }

    #[test]
    fn test_transposed_view_not_contiguous() {
        let d = TensorDescriptor::contiguous(DType::F32, &[3, 2], BASE).unwrap();
        let t = d.view(&[2, 3], &[12, 4], 0).unwrap();
        assert!(!t.is_contiguous());
        assert_eq!(t.row_major_shape().dims(), &[3, 2]);
    }

    #[test]
    fn test_display() {
        let d = TensorDescriptor::contiguous(DType::F32, &[3, 2], BASE).unwrap();
        assert_eq!(format!("{d}"), "f32[3, 2, 1, 1] @ 0x1000+0");
    }
}
