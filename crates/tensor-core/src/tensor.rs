// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host staging buffers and element encoding.
//!
//! [`Tensor`] is the host-side copy of a tensor's contents: what gets
//! uploaded before a graph runs and what comes back afterwards. Element
//! encoding goes through `f64` so every supported dtype (including `i64`
//! indices up to 2^53) round-trips without loss.

use crate::{DType, TensorError};
use half::{bf16, f16};

/// Decodes one little-endian element of `dtype` from `bytes`.
///
/// # Panics
/// Panics if `bytes` is shorter than `dtype.size_bytes()`.
pub fn read_element(dtype: DType, bytes: &[u8]) -> f64 {
    match dtype {
        DType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        DType::F16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
        DType::BF16 => bf16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
        DType::I8 => bytes[0] as i8 as f64,
        DType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        DType::I64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            i64::from_le_bytes(raw) as f64
        }
    }
}

/// Encodes `value` as one little-endian element of `dtype` into `out`.
///
/// Integer targets truncate toward zero and saturate at the type bounds.
///
/// # Panics
/// Panics if `out` is shorter than `dtype.size_bytes()`.
pub fn write_element(dtype: DType, value: f64, out: &mut [u8]) {
    match dtype {
        DType::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
        DType::F16 => out[..2].copy_from_slice(&f16::from_f64(value).to_le_bytes()),
        DType::BF16 => out[..2].copy_from_slice(&bf16::from_f64(value).to_le_bytes()),
        DType::I8 => out[0] = (value as i8) as u8,
        DType::I32 => out[..4].copy_from_slice(&(value as i32).to_le_bytes()),
        DType::I64 => out[..8].copy_from_slice(&(value as i64).to_le_bytes()),
    }
}

/// A densely packed host tensor, extents listed innermost-first.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    ne: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// Creates a zero-filled tensor.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DType, Tensor};
    /// let t = Tensor::zeros(DType::F32, &[3, 2]);
    /// assert_eq!(t.size_bytes(), 24);
    /// ```
    pub fn zeros(dtype: DType, ne: &[usize]) -> Self {
        let count: usize = ne.iter().product();
        Self {
            ne: ne.to_vec(),
            dtype,
            data: vec![0u8; count * dtype.size_bytes()],
        }
    }

    /// Creates a tensor from raw little-endian bytes.
    pub fn from_bytes(dtype: DType, ne: &[usize], data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = ne.iter().product::<usize>() * dtype.size_bytes();
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            ne: ne.to_vec(),
            dtype,
            data,
        })
    }

    /// Encodes `values` into a tensor of `dtype`.
    ///
    /// ```
    /// use tensor_core::{DType, Tensor};
    /// let t = Tensor::from_values(DType::F16, &[3], &[1.0, 2.5, -4.0]).unwrap();
    /// assert_eq!(t.to_f32_vec(), vec![1.0, 2.5, -4.0]);
    /// ```
    pub fn from_values(dtype: DType, ne: &[usize], values: &[f64]) -> Result<Self, TensorError> {
        let count: usize = ne.iter().product();
        let elem = dtype.size_bytes();
        if values.len() != count {
            return Err(TensorError::BufferSizeMismatch {
                expected: count * elem,
                actual: values.len() * elem,
            });
        }
        let mut data = vec![0u8; count * elem];
        for (chunk, &v) in data.chunks_exact_mut(elem).zip(values) {
            write_element(dtype, v, chunk);
        }
        Ok(Self {
            ne: ne.to_vec(),
            dtype,
            data,
        })
    }

    /// Creates an `F32` tensor from a slice of values.
    pub fn from_f32(ne: &[usize], values: &[f32]) -> Result<Self, TensorError> {
        let widened: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        Self::from_values(DType::F32, ne, &widened)
    }

    /// Creates an `I32` tensor from a slice of values.
    pub fn from_i32(ne: &[usize], values: &[i32]) -> Result<Self, TensorError> {
        let widened: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        Self::from_values(DType::I32, ne, &widened)
    }

    /// Extents in graph order.
    pub fn ne(&self) -> &[usize] {
        &self.ne
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.ne.iter().product()
    }

    /// Size of the buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Decodes every element as `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data
            .chunks_exact(self.dtype.size_bytes())
            .map(|chunk| read_element(self.dtype, chunk))
            .collect()
    }

    /// Decodes every element as `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.to_f64_vec().into_iter().map(|v| v as f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(DType::F32, &[3, 2]);
        assert_eq!(t.num_elements(), 6);
        assert!(t.to_f32_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_f32() {
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let t = Tensor::from_f32(&[3, 2], &data).unwrap();
        assert_eq!(t.to_f32_vec(), data.to_vec());
    }

    #[test]
    fn test_from_bytes_size_mismatch() {
        let result = Tensor::from_bytes(DType::F32, &[3, 2], vec![0u8; 10]);
        assert!(matches!(result, Err(TensorError::BufferSizeMismatch { expected: 24, .. })));
    }

    #[test]
    fn test_i64_round_trip() {
        let big = (1i64 << 40) + 7;
        let t = Tensor::from_values(DType::I64, &[1], &[big as f64]).unwrap();
        assert_eq!(t.to_f64_vec()[0] as i64, big);
    }

    #[test]
    fn test_bf16_precision() {
        let t = Tensor::from_values(DType::BF16, &[2], &[1.0, 3.140625]).unwrap();
        assert_eq!(t.to_f32_vec(), vec![1.0, 3.140625]);
    }

    #[test]
    fn test_integer_truncation() {
        let t = Tensor::from_values(DType::I32, &[2], &[2.9, -2.9]).unwrap();
        assert_eq!(t.to_f64_vec(), vec![2.0, -2.0]);
    }
}
