// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Emulated device address space.
//!
//! Addresses are handed out by a bump pointer and never reused, so a stale
//! pointer always faults instead of silently aliasing a newer allocation.
//! Allocations are separated by a guard gap.

use crate::{Status, TensorSpec};
use std::collections::BTreeMap;
use tensor_core::{read_element, write_element, DevicePtr};

const BASE_ADDRESS: u64 = 0x1000_0000;
const ALIGNMENT: u64 = 512;

pub(crate) struct DeviceMemory {
    next: u64,
    capacity: usize,
    used: usize,
    blocks: BTreeMap<u64, Vec<u8>>,
}

impl DeviceMemory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            next: BASE_ADDRESS,
            capacity,
            used: 0,
            blocks: BTreeMap::new(),
        }
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn malloc(&mut self, size: usize) -> Result<DevicePtr, Status> {
        if size == 0 {
            return Err(Status::INVALID_PARAM);
        }
        if self.used + size > self.capacity {
            return Err(Status::OUT_OF_MEMORY);
        }
        let addr = self.next;
        let rounded = (size as u64).div_ceil(ALIGNMENT) * ALIGNMENT;
        self.next += rounded + ALIGNMENT;
        self.used += size;
        self.blocks.insert(addr, vec![0u8; size]);
        Ok(DevicePtr(addr))
    }

    pub(crate) fn free(&mut self, ptr: DevicePtr) -> Result<(), Status> {
        let block = self.blocks.remove(&ptr.addr()).ok_or(Status::INVALID_ADDRESS)?;
        self.used -= block.len();
        Ok(())
    }

    /// Finds the block holding `[addr, addr + len)`; returns its base and the
    /// start offset within it.
    fn locate(&self, addr: DevicePtr, len: usize) -> Result<(u64, usize), Status> {
        if addr.is_null() {
            return Err(Status::NULL_POINTER);
        }
        let (&base, block) = self
            .blocks
            .range(..=addr.addr())
            .next_back()
            .ok_or(Status::INVALID_ADDRESS)?;
        let start = (addr.addr() - base) as usize;
        if start + len > block.len() {
            return Err(Status::INVALID_ADDRESS);
        }
        Ok((base, start))
    }

    pub(crate) fn check(&self, addr: DevicePtr, len: usize) -> Result<(), Status> {
        self.locate(addr, len).map(|_| ())
    }

    pub(crate) fn read(&self, addr: DevicePtr, len: usize) -> Result<&[u8], Status> {
        let (base, start) = self.locate(addr, len)?;
        Ok(&self.blocks[&base][start..start + len])
    }

    pub(crate) fn write(&mut self, addr: DevicePtr, bytes: &[u8]) -> Result<(), Status> {
        let (base, start) = self.locate(addr, bytes.len())?;
        let block = self.blocks.get_mut(&base).ok_or(Status::INVALID_ADDRESS)?;
        block[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads every logical element of `spec` in row-major order.
    pub(crate) fn load(&self, spec: &TensorSpec) -> Result<Vec<f64>, Status> {
        let elem = spec.dtype.size_bytes();
        let storage = self.read(spec.data, spec.storage_len * elem)?;
        Ok(spec
            .element_indices()
            .into_iter()
            .map(|i| read_element(spec.dtype, &storage[i * elem..]))
            .collect())
    }

    /// Writes `values` (row-major) into the elements of `spec`, converting to
    /// its dtype.
    pub(crate) fn store(&mut self, spec: &TensorSpec, values: &[f64]) -> Result<(), Status> {
        if values.len() != spec.num_elements() {
            return Err(Status::INVALID_PARAM);
        }
        let elem = spec.dtype.size_bytes();
        let (base, start) = self.locate(spec.data, spec.storage_len * elem)?;
        let block = self.blocks.get_mut(&base).ok_or(Status::INVALID_ADDRESS)?;
        let storage = &mut block[start..];
        for (i, &v) in spec.element_indices().into_iter().zip(values) {
            write_element(spec.dtype, v, &mut storage[i * elem..]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{DType, Shape};

    #[test]
    fn test_addresses_are_not_reused() {
        let mut mem = DeviceMemory::new(1 << 20);
        let a = mem.malloc(100).unwrap();
        mem.free(a).unwrap();
        let b = mem.malloc(100).unwrap();
        assert_ne!(a, b);
        assert_eq!(mem.read(a, 1), Err(Status::INVALID_ADDRESS));
    }

    #[test]
    fn test_capacity_enforced() {
        let mut mem = DeviceMemory::new(1000);
        let _a = mem.malloc(600).unwrap();
        assert_eq!(mem.malloc(600), Err(Status::OUT_OF_MEMORY));
        assert_eq!(mem.used(), 600);
    }

    #[test]
    fn test_out_of_bounds_read() {
        let mut mem = DeviceMemory::new(1 << 20);
        let a = mem.malloc(16).unwrap();
        assert!(mem.read(a.add(8), 8).is_ok());
        assert_eq!(mem.read(a.add(8), 9), Err(Status::INVALID_ADDRESS));
    }

    #[test]
    fn test_strided_load_store() {
        let mut mem = DeviceMemory::new(1 << 20);
        let ptr = mem.malloc(6 * 4).unwrap();
        let dense = TensorSpec::contiguous(DType::F32, &[2, 3], ptr);
        mem.store(&dense, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        let transposed = TensorSpec {
            dtype: DType::F32,
            dims: Shape::new(vec![3, 2]),
            strides: vec![1, 3],
            offset: 0,
            storage_len: 6,
            data: ptr,
        };
        assert_eq!(mem.load(&transposed).unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
