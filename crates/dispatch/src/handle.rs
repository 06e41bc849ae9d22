// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor-handle adapter.
//!
//! Translates the graph engine's [`TensorDescriptor`] (extents innermost
//! first, strides in bytes) into the runtime's [`TensorSpec`] (dimensions
//! outermost first, strides and offset in elements) and registers it as a
//! device tensor. No data moves. Dtype support is left to the operator that
//! consumes the handle.
//!
//! ```text
//! descriptor  ne = [ne0, ne1, ne2, ne3]   nb = [nb0, nb1, nb2, nb3] bytes
//!                         │ reverse, divide by element size
//!                         ▼
//! spec      dims = [ne3, ne2, ne1, ne0]   strides = [nb3, nb2, nb1, nb0] / elem
//! ```

use crate::{check, DispatchContext, DispatchError, Phase};
use device_runtime::{DeviceRuntime, RawTensor, TensorSpec};
use tensor_core::{Shape, TensorDescriptor, TensorError, MAX_DIMS};

/// A device tensor handle, destroyed exactly once.
///
/// Handles live inside a single operator call. Dropping the handle destroys
/// it; [`destroy`](Self::destroy) does the same but reports failures.
pub struct TensorHandle<'ctx> {
    runtime: &'ctx dyn DeviceRuntime,
    raw: RawTensor,
    spec: TensorSpec,
}

impl TensorHandle<'_> {
    pub fn raw(&self) -> RawTensor {
        self.raw
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    /// Destroys the handle now and reports the outcome.
    pub fn destroy(self) -> Result<(), DispatchError> {
        let this = std::mem::ManuallyDrop::new(self);
        check(this.runtime.destroy_tensor(this.raw), "DestroyTensor", Phase::TensorDestroy)
    }
}

impl Drop for TensorHandle<'_> {
    fn drop(&mut self) {
        let status = self.runtime.destroy_tensor(self.raw);
        if !status.is_success() {
            tracing::error!(tensor = %self.raw, %status, "failed to destroy tensor handle");
        }
    }
}

impl std::fmt::Debug for TensorHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorHandle")
            .field("raw", &self.raw)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Builds the runtime description of `desc` as a rank-`rank` tensor.
///
/// Extents beyond `rank` must be 1; they are dropped from the outer end.
pub fn tensor_spec(desc: &TensorDescriptor, rank: usize) -> Result<TensorSpec, TensorError> {
    if rank == 0 || rank > MAX_DIMS {
        return Err(TensorError::RankTooLarge {
            rank,
            max: MAX_DIMS,
        });
    }
    if desc.ne[rank..].iter().any(|&n| n != 1) {
        return Err(TensorError::InvalidReshape {
            from: desc.ne.to_vec(),
            to: desc.ne[..rank].to_vec(),
        });
    }
    desc.validate()?;

    let elem = desc.dtype.size_bytes();
    let dims: Vec<usize> = desc.ne[..rank].iter().rev().copied().collect();
    let strides: Vec<usize> = desc.nb[..rank].iter().rev().map(|&nb| nb / elem).collect();
    let offset = desc.offset / elem;
    let span = desc.span_bytes() / elem;

    Ok(TensorSpec {
        dtype: desc.dtype,
        dims: Shape::new(dims),
        strides,
        offset,
        storage_len: offset + span,
        data: desc.data,
    })
}

/// Registers `desc` with the runtime as a rank-4 tensor.
pub fn create_handle<'ctx>(
    ctx: &'ctx DispatchContext,
    desc: &TensorDescriptor,
) -> Result<TensorHandle<'ctx>, DispatchError> {
    create_handle_with_rank(ctx, desc, MAX_DIMS)
}

/// Registers `desc` with the runtime using only its innermost `rank` extents.
///
/// Used for operators whose output drops an axis (argmax) or whose operands
/// are batch slices (get_rows, im2col).
pub fn create_handle_with_rank<'ctx>(
    ctx: &'ctx DispatchContext,
    desc: &TensorDescriptor,
    rank: usize,
) -> Result<TensorHandle<'ctx>, DispatchError> {
    let spec = tensor_spec(desc, rank)?;
    let runtime = ctx.runtime();
    let raw = runtime
        .create_tensor(&spec)
        .map_err(|status| DispatchError::Device {
            op: "CreateTensor".into(),
            phase: Phase::TensorCreate,
            status,
        })?;
    tracing::trace!(tensor = %raw, %spec, "tensor handle created");
    Ok(TensorHandle { runtime, raw, spec })
}
