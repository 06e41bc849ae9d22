// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Generic unary and binary dispatch.
//!
//! An operator procedure only decides which device operator to run on a set
//! of handles. The templates own everything around it: building handles,
//! resolving broadcasts, and destroying every handle on every exit path.
//!
//! ```text
//! unary_op:   src, dst ──create──► proc(src, dst) ──destroy──► done
//! binary_op:  src0, src1, dst ──resolve──► proc(lhs, rhs, dst) ──destroy──► done
//! ```

use crate::{call_op, create_handle, create_handle_with_rank, resolve, DispatchContext, DispatchError};
use device_runtime::{BinaryKind, DeviceOp, RawTensor, UnaryKind};
use graph_ir::OperatorNode;
use tensor_core::{TensorDescriptor, MAX_DIMS};

/// An operator over one input and one output handle.
pub trait UnaryProcedure {
    fn run(&self, ctx: &DispatchContext, src: RawTensor, dst: RawTensor) -> Result<(), DispatchError>;
}

impl<F> UnaryProcedure for F
where
    F: Fn(&DispatchContext, RawTensor, RawTensor) -> Result<(), DispatchError>,
{
    fn run(&self, ctx: &DispatchContext, src: RawTensor, dst: RawTensor) -> Result<(), DispatchError> {
        self(ctx, src, dst)
    }
}

/// An operator over two same-shaped inputs and one output handle.
pub trait BinaryProcedure {
    fn run(
        &self,
        ctx: &DispatchContext,
        lhs: RawTensor,
        rhs: RawTensor,
        dst: RawTensor,
    ) -> Result<(), DispatchError>;
}

impl<F> BinaryProcedure for F
where
    F: Fn(&DispatchContext, RawTensor, RawTensor, RawTensor) -> Result<(), DispatchError>,
{
    fn run(
        &self,
        ctx: &DispatchContext,
        lhs: RawTensor,
        rhs: RawTensor,
        dst: RawTensor,
    ) -> Result<(), DispatchError> {
        self(ctx, lhs, rhs, dst)
    }
}

/// A library elementwise function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elementwise(pub UnaryKind);

impl UnaryProcedure for Elementwise {
    fn run(&self, ctx: &DispatchContext, src: RawTensor, dst: RawTensor) -> Result<(), DispatchError> {
        call_op(ctx, &DeviceOp::Unary { kind: self.0, src, dst })
    }
}

/// Library arithmetic with `alpha = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arithmetic(pub BinaryKind);

impl BinaryProcedure for Arithmetic {
    fn run(
        &self,
        ctx: &DispatchContext,
        lhs: RawTensor,
        rhs: RawTensor,
        dst: RawTensor,
    ) -> Result<(), DispatchError> {
        call_op(
            ctx,
            &DeviceOp::Binary {
                kind: self.0,
                lhs,
                rhs,
                dst,
                alpha: 1.0,
            },
        )
    }
}

/// Runs `proc` on a node's first source and its destination.
pub fn unary_op(
    ctx: &DispatchContext,
    node: &OperatorNode,
    proc: impl UnaryProcedure,
) -> Result<(), DispatchError> {
    tracing::debug!(node = %node.name, op = %node.op, "dispatch unary");
    apply_unary(ctx, node.src(0)?, &node.dst, &proc)
}

/// Runs `proc` on a node's two sources, broadcast to its destination.
pub fn binary_op(
    ctx: &DispatchContext,
    node: &OperatorNode,
    proc: impl BinaryProcedure,
) -> Result<(), DispatchError> {
    tracing::debug!(node = %node.name, op = %node.op, "dispatch binary");
    apply_binary(ctx, node.src(0)?, node.src(1)?, &node.dst, &proc)
}

/// The unary template over explicit descriptors.
pub fn apply_unary(
    ctx: &DispatchContext,
    src: &TensorDescriptor,
    dst: &TensorDescriptor,
    proc: &dyn UnaryProcedure,
) -> Result<(), DispatchError> {
    let src = create_handle(ctx, src)?;
    let dst = create_handle(ctx, dst)?;
    proc.run(ctx, src.raw(), dst.raw())?;
    src.destroy()?;
    dst.destroy()
}

/// The binary template over explicit descriptors.
pub fn apply_binary(
    ctx: &DispatchContext,
    src0: &TensorDescriptor,
    src1: &TensorDescriptor,
    dst: &TensorDescriptor,
    proc: &dyn BinaryProcedure,
) -> Result<(), DispatchError> {
    let handles = resolve(ctx, src0, src1, dst)?;
    proc.run(ctx, handles.lhs.raw(), handles.rhs.raw(), handles.dst.raw())?;
    handles.destroy()
}

/// A descriptor to register for a single launch, with its handle rank.
#[derive(Debug, Clone, Copy)]
pub struct HandleRequest<'a> {
    desc: &'a TensorDescriptor,
    rank: usize,
}

impl<'a> HandleRequest<'a> {
    /// A handle of reduced rank; see [`create_handle_with_rank`].
    pub fn ranked(desc: &'a TensorDescriptor, rank: usize) -> Self {
        Self { desc, rank }
    }
}

impl<'a> From<&'a TensorDescriptor> for HandleRequest<'a> {
    fn from(desc: &'a TensorDescriptor) -> Self {
        Self {
            desc,
            rank: MAX_DIMS,
        }
    }
}

/// Creates one handle per request, launches the operator `build` returns
/// for them, and destroys the handles.
///
/// ```ignore
/// launch(ctx, [src.into(), dst.into()], |[s, d]| DeviceOp::Muls { src: s, scalar: 0.5, dst: d })?;
/// ```
pub fn launch<const N: usize>(
    ctx: &DispatchContext,
    operands: [HandleRequest<'_>; N],
    build: impl FnOnce([RawTensor; N]) -> DeviceOp,
) -> Result<(), DispatchError> {
    let mut handles = Vec::with_capacity(N);
    for req in operands {
        handles.push(create_handle_with_rank(ctx, req.desc, req.rank)?);
    }
    let raws: [RawTensor; N] = std::array::from_fn(|i| handles[i].raw());
    call_op(ctx, &build(raws))?;
    handles.into_iter().try_for_each(|h| h.destroy())
}
