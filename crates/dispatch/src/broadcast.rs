// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Broadcast resolution for binary operators.
//!
//! The device's elementwise operators require identical shapes on both
//! inputs and the output. Graph operands may instead differ in any
//! dimension where one side has extent 1; that side is expanded to the
//! other's extent by giving the dimension a stride of 0, so every position
//! along it reads the same element. Nothing is copied.
//!
//! ```text
//! lhs ne = [3, 2]          rhs ne = [1, 2]
//!                 │ dim 0: 3 vs 1 → expand rhs
//!                 ▼
//! rhs view ne = [3, 2]  nb = [0, 4]
//! ```

use crate::{create_handle, DispatchContext, DispatchError, TensorHandle};
use std::fmt;
use tensor_core::{TensorDescriptor, MAX_DIMS};

/// One side of a binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Lhs,
    Rhs,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operand::Lhs => "lhs",
            Operand::Rhs => "rhs",
        })
    }
}

/// How two operand shapes combine. Dimensions are in graph order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastPlan {
    shape: [usize; MAX_DIMS],
    expand_lhs: [bool; MAX_DIMS],
    expand_rhs: [bool; MAX_DIMS],
}

impl BroadcastPlan {
    /// Compares `lhs` and `rhs` dimension by dimension, innermost first.
    ///
    /// Equal extents pass through. Otherwise exactly one side must be 1 and
    /// is expanded. Anything else is a [`DispatchError::Broadcast`] naming
    /// the first offending dimension.
    ///
    /// ```
    /// use npu_dispatch::{BroadcastPlan, Operand};
    /// let plan = BroadcastPlan::compute(&[3, 2, 1, 1], &[1, 2, 1, 1]).unwrap();
    /// assert_eq!(plan.shape(), [3, 2, 1, 1]);
    /// assert_eq!(plan.expansions(), vec![(0, Operand::Rhs)]);
    /// ```
    pub fn compute(
        lhs: &[usize; MAX_DIMS],
        rhs: &[usize; MAX_DIMS],
    ) -> Result<Self, DispatchError> {
        let mut plan = Self {
            shape: [1; MAX_DIMS],
            expand_lhs: [false; MAX_DIMS],
            expand_rhs: [false; MAX_DIMS],
        };
        for dim in 0..MAX_DIMS {
            let (l, r) = (lhs[dim], rhs[dim]);
            plan.shape[dim] = match (l, r) {
                _ if l == r => l,
                (1, _) => {
                    plan.expand_lhs[dim] = true;
                    r
                }
                (_, 1) => {
                    plan.expand_rhs[dim] = true;
                    l
                }
                _ => return Err(DispatchError::Broadcast { dim, lhs: l, rhs: r }),
            };
        }
        Ok(plan)
    }

    /// `true` when no dimension needs expanding.
    pub fn is_identity(&self) -> bool {
        !self.expand_lhs.iter().chain(&self.expand_rhs).any(|&e| e)
    }

    /// The combined extents, innermost first.
    pub fn shape(&self) -> [usize; MAX_DIMS] {
        self.shape
    }

    /// Every expanded `(dimension, operand)` pair.
    pub fn expansions(&self) -> Vec<(usize, Operand)> {
        (0..MAX_DIMS)
            .filter_map(|dim| {
                if self.expand_lhs[dim] {
                    Some((dim, Operand::Lhs))
                } else if self.expand_rhs[dim] {
                    Some((dim, Operand::Rhs))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Returns `desc` as seen through the plan: the combined extents, with
    /// stride 0 on every dimension expanded for `operand`.
    pub fn expand(&self, desc: &TensorDescriptor, operand: Operand) -> TensorDescriptor {
        let flags = match operand {
            Operand::Lhs => &self.expand_lhs,
            Operand::Rhs => &self.expand_rhs,
        };
        let mut nb = desc.nb;
        for dim in 0..MAX_DIMS {
            if flags[dim] {
                nb[dim] = 0;
            }
        }
        TensorDescriptor {
            n_dims: MAX_DIMS,
            ne: self.shape,
            nb,
            ..*desc
        }
    }
}

/// Handles for a broadcast-resolved binary operator.
#[derive(Debug)]
pub struct ResolvedOperands<'ctx> {
    pub lhs: TensorHandle<'ctx>,
    pub rhs: TensorHandle<'ctx>,
    pub dst: TensorHandle<'ctx>,
}

impl ResolvedOperands<'_> {
    /// Destroys all three handles, reporting the first failure.
    pub fn destroy(self) -> Result<(), DispatchError> {
        let results = [self.lhs.destroy(), self.rhs.destroy(), self.dst.destroy()];
        results.into_iter().collect()
    }
}

/// Validates broadcast compatibility of `src0`, `src1` and `dst`, then
/// creates the three handles.
///
/// All shape checks happen before the first runtime call. The destination
/// handle always carries the destination's own shape and strides.
pub fn resolve<'ctx>(
    ctx: &'ctx DispatchContext,
    src0: &TensorDescriptor,
    src1: &TensorDescriptor,
    dst: &TensorDescriptor,
) -> Result<ResolvedOperands<'ctx>, DispatchError> {
    let plan = BroadcastPlan::compute(&src0.ne, &src1.ne)?;
    if plan.shape() != dst.ne {
        return Err(DispatchError::shape(
            "broadcast",
            format!(
                "operands combine to {:?} but the destination is {:?}",
                plan.shape(),
                dst.ne
            ),
        ));
    }

    let (lhs, rhs) = if plan.is_identity() {
        (*src0, *src1)
    } else {
        tracing::trace!(expansions = ?plan.expansions(), "broadcasting operands");
        (plan.expand(src0, Operand::Lhs), plan.expand(src1, Operand::Rhs))
    };

    Ok(ResolvedOperands {
        lhs: create_handle(ctx, &lhs)?,
        rhs: create_handle(ctx, &rhs)?,
        dst: create_handle(ctx, dst)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{DType, DevicePtr};

    #[test]
    fn test_equal_shapes_are_identity() {
        let plan = BroadcastPlan::compute(&[4, 3, 2, 1], &[4, 3, 2, 1]).unwrap();
        assert!(plan.is_identity());
        assert!(plan.expansions().is_empty());
    }

    #[test]
    fn test_both_sides_one_stays_one() {
        let plan = BroadcastPlan::compute(&[1, 3, 1, 1], &[1, 3, 1, 1]).unwrap();
        assert_eq!(plan.shape(), [1, 3, 1, 1]);
        assert!(plan.is_identity());
    }

    #[test]
    fn test_expansion_on_both_sides() {
        let plan = BroadcastPlan::compute(&[4, 1, 1, 1], &[1, 3, 1, 1]).unwrap();
        assert_eq!(plan.shape(), [4, 3, 1, 1]);
        assert_eq!(plan.expansions(), vec![(0, Operand::Rhs), (1, Operand::Lhs)]);
    }

    #[test]
    fn test_incompatible_names_dimension() {
        let err = BroadcastPlan::compute(&[3, 2, 1, 1], &[4, 2, 1, 1]).unwrap_err();
        assert!(matches!(err, DispatchError::Broadcast { dim: 0, lhs: 3, rhs: 4 }));
        let err = BroadcastPlan::compute(&[3, 2, 5, 1], &[3, 2, 2, 1]).unwrap_err();
        assert!(matches!(err, DispatchError::Broadcast { dim: 2, .. }));
    }

    #[test]
    fn test_expand_zeroes_strides() {
        let rhs = TensorDescriptor::contiguous(DType::F32, &[1, 2], DevicePtr(0x2000)).unwrap();
        let plan = BroadcastPlan::compute(&[3, 2, 1, 1], &rhs.ne).unwrap();
        let view = plan.expand(&rhs, Operand::Rhs);
        assert_eq!(view.ne, [3, 2, 1, 1]);
        assert_eq!(view.nb, [0, 4, 8, 8]);
        assert_eq!(view.data, rhs.data);
        let untouched = plan.expand(&rhs, Operand::Lhs);
        assert_eq!(untouched.nb, rhs.nb);
    }
}
