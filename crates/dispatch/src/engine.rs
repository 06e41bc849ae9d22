// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph evaluation with a type-state pipeline.
//!
//! ```text
//! GraphExecutor<Idle>
//!     │  .bind(graph)      allocate + upload tensors
//!     ▼
//! GraphExecutor<Bound>
//!     │  .run()            dispatch nodes, synchronize, download outputs
//!     ▼
//!   GraphOutput
//! ```
//!
//! Each state transition consumes the old value and returns a new one,
//! making invalid state sequences a compile error.

use crate::{check, compute_forward, DispatchConfig, DispatchContext, DispatchError, DispatchMetrics, OpMetrics, Phase};
use device_runtime::{DeviceRuntime, RuntimeAllocator};
use graph_ir::{graph::Validated, ComputeGraph};
use memory_manager::{MemoryPool, PoolStats};
use std::sync::Arc;
use std::time::Instant;
use tensor_core::{DevicePtr, Tensor, TensorDescriptor, MAX_DIMS};

// ── Type-state markers ─────────────────────────────────────────

/// Executor is created but no graph is bound.
#[derive(Debug)]
pub struct Idle;

/// A graph's tensors live on the device and it can be run.
#[derive(Debug)]
pub struct Bound;

/// Sealed trait for executor states.
pub trait ExecutorState: std::fmt::Debug {}
impl ExecutorState for Idle {}
impl ExecutorState for Bound {}

// ── Output ─────────────────────────────────────────────────────

/// The result of one graph evaluation.
#[derive(Debug)]
pub struct GraphOutput {
    /// Output tensors by name, in the graph's output order.
    pub tensors: Vec<(String, Tensor)>,
    /// Per-node timing and launch metrics.
    pub metrics: DispatchMetrics,
}

impl GraphOutput {
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

// ── Device storage ─────────────────────────────────────────────

/// Device buffers owned by a bound graph. Freed on drop.
struct DeviceBuffers {
    runtime: Arc<dyn DeviceRuntime>,
    ptrs: Vec<DevicePtr>,
}

impl DeviceBuffers {
    fn alloc(&mut self, size: usize) -> Result<DevicePtr, DispatchError> {
        let ptr = self.runtime.malloc(size).map_err(|status| DispatchError::Device {
            op: "Malloc".into(),
            phase: Phase::Malloc,
            status,
        })?;
        self.ptrs.push(ptr);
        Ok(ptr)
    }

    fn len(&self) -> usize {
        self.ptrs.len()
    }
}

impl Drop for DeviceBuffers {
    fn drop(&mut self) {
        for ptr in self.ptrs.drain(..) {
            let status = self.runtime.free(ptr);
            if !status.is_success() {
                tracing::error!(%ptr, %status, "failed to free tensor buffer");
            }
        }
    }
}

// ── Executor ───────────────────────────────────────────────────

/// Evaluates a validated graph on one device stream.
///
/// # Example
/// ```no_run
/// use device_runtime::emu::Emulator;
/// use graph_ir::GraphLoader;
/// use npu_dispatch::{DispatchConfig, GraphExecutor};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let graph = GraphLoader::load(Path::new("graphs/bias_add.json"))?;
/// let output = GraphExecutor::new(Arc::new(Emulator::new()), DispatchConfig::default())?
///     .bind(graph)?
///     .run()?;
/// println!("{}", output.metrics.summary());
/// # Ok(())
/// # }
/// ```
pub struct GraphExecutor<S: ExecutorState = Idle> {
    config: DispatchConfig,
    runtime: Arc<dyn DeviceRuntime>,
    pool: Arc<MemoryPool>,
    ctx: DispatchContext,
    graph: Option<ComputeGraph<Validated>>,
    descriptors: Vec<TensorDescriptor>,
    buffers: Option<DeviceBuffers>,
    _state: std::marker::PhantomData<S>,
}

// ── Idle → Bound ───────────────────────────────────────────────

impl GraphExecutor<Idle> {
    /// Creates the scratch pool and a dispatch context on `runtime`.
    pub fn new(runtime: Arc<dyn DeviceRuntime>, config: DispatchConfig) -> Result<Self, DispatchError> {
        let budget = config.parse_pool_budget()?;
        let pool = Arc::new(MemoryPool::new(Arc::new(RuntimeAllocator::new(runtime.clone())), budget));
        let ctx = DispatchContext::with_device_id(runtime.clone(), pool.clone(), config.device_id)?;
        tracing::info!(device_id = config.device_id, "executor created, scratch budget {budget}");
        Ok(Self {
            config,
            runtime,
            pool,
            ctx,
            graph: None,
            descriptors: Vec::new(),
            buffers: None,
            _state: std::marker::PhantomData,
        })
    }

    /// Allocates one device buffer per non-view tensor, builds every
    /// descriptor and uploads initial data.
    pub fn bind(self, graph: ComputeGraph<Validated>) -> Result<GraphExecutor<Bound>, DispatchError> {
        tracing::info!("{}", graph.summary());
        let mut buffers = DeviceBuffers {
            runtime: self.runtime.clone(),
            ptrs: Vec::new(),
        };
        let mut descriptors: Vec<TensorDescriptor> = Vec::with_capacity(graph.tensors.len());

        for tensor in &graph.tensors {
            let desc = match &tensor.view {
                None => {
                    let ptr = buffers.alloc(tensor.size_bytes().max(1))?;
                    TensorDescriptor::contiguous(tensor.dtype, &tensor.ne, ptr)?
                }
                Some(view) => {
                    let base = descriptors.get(view.base).copied().ok_or_else(|| {
                        DispatchError::Config(format!("view '{}' precedes its base", tensor.name))
                    })?;
                    let desc = match &view.nb {
                        Some(nb) => base.view(&tensor.ne, nb, view.offset)?,
                        None => TensorDescriptor {
                            offset: base.offset + view.offset,
                            ..TensorDescriptor::contiguous(tensor.dtype, &tensor.ne, base.data)?
                        },
                    };
                    desc.validate()?;
                    if desc.offset + desc.span_bytes() > base.offset + base.packed_bytes() {
                        return Err(DispatchError::shape(
                            &tensor.name,
                            format!("view {desc} overruns its base {base}"),
                        ));
                    }
                    desc
                }
            };
            if let Some(values) = &tensor.data {
                let host = Tensor::from_values(tensor.dtype, &tensor.ne, values)?;
                self.upload(&desc, &host)?;
            }
            tracing::debug!(tensor = %tensor.name, %desc, "tensor bound");
            descriptors.push(desc);
        }
        tracing::info!(buffers = buffers.len(), "graph bound");

        Ok(GraphExecutor {
            config: self.config,
            runtime: self.runtime,
            pool: self.pool,
            ctx: self.ctx,
            graph: Some(graph),
            descriptors,
            buffers: Some(buffers),
            _state: std::marker::PhantomData,
        })
    }
}

// ── Bound: run ─────────────────────────────────────────────────

impl GraphExecutor<Bound> {
    /// Overwrites a packed tensor's contents before the next run.
    pub fn set_input(&self, name: &str, values: &Tensor) -> Result<(), DispatchError> {
        let (index, desc) = self.lookup(name)?;
        let tensor = &self.bound_graph()?.tensors[index];
        if values.dtype() != desc.dtype || values.num_elements() != desc.num_elements() {
            return Err(DispatchError::shape(
                name,
                format!(
                    "input {}{:?} does not match {}{:?}",
                    values.dtype(),
                    values.ne(),
                    desc.dtype,
                    tensor.ne
                ),
            ));
        }
        if !desc.is_contiguous() {
            return Err(tensor_core::TensorError::NotContiguous { op: "set_input" }.into());
        }
        self.upload(&desc, values)
    }

    /// Reads any graph tensor back to the host in packed order.
    pub fn read_tensor(&self, name: &str) -> Result<Tensor, DispatchError> {
        let (index, desc) = self.lookup(name)?;
        self.ctx.synchronize()?;
        let tensor = &self.bound_graph()?.tensors[index];
        let storage = self
            .runtime
            .memcpy_d2h(desc.data, desc.offset + desc.span_bytes())
            .map_err(|status| DispatchError::Device {
                op: "MemcpyD2H".into(),
                phase: Phase::Memcpy,
                status,
            })?;
        Ok(Tensor::from_bytes(desc.dtype, &tensor.ne, gather(&desc, &storage))?)
    }

    /// Dispatches every node in order, then downloads the outputs.
    ///
    /// With profiling enabled the stream is synchronized after each node, so
    /// per-node durations include device time and a failing kernel is
    /// attributed to its node. The first error aborts the run.
    pub fn run(&self) -> Result<GraphOutput, DispatchError> {
        let run_start = Instant::now();
        let graph = self.bound_graph()?;
        let profiling = self.config.enable_profiling;
        let mut metrics = DispatchMetrics::new();
        self.ctx.take_counters();

        tracing::debug!("running '{}': {} nodes", graph.name, graph.num_nodes());
        for node in graph.iter_nodes() {
            let bound = node.bind(&self.descriptors)?;
            let start = Instant::now();
            let result = compute_forward(&self.ctx, &bound).and_then(|()| {
                if profiling {
                    self.ctx.synchronize()
                } else {
                    Ok(())
                }
            });
            if let Err(e) = result {
                tracing::error!(node = %node.name, op = %node.op, "node failed: {e}");
                return Err(e);
            }
            let counters = self.ctx.take_counters();
            metrics.record_op(OpMetrics {
                node: node.name.clone(),
                op: node.op.to_string(),
                duration: start.elapsed(),
                launches: counters.launches,
                scratch_bytes: counters.scratch_bytes,
            });
        }
        self.ctx.synchronize()?;

        let tensors = graph
            .outputs
            .iter()
            .map(|&i| {
                let name = graph.tensors[i].name.clone();
                let value = self.read_tensor(&name)?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, DispatchError>>()?;

        metrics.finalise(run_start.elapsed());
        tracing::info!("{}", metrics.summary());
        tracing::debug!("{}", self.pool.stats().summary());
        Ok(GraphOutput { tensors, metrics })
    }

    /// The bound graph.
    pub fn graph(&self) -> Option<&ComputeGraph<Validated>> {
        self.graph.as_ref()
    }

    /// Descriptor of a bound tensor.
    pub fn descriptor(&self, name: &str) -> Option<&TensorDescriptor> {
        let graph = self.graph.as_ref()?;
        graph.tensor_index(name).and_then(|i| self.descriptors.get(i))
    }

    fn lookup(&self, name: &str) -> Result<(usize, TensorDescriptor), DispatchError> {
        let graph = self.bound_graph()?;
        graph
            .tensor_index(name)
            .and_then(|i| self.descriptors.get(i).map(|d| (i, *d)))
            .ok_or_else(|| {
                graph_ir::GraphError::UnknownTensor {
                    context: "executor".into(),
                    tensor: name.into(),
                }
                .into()
            })
    }

    fn bound_graph(&self) -> Result<&ComputeGraph<Validated>, DispatchError> {
        self.graph
            .as_ref()
            .ok_or_else(|| DispatchError::Config("no graph bound".into()))
    }
}

// ── Any state ──────────────────────────────────────────────────

impl<S: ExecutorState> GraphExecutor<S> {
    pub fn context(&self) -> &DispatchContext {
        &self.ctx
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn upload(&self, desc: &TensorDescriptor, host: &Tensor) -> Result<(), DispatchError> {
        check(
            self.runtime
                .memcpy_h2d(desc.data.add(desc.offset), host.as_bytes(), self.ctx.stream()),
            "MemcpyH2D",
            Phase::Memcpy,
        )
    }
}

impl<S: ExecutorState> std::fmt::Debug for GraphExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("state", &std::any::type_name::<S>())
            .field("device_id", &self.config.device_id)
            .field("graph", &self.graph.as_ref().map(|g| g.name.as_str()))
            .field("tensors", &self.descriptors.len())
            .finish()
    }
}

/// Copies the elements `desc` addresses out of `storage`, which starts at
/// `desc.data`, into packed graph order.
pub(crate) fn gather(desc: &TensorDescriptor, storage: &[u8]) -> Vec<u8> {
    let elem = desc.dtype.size_bytes();
    let mut out = Vec::with_capacity(desc.packed_bytes());
    let mut idx = [0usize; MAX_DIMS];
    for _ in 0..desc.num_elements() {
        let at = desc.offset + (0..MAX_DIMS).map(|d| idx[d] * desc.nb[d]).sum::<usize>();
        out.extend_from_slice(&storage[at..at + elem]);
        for d in 0..MAX_DIMS {
            idx[d] += 1;
            if idx[d] < desc.ne[d] {
                break;
            }
            idx[d] = 0;
        }
    }
    out
}
