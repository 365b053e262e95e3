//! Frame graph execution.
//!
//! The executor drains a frame graph on a single thread: each iteration it
//! queries the ready set, records every ready pass into a pooled command
//! buffer on that pass's queue, then erases the executed passes so the next
//! iteration sees the newly unblocked ones. Cross-queue ordering is enforced
//! through exactly one primitive, the shared monotonic fence:
//!
//! - before a pass is recorded, the *other* queue's pending stack is scanned
//!   for a write to anything the pass reads;
//! - on a hit, everything pending on the producing queue is submitted with a
//!   fence signal, and the consuming queue's next submission waits on that
//!   value.
//!
//! Same-queue passes are ordered purely by submission order. Frames that
//! touch the backbuffer are wrapped in pre-recorded present to render-target
//! and render-target to present transition buffers.

use std::sync::Arc;

use crate::backend::{GpuCommandList, GpuDevice, GpuFence, GpuResource};
use crate::command::{CommandBufferLease, CommandBufferPool};
use crate::constants::ConstantPool;
use crate::context::{Command, RenderContext, ResourceBarrier};
use crate::descriptor::DescriptorAllocator;
use crate::error::GraphicsError;
use crate::graph::{FrameGraph, PassKind};
use crate::profiling::profile_scope;
use crate::types::{QueueClass, ResourceId, ResourceState};

/// Executor states. The machine runs Idle -> Recording -> Idle within one
/// [`FrameGraphExecutor::execute`] call; the field exists to catch
/// re-entrancy, which the single-threaded frame model forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorState {
    Idle,
    Recording,
}

/// A recorded, not yet submitted pass on a queue's pending stack.
struct PendingPass {
    name: String,
    writes: Vec<ResourceId>,
    lease: CommandBufferLease,
}

/// Per-queue submission state for one frame.
struct QueueState {
    class: QueueClass,
    pending: Vec<PendingPass>,
    wait_value: Option<u64>,
}

impl QueueState {
    fn new(class: QueueClass) -> Self {
        Self {
            class,
            pending: Vec::new(),
            wait_value: None,
        }
    }
}

/// Everything the executor borrows for the duration of one frame.
pub struct FrameContext<'a> {
    /// Command buffer pool leases are drawn from.
    pub commands: &'a CommandBufferPool,
    /// Transient descriptor allocator (must be mid-frame).
    pub descriptors: &'a mut DescriptorAllocator,
    /// Constant pool for per-draw data.
    pub constants: &'a mut ConstantPool,
    /// The image presented at the end of the frame (resource id 0).
    pub backbuffer: &'a Arc<GpuResource>,
}

/// Multi-queue frame graph executor.
///
/// Owns the shared fence and the in-flight command buffer leases; leases are
/// retired (returned to their pool) once the host has waited the frame fence,
/// via [`retire_submitted`](Self::retire_submitted).
pub struct FrameGraphExecutor {
    device: Arc<dyn GpuDevice>,
    state: ExecutorState,
    fence: GpuFence,
    next_fence_value: u64,
    in_flight: Vec<CommandBufferLease>,
}

impl FrameGraphExecutor {
    /// Create the executor and its shared fence.
    pub fn new(device: Arc<dyn GpuDevice>) -> Result<Self, GraphicsError> {
        let fence = device.create_fence(0)?;
        Ok(Self {
            device,
            state: ExecutorState::Idle,
            fence,
            next_fence_value: 1,
            in_flight: Vec::new(),
        })
    }

    /// The shared cross-queue fence.
    pub fn fence(&self) -> &GpuFence {
        &self.fence
    }

    /// Command buffers still owned by previously executed frames.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Return every submitted lease to its pool.
    ///
    /// Must only be called after the host has waited on the last frame's
    /// fence value, so the GPU no longer reads the buffers.
    pub fn retire_submitted(&mut self) {
        self.in_flight.clear();
    }

    /// Execute a built (and culled) frame graph to completion.
    ///
    /// Returns the fence value that is signaled once every submission of
    /// this frame has finished on the GPU.
    pub fn execute(
        &mut self,
        graph: &mut FrameGraph,
        mut frame: FrameContext<'_>,
    ) -> Result<u64, GraphicsError> {
        profile_scope!("frame_graph_execute");
        assert_eq!(
            self.state,
            ExecutorState::Idle,
            "execute() re-entered while a frame is recording"
        );
        self.state = ExecutorState::Recording;
        let device = self.device.clone();

        let mut queues = [
            QueueState::new(QueueClass::Graphics),
            QueueState::new(QueueClass::Compute),
        ];
        let mut submitted: Vec<CommandBufferLease> = Vec::new();

        // BeginFrame: wrap backbuffer frames in transition buffers. Both are
        // pre-recorded here; the present-side one is held back until
        // CloseFrame.
        let mut present_transition = None;
        if graph.touches_backbuffer() {
            let acquire = frame.commands.get_direct()?;
            acquire.record(&Command::Barriers(vec![ResourceBarrier {
                resource: Arc::clone(frame.backbuffer),
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            }]));
            acquire.close();
            queues[0].pending.push(PendingPass {
                name: "backbuffer_acquire".to_string(),
                writes: Vec::new(),
                lease: acquire,
            });

            let present = frame.commands.get_direct()?;
            present.record(&Command::Barriers(vec![ResourceBarrier {
                resource: Arc::clone(frame.backbuffer),
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            }]));
            present.close();
            present_transition = Some(present);
        }

        // Drain loop: record ready passes, erase them, recompute readiness.
        loop {
            let ready = graph.query_complete_render_passes();
            if ready.is_empty() {
                break;
            }
            for &handle in &ready {
                let pass = graph.pass(handle);
                let kind = pass.kind();
                let name = pass.name().to_string();
                let reads = pass.reads().to_vec();
                let writes = pass.writes().to_vec();
                let (this_queue, other_queue) = match kind {
                    PassKind::Graphics => (0, 1),
                    PassKind::Compute => (1, 0),
                };

                // Read-after-write hazard against the other queue's pending
                // stack. Only the graphics and compute queues are scanned: a
                // copy-queue producer consumed by both in one frame would go
                // undetected, which is why copy work stays on the
                // synchronous upload path and out of pass scheduling.
                let hazard = queues[other_queue]
                    .pending
                    .iter()
                    .any(|pending| pending.writes.iter().any(|write| reads.contains(write)));
                if hazard {
                    let value = self.bump_fence_value();
                    log::debug!(
                        "executor: '{}' waits {:?} work (fence value {})",
                        name,
                        queues[other_queue].class,
                        value
                    );
                    flush_queue(
                        &device,
                        &self.fence,
                        &mut queues[other_queue],
                        Some(value),
                        &mut submitted,
                    )?;
                    let wait = &mut queues[this_queue].wait_value;
                    *wait = Some(wait.map_or(value, |current| current.max(value)));
                }

                let lease = match kind {
                    PassKind::Graphics => frame.commands.get_direct()?,
                    PassKind::Compute => frame.commands.get_compute()?,
                };
                {
                    profile_scope!("record_pass");
                    let mut ctx = match kind {
                        PassKind::Graphics => RenderContext::graphics(
                            device.as_ref(),
                            lease.list(),
                            &mut *frame.descriptors,
                            &mut *frame.constants,
                        ),
                        PassKind::Compute => RenderContext::compute(
                            device.as_ref(),
                            lease.list(),
                            &mut *frame.descriptors,
                            &mut *frame.constants,
                        ),
                    };
                    graph.pass_mut(handle).record(&mut ctx);
                }
                lease.close();
                log::trace!("executor: recorded '{}' on {:?}", name, kind);
                queues[this_queue].pending.push(PendingPass {
                    name,
                    writes,
                    lease,
                });
            }
            graph.erase_render_passes(&ready);
        }

        // CloseFrame: flush what is still pending and signal the frame
        // fence. The compute tail signals its own value and the graphics
        // tail waits on it, so one host wait covers both queues.
        if let Some(present) = present_transition.take() {
            queues[0].pending.push(PendingPass {
                name: "backbuffer_present".to_string(),
                writes: Vec::new(),
                lease: present,
            });
        }
        if !queues[1].pending.is_empty() {
            let value = self.bump_fence_value();
            flush_queue(
                &device,
                &self.fence,
                &mut queues[1],
                Some(value),
                &mut submitted,
            )?;
            let wait = &mut queues[0].wait_value;
            *wait = Some(wait.map_or(value, |current| current.max(value)));
        }
        let frame_value = self.bump_fence_value();
        flush_queue(
            &device,
            &self.fence,
            &mut queues[0],
            Some(frame_value),
            &mut submitted,
        )?;

        self.in_flight.extend(submitted);
        self.state = ExecutorState::Idle;
        log::debug!(
            "executor: frame closed (fence value {}, {} buffers in flight)",
            frame_value,
            self.in_flight.len()
        );
        Ok(frame_value)
    }

    fn bump_fence_value(&mut self) -> u64 {
        let value = self.next_fence_value;
        self.next_fence_value += 1;
        value
    }
}

impl std::fmt::Debug for FrameGraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraphExecutor")
            .field("state", &self.state)
            .field("next_fence_value", &self.next_fence_value)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Submit a queue's pending stack in recording order.
///
/// An empty stack with a pending signal still submits, so fence values stay
/// monotonic even for frames that leave a queue idle.
fn flush_queue(
    device: &Arc<dyn GpuDevice>,
    fence: &GpuFence,
    queue: &mut QueueState,
    signal: Option<u64>,
    submitted: &mut Vec<CommandBufferLease>,
) -> Result<(), GraphicsError> {
    if queue.pending.is_empty() && signal.is_none() {
        return Ok(());
    }
    let lists: Vec<&GpuCommandList> = queue.pending.iter().map(|p| p.lease.list()).collect();
    let wait = queue.wait_value.take().map(|value| (fence, value));
    device.submit(
        queue.class,
        &lists,
        wait,
        signal.map(|value| (fence, value)),
    )?;
    log::trace!(
        "executor: submitted {} list(s) on {:?}: [{}]",
        lists.len(),
        queue.class,
        queue
            .pending
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    submitted.extend(queue.pending.drain(..).map(|p| p.lease));
    Ok(())
}
