//! Pass-facing contexts and the recorded command vocabulary.
//!
//! Setup callbacks receive a [`ResourceContext`] to declare their resource
//! accesses and create frame resources; render callbacks receive a
//! [`RenderContext`], a tagged variant whose `Graphics` and `Compute` arms
//! expose the operations legal on the matching queue. Operations shared by
//! both arms live on the enum itself.
//!
//! Render callbacks record only: they must never wait on the host or the
//! GPU. Transition barriers are batched per context and flushed either
//! explicitly or before the next draw/dispatch.

use std::sync::Arc;

use crate::backend::{GpuCommandList, GpuDevice, GpuResource};
use crate::command::CommandBufferPool;
use crate::constants::{ConstantAllocation, ConstantPool};
use crate::descriptor::{DescriptorAllocator, DescriptorHandle, DescriptorTable};
use crate::error::GraphicsError;
use crate::graph::MAX_PASS_RESOURCES;
use crate::resource::ResourcePool;
use crate::types::{IndexFormat, ResourceFormat, ResourceId, ResourceLifetime, ResourceState};

/// Opaque handle to a collaborator-owned pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(u64);

impl PipelineHandle {
    /// Wrap a raw registered id.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw registered id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a collaborator-owned root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSignatureHandle(u64);

impl RootSignatureHandle {
    /// Wrap a raw registered id.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw registered id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A state transition for one resource.
#[derive(Debug, Clone)]
pub struct ResourceBarrier {
    /// Resource being transitioned.
    pub resource: Arc<GpuResource>,
    /// State the resource is in.
    pub before: ResourceState,
    /// State the resource transitions to.
    pub after: ResourceState,
}

/// A recorded GPU command.
#[derive(Debug, Clone)]
pub enum Command {
    /// Bind a pipeline state object.
    SetPipelineState(PipelineHandle),
    /// Bind a root signature.
    SetRootSignature(RootSignatureHandle),
    /// Bind a vertex buffer.
    SetVertexBuffer {
        /// Bound buffer.
        buffer: Arc<GpuResource>,
        /// Vertex stride in bytes.
        stride: u32,
        /// Bound byte range.
        size: u64,
    },
    /// Bind an index buffer.
    SetIndexBuffer {
        /// Bound buffer.
        buffer: Arc<GpuResource>,
        /// Index element width.
        format: IndexFormat,
        /// Bound byte range.
        size: u64,
    },
    /// Bind a constant block at a root slot.
    SetConstants {
        /// Root slot.
        slot: u32,
        /// Constant block to bind.
        allocation: ConstantAllocation,
    },
    /// Bind a descriptor table at a root slot.
    SetShaderResources {
        /// Root slot.
        slot: u32,
        /// Bound table.
        table: DescriptorTable,
    },
    /// Non-indexed draw.
    Draw {
        /// Vertices per instance.
        vertex_count: u32,
        /// Instance count.
        instance_count: u32,
        /// First vertex.
        first_vertex: u32,
        /// First instance.
        first_instance: u32,
    },
    /// Indexed draw.
    DrawIndexed {
        /// Indices per instance.
        index_count: u32,
        /// Instance count.
        instance_count: u32,
        /// First index.
        first_index: u32,
        /// Added to each index before vertex lookup.
        base_vertex: i32,
        /// First instance.
        first_instance: u32,
    },
    /// Compute dispatch.
    Dispatch {
        /// Thread groups in x.
        x: u32,
        /// Thread groups in y.
        y: u32,
        /// Thread groups in z.
        z: u32,
    },
    /// A batch of transition barriers.
    Barriers(Vec<ResourceBarrier>),
    /// Buffer-to-buffer copy (upload path).
    CopyBuffer {
        /// Source buffer.
        src: Arc<GpuResource>,
        /// Destination buffer.
        dst: Arc<GpuResource>,
        /// Bytes to copy.
        size: u64,
    },
}

// ===========================================================================
// Resource context (setup phase)
// ===========================================================================

/// Context handed to setup callbacks.
///
/// Every resource a pass touches must be declared through [`reads`] /
/// [`writes`]; the accumulated arrays seed the frame graph. Resource
/// creation goes through the pool factories, constants through the constant
/// pool.
///
/// [`reads`]: ResourceContext::reads
/// [`writes`]: ResourceContext::writes
pub struct ResourceContext<'a> {
    resources: &'a mut ResourcePool,
    constants: &'a mut ConstantPool,
    commands: &'a CommandBufferPool,
    reads: Vec<ResourceId>,
    writes: Vec<ResourceId>,
}

impl<'a> ResourceContext<'a> {
    pub(crate) fn new(
        resources: &'a mut ResourcePool,
        constants: &'a mut ConstantPool,
        commands: &'a CommandBufferPool,
    ) -> Self {
        Self {
            resources,
            constants,
            commands,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Declare that the pass reads `id`.
    ///
    /// # Panics
    ///
    /// Panics past the per-pass read budget.
    pub fn reads(&mut self, id: ResourceId) {
        if self.reads.contains(&id) {
            return;
        }
        assert!(
            self.reads.len() < MAX_PASS_RESOURCES,
            "render pass exceeds the {MAX_PASS_RESOURCES}-resource read budget"
        );
        self.reads.push(id);
    }

    /// Declare that the pass writes `id`.
    ///
    /// # Panics
    ///
    /// Panics past the per-pass write budget.
    pub fn writes(&mut self, id: ResourceId) {
        if self.writes.contains(&id) {
            return;
        }
        assert!(
            self.writes.len() < MAX_PASS_RESOURCES,
            "render pass exceeds the {MAX_PASS_RESOURCES}-resource write budget"
        );
        self.writes.push(id);
    }

    /// Create a vertex buffer filled with `data` (synchronous upload).
    pub fn create_vertex_buffer(
        &mut self,
        data: &[u8],
        stride: u32,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        self.resources
            .create_vertex_buffer(self.commands, data, stride)
    }

    /// Create an index buffer filled with `data` (synchronous upload).
    pub fn create_index_buffer(
        &mut self,
        data: &[u8],
        format: IndexFormat,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        self.resources
            .create_index_buffer(self.commands, data, format)
    }

    /// Create a depth buffer.
    pub fn create_depth_stencil(
        &mut self,
        width: u32,
        height: u32,
        format: ResourceFormat,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        self.resources
            .create_depth_stencil(width, height, format, ResourceLifetime::Transient)
    }

    /// Allocate a constant block and copy `data` into it.
    pub fn copy_constants<T: bytemuck::Pod>(
        &mut self,
        data: &[T],
    ) -> Result<ConstantAllocation, GraphicsError> {
        self.constants.copy_constants(data)
    }

    /// Release a resource handle.
    pub fn release_resource(&mut self, resource: Arc<GpuResource>) {
        self.resources.release_resource(resource);
    }

    /// Attach a debug name to a resource.
    pub fn set_debug_name(&self, resource: &GpuResource, name: &str) {
        self.resources.set_debug_name(resource, name);
    }

    /// Declared reads so far.
    pub fn declared_reads(&self) -> &[ResourceId] {
        &self.reads
    }

    /// Declared writes so far.
    pub fn declared_writes(&self) -> &[ResourceId] {
        &self.writes
    }

    pub(crate) fn into_declarations(self) -> (Vec<ResourceId>, Vec<ResourceId>) {
        (self.reads, self.writes)
    }
}

// ===========================================================================
// Render contexts (record phase)
// ===========================================================================

/// Shared recording state behind both context arms.
struct Recorder<'a> {
    device: &'a dyn GpuDevice,
    list: &'a GpuCommandList,
    descriptors: &'a mut DescriptorAllocator,
    constants: &'a mut ConstantPool,
    pending_barriers: Vec<ResourceBarrier>,
}

impl Recorder<'_> {
    fn record(&self, command: &Command) {
        self.device.record(self.list, command);
    }

    fn barrier(&mut self, resource: &Arc<GpuResource>, before: ResourceState, after: ResourceState) {
        self.pending_barriers.push(ResourceBarrier {
            resource: Arc::clone(resource),
            before,
            after,
        });
    }

    fn flush_barriers(&mut self) {
        if self.pending_barriers.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending_barriers);
        self.record(&Command::Barriers(batch));
    }
}

impl Drop for Recorder<'_> {
    fn drop(&mut self) {
        // A pass that batched barriers but never drew still gets them
        // recorded before its buffer is closed.
        self.flush_barriers();
    }
}

/// Context for recording a graphics pass.
pub struct GraphicsContext<'a> {
    recorder: Recorder<'a>,
}

/// Context for recording a compute pass.
pub struct ComputeContext<'a> {
    recorder: Recorder<'a>,
}

/// Context handed to render callbacks.
///
/// The variant matches the pass kind; operations legal on both queues are
/// available directly on the enum, queue-specific ones only through the
/// matching arm.
pub enum RenderContext<'a> {
    /// Graphics-queue recording.
    Graphics(GraphicsContext<'a>),
    /// Compute-queue recording.
    Compute(ComputeContext<'a>),
}

impl<'a> RenderContext<'a> {
    pub(crate) fn graphics(
        device: &'a dyn GpuDevice,
        list: &'a GpuCommandList,
        descriptors: &'a mut DescriptorAllocator,
        constants: &'a mut ConstantPool,
    ) -> Self {
        Self::Graphics(GraphicsContext {
            recorder: Recorder {
                device,
                list,
                descriptors,
                constants,
                pending_barriers: Vec::new(),
            },
        })
    }

    pub(crate) fn compute(
        device: &'a dyn GpuDevice,
        list: &'a GpuCommandList,
        descriptors: &'a mut DescriptorAllocator,
        constants: &'a mut ConstantPool,
    ) -> Self {
        Self::Compute(ComputeContext {
            recorder: Recorder {
                device,
                list,
                descriptors,
                constants,
                pending_barriers: Vec::new(),
            },
        })
    }

    fn recorder(&mut self) -> &mut Recorder<'a> {
        match self {
            Self::Graphics(ctx) => &mut ctx.recorder,
            Self::Compute(ctx) => &mut ctx.recorder,
        }
    }

    /// Get this context as a graphics context, if it is one.
    pub fn as_graphics_mut(&mut self) -> Option<&mut GraphicsContext<'a>> {
        if let Self::Graphics(ctx) = self {
            Some(ctx)
        } else {
            None
        }
    }

    /// Get this context as a compute context, if it is one.
    pub fn as_compute_mut(&mut self) -> Option<&mut ComputeContext<'a>> {
        if let Self::Compute(ctx) = self {
            Some(ctx)
        } else {
            None
        }
    }

    /// Check if this is a graphics context.
    pub fn is_graphics(&self) -> bool {
        matches!(self, Self::Graphics(_))
    }

    /// Check if this is a compute context.
    pub fn is_compute(&self) -> bool {
        matches!(self, Self::Compute(_))
    }

    /// Bind a pipeline state object.
    pub fn set_pipeline_state(&mut self, pipeline: PipelineHandle) {
        self.recorder().record(&Command::SetPipelineState(pipeline));
    }

    /// Bind a root signature.
    pub fn set_root_signature(&mut self, root: RootSignatureHandle) {
        self.recorder().record(&Command::SetRootSignature(root));
    }

    /// Bind a constant block at a root slot.
    pub fn set_constants(&mut self, slot: u32, allocation: ConstantAllocation) {
        self.recorder()
            .record(&Command::SetConstants { slot, allocation });
    }

    /// Bind a descriptor table at a root slot.
    pub fn set_shader_resources(&mut self, slot: u32, table: DescriptorTable) {
        self.recorder()
            .record(&Command::SetShaderResources { slot, table });
    }

    /// Batch a transition barrier.
    pub fn resource_barrier(
        &mut self,
        resource: &Arc<GpuResource>,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.recorder().barrier(resource, before, after);
    }

    /// Record every batched barrier.
    pub fn flush_resource_barriers(&mut self) {
        self.recorder().flush_barriers();
    }

    /// Allocate a transient constant-buffer view over `allocation`.
    pub fn create_cbv(&mut self, allocation: &ConstantAllocation) -> DescriptorHandle {
        let recorder = self.recorder();
        recorder.descriptors.create_cbv(recorder.constants, allocation)
    }

    /// Transient descriptor allocator for this frame.
    pub fn descriptors(&mut self) -> &mut DescriptorAllocator {
        &mut *self.recorder().descriptors
    }

    /// Constant pool for this frame.
    pub fn constants(&mut self) -> &mut ConstantPool {
        &mut *self.recorder().constants
    }
}

impl GraphicsContext<'_> {
    /// Bind a vertex buffer.
    pub fn set_vertex_buffer(&mut self, buffer: &Arc<GpuResource>, stride: u32, size: u64) {
        self.recorder.record(&Command::SetVertexBuffer {
            buffer: Arc::clone(buffer),
            stride,
            size,
        });
    }

    /// Bind an index buffer.
    pub fn set_index_buffer(&mut self, buffer: &Arc<GpuResource>, format: IndexFormat, size: u64) {
        self.recorder.record(&Command::SetIndexBuffer {
            buffer: Arc::clone(buffer),
            format,
            size,
        });
    }

    /// Draw non-indexed geometry. Flushes batched barriers first.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.recorder.flush_barriers();
        self.recorder.record(&Command::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        });
    }

    /// Draw indexed geometry. Flushes batched barriers first.
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32) {
        self.recorder.flush_barriers();
        self.recorder.record(&Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex: 0,
            first_instance: 0,
        });
    }
}

impl ComputeContext<'_> {
    /// Dispatch thread groups. Flushes batched barriers first.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.recorder.flush_barriers();
        self.recorder.record(&Command::Dispatch { x, y, z });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::caps::DeviceCapabilities;
    use crate::types::ResourceDescriptor;

    struct Fixture {
        device: Arc<DummyDevice>,
        descriptors: DescriptorAllocator,
        constants: ConstantPool,
        resource: Arc<GpuResource>,
        list: GpuCommandList,
        _heaps: crate::heap::HeapManager,
    }

    fn fixture() -> Fixture {
        let device = Arc::new(DummyDevice::new());
        let caps: DeviceCapabilities = device.capabilities().clone();
        let mut descriptors = DescriptorAllocator::new(device.clone(), &caps).unwrap();
        descriptors.prepare();
        let constants = ConstantPool::new(device.clone(), &caps).unwrap();

        let mut heaps = crate::heap::HeapManager::new(device.clone());
        let resource = heaps
            .create_resource(&ResourceDescriptor::buffer(1024))
            .unwrap();

        let allocator = device
            .create_command_allocator(crate::types::QueueClass::Graphics)
            .unwrap();
        let list = device
            .create_command_list(crate::types::QueueClass::Graphics, &allocator)
            .unwrap();
        device.begin_command_list(&list, &allocator);

        Fixture {
            device,
            descriptors,
            constants,
            resource,
            list,
            _heaps: heaps,
        }
    }

    #[test]
    fn test_graphics_only_ops_are_gated() {
        let mut f = fixture();
        let mut ctx = RenderContext::compute(
            f.device.as_ref(),
            &f.list,
            &mut f.descriptors,
            &mut f.constants,
        );

        assert!(ctx.is_compute());
        assert!(ctx.as_graphics_mut().is_none());
        assert!(ctx.as_compute_mut().is_some());
    }

    #[test]
    fn test_draw_flushes_pending_barriers() {
        let mut f = fixture();
        {
            let mut ctx = RenderContext::graphics(
                f.device.as_ref(),
                &f.list,
                &mut f.descriptors,
                &mut f.constants,
            );
            ctx.resource_barrier(
                &f.resource,
                ResourceState::Common,
                ResourceState::ShaderResource,
            );
            let gfx = ctx.as_graphics_mut().unwrap();
            gfx.draw(3, 1);
        }

        let commands = f.device.recorded_commands(&f.list);
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], Command::Barriers(ref b) if b.len() == 1));
        assert!(matches!(commands[1], Command::Draw { vertex_count: 3, .. }));
    }

    #[test]
    fn test_drop_flushes_remaining_barriers() {
        let mut f = fixture();
        {
            let mut ctx = RenderContext::graphics(
                f.device.as_ref(),
                &f.list,
                &mut f.descriptors,
                &mut f.constants,
            );
            ctx.resource_barrier(
                &f.resource,
                ResourceState::Common,
                ResourceState::CopySource,
            );
            // No draw: the context drop must still record the batch.
        }

        let commands = f.device.recorded_commands(&f.list);
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Command::Barriers(_)));
    }

    #[test]
    fn test_shared_ops_record_on_both_arms() {
        let mut f = fixture();
        {
            let mut ctx = RenderContext::compute(
                f.device.as_ref(),
                &f.list,
                &mut f.descriptors,
                &mut f.constants,
            );
            ctx.set_pipeline_state(PipelineHandle::from_raw(7));
            let allocation = ctx.constants().copy_constants(&[1u32, 2, 3, 4]).unwrap();
            ctx.set_constants(0, allocation);
            ctx.as_compute_mut().unwrap().dispatch(8, 8, 1);
        }

        let commands = f.device.recorded_commands(&f.list);
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            commands[0],
            Command::SetPipelineState(p) if p.raw() == 7
        ));
        assert!(matches!(commands[1], Command::SetConstants { slot: 0, .. }));
        assert!(matches!(commands[2], Command::Dispatch { x: 8, y: 8, z: 1 }));
    }
}
