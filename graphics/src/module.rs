//! The graphics module: per-frame orchestration.
//!
//! [`GraphicsModule`] owns the device and every allocator, and exposes the
//! single entry point the application loop calls once per frame:
//! [`run`](GraphicsModule::run). A frame proceeds as:
//!
//! 1. wait for the previous frame's fence (the CPU runs at most one frame
//!    ahead of the GPU), then retire its command buffers, transients and
//!    constants;
//! 2. open the descriptor frame;
//! 3. build the graph (setup callbacks run here, synchronously);
//! 4. cull passes nothing consumes;
//! 5. execute the graph across the graphics and compute queues;
//! 6. close the descriptor frame.
//!
//! Any error out of `run` means a GPU-level failure; the surrounding
//! application must treat it as fatal, flush logs and terminate.

use std::sync::Arc;

use crate::backend::{GpuDevice, GpuResource};
use crate::command::CommandBufferPool;
use crate::constants::ConstantPool;
use crate::descriptor::DescriptorAllocator;
use crate::error::GraphicsError;
use crate::graph::{FrameContext, FrameGraphBuilder, FrameGraphExecutor};
use crate::heap::HeapStatistics;
use crate::profiling::{frame_mark, profile_scope};
use crate::resource::ResourcePool;
use crate::types::{ResourceDescriptor, ResourceFlags, ResourceFormat, ResourceState};

/// Owns the frame-graph engine and drives it once per frame.
pub struct GraphicsModule {
    device: Arc<dyn GpuDevice>,
    resources: ResourcePool,
    descriptors: DescriptorAllocator,
    constants: ConstantPool,
    commands: CommandBufferPool,
    executor: FrameGraphExecutor,
    backbuffer: Arc<GpuResource>,
    frame_index: u64,
    last_frame_fence: u64,
}

impl GraphicsModule {
    /// Create the module around an externally created backbuffer (the
    /// swap-chain image the application's bootstrap layer owns).
    pub fn with_backbuffer(
        device: Arc<dyn GpuDevice>,
        backbuffer: Arc<GpuResource>,
    ) -> Result<Self, GraphicsError> {
        let caps = device.capabilities().clone();
        let resources = ResourcePool::new(device.clone())?;
        let descriptors = DescriptorAllocator::new(device.clone(), &caps)?;
        let constants = ConstantPool::new(device.clone(), &caps)?;
        let commands = CommandBufferPool::new(device.clone());
        let executor = FrameGraphExecutor::new(device.clone())?;
        log::info!("graphics module: initialized on {}", device.name());
        Ok(Self {
            device,
            resources,
            descriptors,
            constants,
            commands,
            executor,
            backbuffer,
            frame_index: 0,
            last_frame_fence: 0,
        })
    }

    /// Create the module with an offscreen render target standing in for the
    /// backbuffer. Used headless and in tests.
    pub fn new_offscreen(
        device: Arc<dyn GpuDevice>,
        width: u32,
        height: u32,
        format: ResourceFormat,
    ) -> Result<Self, GraphicsError> {
        let mut resources = ResourcePool::new(device.clone())?;
        let desc = ResourceDescriptor::texture_2d(width, height, format)
            .with_flags(ResourceFlags::RENDER_TARGET)
            .with_initial_state(ResourceState::Present)
            .with_label("offscreen_backbuffer");
        let backbuffer = resources.create_offscreen_target(&desc)?;

        let caps = device.capabilities().clone();
        let descriptors = DescriptorAllocator::new(device.clone(), &caps)?;
        let constants = ConstantPool::new(device.clone(), &caps)?;
        let commands = CommandBufferPool::new(device.clone());
        let executor = FrameGraphExecutor::new(device.clone())?;
        log::info!(
            "graphics module: initialized offscreen {}x{} on {}",
            width,
            height,
            device.name()
        );
        Ok(Self {
            device,
            resources,
            descriptors,
            constants,
            commands,
            executor,
            backbuffer,
            frame_index: 0,
            last_frame_fence: 0,
        })
    }

    /// Run one frame. The single per-frame entry point.
    pub fn run(&mut self, builder: FrameGraphBuilder) -> Result<(), GraphicsError> {
        profile_scope!("graphics_module_run");

        // Present wait: block until the previous frame's GPU work is done,
        // capping the CPU at one frame ahead. Only then are last frame's
        // buffers, transients and constants safe to reclaim.
        if self.last_frame_fence > 0 {
            profile_scope!("present_wait");
            self.device
                .wait_fence(self.executor.fence(), self.last_frame_fence)?;
        }
        self.executor.retire_submitted();
        self.resources.retire_transients();
        self.constants.clear();

        self.descriptors.prepare();

        let mut graph = {
            profile_scope!("graph_build");
            builder.build(&mut self.resources, &mut self.constants, &self.commands)?
        };
        let culled = graph.cull();
        if culled > 0 {
            log::debug!(
                "graphics module: culled {} pass(es), {} remain",
                culled,
                graph.pass_count()
            );
        }

        let frame_value = self.executor.execute(
            &mut graph,
            FrameContext {
                commands: &self.commands,
                descriptors: &mut self.descriptors,
                constants: &mut self.constants,
                backbuffer: &self.backbuffer,
            },
        )?;

        self.descriptors.reset();
        self.last_frame_fence = frame_value;
        self.frame_index += 1;
        frame_mark!();
        Ok(())
    }

    /// Block until the GPU has finished every submitted frame. Teardown and
    /// resize paths call this before touching shared resources.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        if self.last_frame_fence > 0 {
            self.device
                .wait_fence(self.executor.fence(), self.last_frame_fence)?;
        }
        self.executor.retire_submitted();
        Ok(())
    }

    /// The device the module runs on.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// The backbuffer resource (frame-graph id 0).
    pub fn backbuffer(&self) -> &Arc<GpuResource> {
        &self.backbuffer
    }

    /// Resource factories, for asset creation outside the frame.
    pub fn resources_mut(&mut self) -> &mut ResourcePool {
        &mut self.resources
    }

    /// Command pool, for upload paths outside the frame.
    pub fn commands(&self) -> &CommandBufferPool {
        &self.commands
    }

    /// Descriptor allocator, for permanent reservations before the first
    /// frame.
    pub fn descriptors_mut(&mut self) -> &mut DescriptorAllocator {
        &mut self.descriptors
    }

    /// Frames completed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Heap usage statistics.
    pub fn heap_statistics(&self) -> HeapStatistics {
        self.resources.statistics()
    }
}

impl std::fmt::Debug for GraphicsModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsModule")
            .field("device", &self.device.name())
            .field("frame_index", &self.frame_index)
            .field("last_frame_fence", &self.last_frame_fence)
            .finish()
    }
}
