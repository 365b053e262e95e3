//! # Vermilion Graphics
//!
//! GPU frame-graph execution engine for the Vermilion renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraphBuilder`] / [`FrameGraph`] - declarative render passes with
//!   reference-counted readiness and culling
//! - [`FrameGraphExecutor`] - multi-queue submission with fence-ordered
//!   cross-queue hazards
//! - [`HeapManager`], [`ResourcePool`], [`DescriptorAllocator`],
//!   [`ConstantPool`], [`CommandBufferPool`] - the allocators a frame runs on
//! - [`GraphicsModule`] - the single per-frame entry point
//! - Device backends: Vulkan (ash) and a journaling dummy for tests
//!
//! ## Example
//!
//! ```ignore
//! use vermilion_graphics::{FrameGraphBuilder, GraphicsModule, PassKind, ResourceId};
//!
//! let device = vermilion_graphics::backend::create_device()?;
//! let mut module = GraphicsModule::new_offscreen(device, 1280, 720, ResourceFormat::Bgra8Unorm)?;
//!
//! // Every frame:
//! let mut builder = FrameGraphBuilder::new();
//! builder.create_render_pass(
//!     "main",
//!     PassKind::Graphics,
//!     |ctx| { ctx.writes(ResourceId::BACKBUFFER); Ok(()) },
//!     |ctx| { /* record draws */ },
//! );
//! module.run(builder)?;
//! ```

pub mod backend;
pub mod caps;
pub mod command;
pub mod constants;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod heap;
pub mod module;
pub mod profiling;
pub mod resource;
pub mod types;

// Re-export main types for convenience
pub use backend::{create_device, GpuDevice, GpuResource};
pub use caps::DeviceCapabilities;
pub use command::{CommandBufferLease, CommandBufferPool};
pub use constants::{ConstantAllocation, ConstantPool, CONSTANT_PAGE_SIZE};
pub use context::{
    Command, PipelineHandle, RenderContext, ResourceBarrier, ResourceContext, RootSignatureHandle,
};
pub use descriptor::{DescriptorAllocator, DescriptorHandle, DescriptorTable};
pub use error::GraphicsError;
pub use graph::{
    FrameGraph, FrameGraphBuilder, FrameGraphExecutor, PassHandle, PassKind, RenderPass,
    MAX_PASS_RESOURCES,
};
pub use heap::{HeapManager, HeapStatistics, HEAP_BUCKETS};
pub use module::GraphicsModule;
pub use resource::ResourcePool;
pub use types::{
    DescriptorPoolKind, HeapKind, HeapUsage, IndexFormat, QueueClass, ResourceDescriptor,
    ResourceFlags, ResourceFormat, ResourceId, ResourceLifetime, ResourceState, SamplerDescriptor,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// This should be called before using any graphics functionality.
pub fn init() {
    log::info!("Vermilion Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_device() {
        let device = backend::dummy::DummyDevice::new();
        assert_eq!(device.name(), "Dummy");
    }
}
