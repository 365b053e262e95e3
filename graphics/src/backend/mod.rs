//! GPU device abstraction layer.
//!
//! This module provides a trait-based abstraction over GPU APIs so the
//! frame-graph core can run against different devices.
//!
//! # Available devices
//!
//! - `dummy` (default): no-op device that journals every operation, used for
//!   testing and development without GPU hardware
//! - `vulkan-backend`: native Vulkan device using ash
//!
//! # Architecture
//!
//! Each device implements the [`GpuDevice`] trait, which provides:
//! - Heap allocation and placed-resource creation
//! - Descriptor pool creation and view writes
//! - Command allocator/list lifecycle and command recording
//! - Queue submission and the shared monotonic fence

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::ptr::NonNull;
use std::sync::Arc;

use crate::caps::DeviceCapabilities;
use crate::context::Command;
use crate::error::GraphicsError;
use crate::types::{
    DescriptorPoolKind, HeapKind, HeapUsage, QueueClass, ResourceDescriptor, SamplerDescriptor,
};

/// Handle to a committed GPU memory heap.
pub enum GpuHeap {
    /// Dummy device (bookkeeping only).
    Dummy(dummy::DummyHeap),
    /// Vulkan device memory block.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanHeap),
}

impl std::fmt::Debug for GpuHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(heap) => f.debug_tuple("GpuHeap::Dummy").field(heap).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(heap) => f.debug_tuple("GpuHeap::Vulkan").field(heap).finish(),
        }
    }
}

/// Handle to a GPU resource placed inside a heap.
pub enum GpuResource {
    /// Dummy device resource (optionally host-backed).
    Dummy(dummy::DummyResource),
    /// Vulkan buffer or image.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanResource),
}

impl GpuResource {
    /// Backend-assigned identity, stable for the resource's lifetime.
    ///
    /// Useful for logging and for identity assertions in tests.
    pub fn debug_id(&self) -> u64 {
        match self {
            Self::Dummy(resource) => resource.id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(resource) => resource.debug_id(),
        }
    }
}

impl std::fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(resource) => f.debug_tuple("GpuResource::Dummy").field(resource).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(resource) => f
                .debug_struct("GpuResource::Vulkan")
                .field("id", &resource.debug_id())
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a typed descriptor pool.
pub enum GpuDescriptorPool {
    /// Dummy device pool (journaled writes).
    Dummy(dummy::DummyDescriptorPool),
    /// Vulkan descriptor set / view table.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanDescriptorPool),
}

impl std::fmt::Debug for GpuDescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(pool) => f.debug_tuple("GpuDescriptorPool::Dummy").field(pool).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => f
                .debug_struct("GpuDescriptorPool::Vulkan")
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a command allocator (the backing store for recorded commands).
pub enum GpuCommandAllocator {
    /// Dummy device allocator.
    Dummy(dummy::DummyCommandAllocator),
    /// Vulkan command pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanCommandAllocator),
}

impl GpuCommandAllocator {
    /// Backend-assigned identity, stable for the allocator's lifetime.
    pub fn debug_id(&self) -> u64 {
        match self {
            Self::Dummy(allocator) => allocator.id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(allocator) => allocator.debug_id(),
        }
    }
}

impl std::fmt::Debug for GpuCommandAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuCommandAllocator")
            .field("id", &self.debug_id())
            .finish()
    }
}

/// Handle to a command list recorded through an allocator.
pub enum GpuCommandList {
    /// Dummy device list (commands journaled for inspection).
    Dummy(dummy::DummyCommandList),
    /// Vulkan command buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanCommandList),
}

impl GpuCommandList {
    /// Backend-assigned identity, stable for the list's lifetime.
    pub fn debug_id(&self) -> u64 {
        match self {
            Self::Dummy(list) => list.id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(list) => list.debug_id(),
        }
    }
}

impl std::fmt::Debug for GpuCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuCommandList")
            .field("id", &self.debug_id())
            .finish()
    }
}

/// Handle to the shared monotonic fence.
///
/// The fence is a monotonically increasing counter: queues signal values into
/// it and both queues and the host wait until a value has been observed. One
/// fence is shared by all queues of a device.
pub enum GpuFence {
    /// Dummy device fence (atomically advanced at submit).
    Dummy(dummy::DummyFence),
    /// Vulkan timeline semaphore.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vulkan::VulkanFence),
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(fence) => f.debug_tuple("GpuFence::Dummy").field(fence).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => f.debug_struct("GpuFence::Vulkan").finish_non_exhaustive(),
        }
    }
}

/// Native size and alignment for a resource about to be placed in a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Bytes the placed resource occupies.
    pub size: u64,
    /// Required placement alignment.
    pub alignment: u64,
}

/// A native view written into a descriptor pool slot.
#[derive(Debug, Clone)]
pub enum ViewDescriptor {
    /// Shader resource view over a buffer or texture.
    ShaderResource {
        /// Viewed resource.
        resource: Arc<GpuResource>,
    },
    /// Unordered access view over a buffer or texture.
    UnorderedAccess {
        /// Viewed resource.
        resource: Arc<GpuResource>,
    },
    /// Constant buffer view over a range of a buffer.
    ConstantBuffer {
        /// Buffer the range lives in.
        resource: Arc<GpuResource>,
        /// Byte offset of the range.
        offset: u64,
        /// Size of the range in bytes.
        size: u32,
    },
    /// Render target view.
    RenderTarget {
        /// Viewed resource.
        resource: Arc<GpuResource>,
    },
    /// Depth stencil view.
    DepthStencil {
        /// Viewed resource.
        resource: Arc<GpuResource>,
    },
    /// Sampler.
    Sampler {
        /// Sampler configuration.
        descriptor: SamplerDescriptor,
    },
}

impl ViewDescriptor {
    /// The pool this view kind belongs to.
    pub fn pool_kind(&self) -> DescriptorPoolKind {
        match self {
            Self::ShaderResource { .. } | Self::UnorderedAccess { .. } | Self::ConstantBuffer { .. } => {
                DescriptorPoolKind::Resource
            }
            Self::RenderTarget { .. } => DescriptorPoolKind::RenderTarget,
            Self::DepthStencil { .. } => DescriptorPoolKind::DepthStencil,
            Self::Sampler { .. } => DescriptorPoolKind::Sampler,
        }
    }
}

/// GPU device trait abstracting the native API.
///
/// All mutation of device-owned objects happens on the single orchestrating
/// thread; implementations only need interior synchronization where the
/// native API demands it.
pub trait GpuDevice: Send + Sync {
    /// Get the device name.
    fn name(&self) -> &'static str;

    /// Platform limits, queried once at device creation.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Compute the native allocation size and alignment for a resource.
    fn resource_allocation_info(&self, desc: &ResourceDescriptor) -> AllocationInfo;

    /// Allocate a committed heap of `size` bytes.
    fn create_heap(
        &self,
        size: u64,
        kind: HeapKind,
        usage: HeapUsage,
    ) -> Result<GpuHeap, GraphicsError>;

    /// Release a heap's memory. Must only be called at teardown, after all
    /// resources placed in the heap have been dropped.
    fn destroy_heap(&self, heap: &GpuHeap);

    /// Create a resource bound to `heap` at `offset`.
    fn create_placed_resource(
        &self,
        heap: &GpuHeap,
        offset: u64,
        desc: &ResourceDescriptor,
    ) -> Result<GpuResource, GraphicsError>;

    /// GPU virtual address of a buffer resource.
    fn resource_gpu_address(&self, resource: &GpuResource) -> u64;

    /// Map a host-visible resource and return the CPU pointer.
    fn map_resource(&self, resource: &GpuResource) -> Result<NonNull<u8>, GraphicsError>;

    /// Unmap a previously mapped resource.
    fn unmap_resource(&self, resource: &GpuResource);

    /// Attach a debug name to a resource.
    fn set_debug_name(&self, resource: &GpuResource, name: &str);

    /// Create a typed descriptor pool with `capacity` slots.
    fn create_descriptor_pool(
        &self,
        kind: DescriptorPoolKind,
        capacity: u32,
    ) -> Result<GpuDescriptorPool, GraphicsError>;

    /// Write a native view into slot `index` of `pool`.
    fn write_descriptor(&self, pool: &GpuDescriptorPool, index: u32, view: &ViewDescriptor);

    /// Create a command allocator for the given queue class.
    fn create_command_allocator(
        &self,
        class: QueueClass,
    ) -> Result<GpuCommandAllocator, GraphicsError>;

    /// Create a command list recording through `allocator`.
    fn create_command_list(
        &self,
        class: QueueClass,
        allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError>;

    /// Reset an allocator, reclaiming the storage of all lists recorded
    /// through it. The GPU must be done with those lists.
    fn reset_command_allocator(&self, allocator: &GpuCommandAllocator);

    /// Open a command list for recording against `allocator`.
    fn begin_command_list(&self, list: &GpuCommandList, allocator: &GpuCommandAllocator);

    /// Record a single command into an open list.
    fn record(&self, list: &GpuCommandList, command: &Command);

    /// Close a command list; it can then be submitted.
    fn close_command_list(&self, list: &GpuCommandList);

    /// Create the shared monotonic fence with an initial value.
    fn create_fence(&self, initial: u64) -> Result<GpuFence, GraphicsError>;

    /// Submit closed lists to a queue.
    ///
    /// If `wait` is present the queue waits until the fence reaches the value
    /// before executing; if `signal` is present the queue signals the value
    /// after the last list completes.
    fn submit(
        &self,
        class: QueueClass,
        lists: &[&GpuCommandList],
        wait: Option<(&GpuFence, u64)>,
        signal: Option<(&GpuFence, u64)>,
    ) -> Result<(), GraphicsError>;

    /// Block the host until the fence reaches `value`.
    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), GraphicsError>;

    /// The highest fence value the GPU has completed.
    fn fence_completed_value(&self, fence: &GpuFence) -> u64;
}

/// Select and create the best available device.
pub fn create_device() -> Result<Arc<dyn GpuDevice>, GraphicsError> {
    #[cfg(feature = "vulkan-backend")]
    {
        match vulkan::VulkanDevice::new() {
            Ok(device) => {
                log::info!("Using Vulkan device (ash)");
                return Ok(Arc::new(device));
            }
            Err(e) => {
                log::warn!("Failed to create Vulkan device: {}", e);
            }
        }
    }

    log::info!("Using dummy device");
    Ok(Arc::new(dummy::DummyDevice::new()))
}
