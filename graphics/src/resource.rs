//! Typed resource factory over the heap manager.
//!
//! The pool validates usage flags before placement, owns the
//! transient-resource retirement list, and carries the synchronous upload
//! path: vertex/index data is staged into an upload buffer, copied on the
//! copy queue and fenced to the host before the call returns.

use std::sync::Arc;

use crate::backend::{GpuDevice, GpuFence, GpuResource};
use crate::command::CommandBufferPool;
use crate::context::{Command, ResourceBarrier};
use crate::error::GraphicsError;
use crate::heap::{HeapManager, HeapStatistics};
use crate::types::{
    HeapKind, IndexFormat, QueueClass, ResourceDescriptor, ResourceFlags, ResourceFormat,
    ResourceLifetime, ResourceState,
};

/// Typed-resource factory with flag validation and upload support.
pub struct ResourcePool {
    device: Arc<dyn GpuDevice>,
    heaps: HeapManager,
    upload_fence: GpuFence,
    next_upload_value: u64,
    transients: Vec<Arc<GpuResource>>,
}

impl ResourcePool {
    /// Create the pool and its dedicated upload fence.
    pub fn new(device: Arc<dyn GpuDevice>) -> Result<Self, GraphicsError> {
        let upload_fence = device.create_fence(0)?;
        Ok(Self {
            heaps: HeapManager::new(device.clone()),
            device,
            upload_fence,
            next_upload_value: 1,
            transients: Vec::new(),
        })
    }

    /// Create a structured buffer of `element_count` elements of `stride`
    /// bytes each.
    pub fn create_structured_buffer(
        &mut self,
        element_count: u64,
        stride: u32,
        heap_kind: HeapKind,
        lifetime: ResourceLifetime,
        flags: ResourceFlags,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        if stride == 0 || element_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "structured buffers need a non-zero stride and element count".to_string(),
            ));
        }
        validate_buffer_flags(flags, heap_kind)?;
        let desc = ResourceDescriptor::buffer(element_count * stride as u64)
            .with_stride(stride)
            .with_heap_kind(heap_kind)
            .with_lifetime(lifetime)
            .with_flags(flags);
        self.place(desc)
    }

    /// Create a typed buffer of `element_count` elements of `format`.
    pub fn create_typed_buffer(
        &mut self,
        element_count: u64,
        format: ResourceFormat,
        heap_kind: HeapKind,
        lifetime: ResourceLifetime,
        flags: ResourceFlags,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        if format == ResourceFormat::Unknown || format.is_depth() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} is not a valid typed-buffer format"
            )));
        }
        if element_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "typed buffers need a non-zero element count".to_string(),
            ));
        }
        validate_buffer_flags(flags, heap_kind)?;
        let desc = ResourceDescriptor::buffer(element_count * format.bytes_per_element() as u64)
            .with_format(format)
            .with_heap_kind(heap_kind)
            .with_lifetime(lifetime)
            .with_flags(flags);
        self.place(desc)
    }

    /// Create a depth buffer.
    pub fn create_depth_stencil(
        &mut self,
        width: u32,
        height: u32,
        format: ResourceFormat,
        lifetime: ResourceLifetime,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        if !format.is_depth() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} is not a depth format"
            )));
        }
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "depth buffers need non-zero dimensions".to_string(),
            ));
        }
        let desc = ResourceDescriptor::texture_2d(width, height, format)
            .with_flags(ResourceFlags::DEPTH_STENCIL)
            .with_initial_state(ResourceState::DepthWrite)
            .with_lifetime(lifetime);
        self.place(desc)
    }

    /// Create a vertex buffer in device memory, filled with `data`.
    ///
    /// Blocks until the copy queue has finished the upload.
    pub fn create_vertex_buffer(
        &mut self,
        commands: &CommandBufferPool,
        data: &[u8],
        stride: u32,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        if stride == 0 || data.is_empty() || data.len() % stride as usize != 0 {
            return Err(GraphicsError::InvalidParameter(
                "vertex data must be a non-empty multiple of the stride".to_string(),
            ));
        }
        let desc = ResourceDescriptor::buffer(data.len() as u64)
            .with_stride(stride)
            .with_initial_state(ResourceState::CopyDest);
        let buffer = self.place(desc)?;
        self.upload_sync(
            commands,
            &buffer,
            data,
            ResourceState::VertexAndConstantBuffer,
        )?;
        Ok(buffer)
    }

    /// Create an index buffer in device memory, filled with `data`.
    ///
    /// Blocks until the copy queue has finished the upload.
    pub fn create_index_buffer(
        &mut self,
        commands: &CommandBufferPool,
        data: &[u8],
        format: IndexFormat,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        if data.is_empty() || data.len() as u64 % format.size() != 0 {
            return Err(GraphicsError::InvalidParameter(
                "index data must be a non-empty multiple of the index size".to_string(),
            ));
        }
        let desc = ResourceDescriptor::buffer(data.len() as u64)
            .with_initial_state(ResourceState::CopyDest);
        let buffer = self.place(desc)?;
        self.upload_sync(commands, &buffer, data, ResourceState::IndexBuffer)?;
        Ok(buffer)
    }

    /// Create a color render target from a full descriptor (offscreen
    /// backbuffers, intermediate targets).
    pub fn create_offscreen_target(
        &mut self,
        desc: &ResourceDescriptor,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        if desc.is_buffer() {
            return Err(GraphicsError::InvalidParameter(
                "render targets must be textures".to_string(),
            ));
        }
        if !desc.flags.contains(ResourceFlags::RENDER_TARGET) {
            return Err(GraphicsError::InvalidParameter(
                "offscreen targets need the RENDER_TARGET flag".to_string(),
            ));
        }
        self.place(desc.clone())
    }

    /// Create a host-visible readback buffer.
    pub fn create_readback_buffer(
        &mut self,
        size: u64,
        lifetime: ResourceLifetime,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "readback buffers need a non-zero size".to_string(),
            ));
        }
        let desc = ResourceDescriptor::buffer(size)
            .with_heap_kind(HeapKind::Readback)
            .with_initial_state(ResourceState::CopyDest)
            .with_lifetime(lifetime);
        self.place(desc)
    }

    /// Attach a debug name to a resource.
    pub fn set_debug_name(&self, resource: &GpuResource, name: &str) {
        self.device.set_debug_name(resource, name);
    }

    /// Release a resource handle.
    ///
    /// The heap range the resource occupied is not reclaimed; heaps only
    /// release memory at teardown.
    pub fn release_resource(&mut self, resource: Arc<GpuResource>) {
        self.transients
            .retain(|held| !Arc::ptr_eq(held, &resource));
        drop(resource);
    }

    /// Drop every transient resource created since the last retirement.
    ///
    /// Called once per frame after the frame fence, so the GPU is done with
    /// them.
    pub fn retire_transients(&mut self) {
        if !self.transients.is_empty() {
            log::trace!("resource pool: retiring {} transients", self.transients.len());
            self.transients.clear();
        }
    }

    /// Number of transient resources currently tracked.
    pub fn transient_count(&self) -> usize {
        self.transients.len()
    }

    /// Heap usage statistics.
    pub fn statistics(&self) -> HeapStatistics {
        self.heaps.statistics()
    }

    fn place(&mut self, desc: ResourceDescriptor) -> Result<Arc<GpuResource>, GraphicsError> {
        let lifetime = desc.lifetime;
        let resource = self.heaps.create_resource(&desc)?;
        if lifetime == ResourceLifetime::Transient {
            self.transients.push(Arc::clone(&resource));
        }
        Ok(resource)
    }

    /// Stage `data`, copy it into `dst` on the copy queue and block the host
    /// on the dedicated upload fence until the copy completes.
    fn upload_sync(
        &mut self,
        commands: &CommandBufferPool,
        dst: &Arc<GpuResource>,
        data: &[u8],
        final_state: ResourceState,
    ) -> Result<(), GraphicsError> {
        let staging_desc = ResourceDescriptor::buffer(data.len() as u64)
            .with_heap_kind(HeapKind::Upload)
            .with_initial_state(ResourceState::CopySource)
            .with_label("upload_staging");
        let staging = self.heaps.create_resource(&staging_desc)?;

        let mapped = self.device.map_resource(&staging)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr(), data.len());
        }
        self.device.unmap_resource(&staging);

        let lease = commands.get_copy()?;
        lease.record(&Command::CopyBuffer {
            src: Arc::clone(&staging),
            dst: Arc::clone(dst),
            size: data.len() as u64,
        });
        lease.record(&Command::Barriers(vec![ResourceBarrier {
            resource: Arc::clone(dst),
            before: ResourceState::CopyDest,
            after: final_state,
        }]));
        lease.close();

        let value = self.next_upload_value;
        self.next_upload_value += 1;
        self.device.submit(
            QueueClass::Copy,
            &[lease.list()],
            None,
            Some((&self.upload_fence, value)),
        )?;
        // Suspension point: the host blocks here until the copy queue is
        // done, so the staging buffer and the lease can be dropped safely.
        self.device.wait_fence(&self.upload_fence, value)?;
        log::trace!(
            "resource pool: uploaded {} bytes (fence value {})",
            data.len(),
            value
        );
        Ok(())
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("heaps", &self.heaps)
            .field("transients", &self.transients.len())
            .finish()
    }
}

/// Buffers can never be attachment targets, and unordered access requires
/// device-local placement.
fn validate_buffer_flags(flags: ResourceFlags, heap_kind: HeapKind) -> Result<(), GraphicsError> {
    if flags.intersects(ResourceFlags::RENDER_TARGET | ResourceFlags::DEPTH_STENCIL) {
        return Err(GraphicsError::InvalidParameter(
            "buffers cannot carry attachment flags".to_string(),
        ));
    }
    if flags.contains(ResourceFlags::UNORDERED_ACCESS) && heap_kind != HeapKind::Default {
        return Err(GraphicsError::InvalidParameter(
            "unordered access requires default-heap placement".to_string(),
        ));
    }
    Ok(())
}
