//! Native Vulkan device (ash + gpu-allocator).
//!
//! Mapping of the engine's model onto Vulkan:
//!
//! - heaps are blocks obtained from gpu-allocator; placed resources bind
//!   buffers/images at explicit offsets inside a block;
//! - the shader-visible descriptor pools are update-after-bind descriptor
//!   arrays (one set per pool, slot index = array element); the render-target
//!   and depth-stencil pools are CPU-side image-view tables, as they never
//!   reach shaders;
//! - command allocators are `VkCommandPool`s, reset wholesale when a lease
//!   returns to the pool;
//! - the shared monotonic fence is a timeline semaphore, signaled and waited
//!   through `vkQueueSubmit2`;
//! - pipelines and root signatures (pipeline layouts) are collaborator-owned
//!   and resolved through registries by opaque handle.

pub(crate) mod conversion;
mod init;

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::caps::DeviceCapabilities;
use crate::context::{Command, PipelineHandle, RootSignatureHandle};
use crate::error::GraphicsError;
use crate::types::{
    DescriptorPoolKind, HeapKind, HeapUsage, QueueClass, ResourceDescriptor, ResourceFormat,
};

use super::{
    AllocationInfo, GpuCommandAllocator, GpuCommandList, GpuDescriptorPool, GpuDevice, GpuFence,
    GpuHeap, GpuResource, ViewDescriptor,
};
use conversion::{
    aspect_for_format, buffer_usage_from_flags, format_to_vk, image_usage_from_flags,
    index_format_to_vk, map_vk_error, sampler_to_vk, state_to_layout, state_to_sync2,
};
use init::QueueSet;

/// A committed heap: one gpu-allocator block region.
pub struct VulkanHeap {
    memory: vk::DeviceMemory,
    base_offset: u64,
    size: u64,
    mapped_base: Option<NonNull<std::ffi::c_void>>,
    allocation: Mutex<Option<Allocation>>,
}

impl std::fmt::Debug for VulkanHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanHeap")
            .field("size", &self.size)
            .field("base_offset", &self.base_offset)
            .field("mapped", &self.mapped_base.is_some())
            .finish_non_exhaustive()
    }
}

enum VulkanResourceKind {
    Buffer(vk::Buffer),
    Image {
        image: vk::Image,
        view: vk::ImageView,
        owned: bool,
    },
}

/// A placed buffer or image.
pub struct VulkanResource {
    device: ash::Device,
    kind: VulkanResourceKind,
    format: ResourceFormat,
    gpu_address: u64,
    mapped: Option<NonNull<u8>>,
}

impl VulkanResource {
    pub(crate) fn debug_id(&self) -> u64 {
        match &self.kind {
            VulkanResourceKind::Buffer(buffer) => buffer.as_raw(),
            VulkanResourceKind::Image { image, .. } => image.as_raw(),
        }
    }

    fn buffer(&self) -> Option<vk::Buffer> {
        match &self.kind {
            VulkanResourceKind::Buffer(buffer) => Some(*buffer),
            VulkanResourceKind::Image { .. } => None,
        }
    }

    fn image_view(&self) -> Option<vk::ImageView> {
        match &self.kind {
            VulkanResourceKind::Buffer(_) => None,
            VulkanResourceKind::Image { view, .. } => Some(*view),
        }
    }
}

impl Drop for VulkanResource {
    fn drop(&mut self) {
        unsafe {
            match &self.kind {
                VulkanResourceKind::Buffer(buffer) => self.device.destroy_buffer(*buffer, None),
                VulkanResourceKind::Image { image, view, owned } => {
                    if *owned {
                        self.device.destroy_image_view(*view, None);
                        self.device.destroy_image(*image, None);
                    }
                }
            }
        }
    }
}

enum PoolNative {
    /// Update-after-bind descriptor array (SRV/CBV/UAV and sampler pools).
    ShaderVisible {
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        set: vk::DescriptorSet,
    },
    /// CPU-side view table (render-target and depth-stencil pools); views
    /// are borrowed from the resources, never owned.
    CpuTable { views: Mutex<Vec<vk::ImageView>> },
}

/// One typed descriptor pool.
pub struct VulkanDescriptorPool {
    device: ash::Device,
    kind: DescriptorPoolKind,
    capacity: u32,
    native: PoolNative,
}

impl VulkanDescriptorPool {
    /// The image view written at `index` of a CPU table pool.
    pub fn view_at(&self, index: u32) -> Option<vk::ImageView> {
        match &self.native {
            PoolNative::CpuTable { views } => {
                views.lock().get(index as usize).copied().filter(|view| *view != vk::ImageView::null())
            }
            PoolNative::ShaderVisible { .. } => None,
        }
    }
}

impl Drop for VulkanDescriptorPool {
    fn drop(&mut self) {
        if let PoolNative::ShaderVisible { pool, layout, .. } = &self.native {
            unsafe {
                self.device.destroy_descriptor_pool(*pool, None);
                self.device.destroy_descriptor_set_layout(*layout, None);
            }
        }
    }
}

/// A command allocator: one command pool.
pub struct VulkanCommandAllocator {
    device: ash::Device,
    pool: vk::CommandPool,
}

impl VulkanCommandAllocator {
    pub(crate) fn debug_id(&self) -> u64 {
        self.pool.as_raw()
    }
}

impl Drop for VulkanCommandAllocator {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// A primary command buffer plus recording state.
pub struct VulkanCommandList {
    buffer: vk::CommandBuffer,
    bind_point: vk::PipelineBindPoint,
    bound_layout: Mutex<vk::PipelineLayout>,
}

impl VulkanCommandList {
    pub(crate) fn debug_id(&self) -> u64 {
        self.buffer.as_raw()
    }
}

/// The shared fence: a timeline semaphore.
pub struct VulkanFence {
    device: ash::Device,
    semaphore: vk::Semaphore,
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// Native Vulkan device.
pub struct VulkanDevice {
    // Field order keeps the loader alive past everything derived from it.
    caps: DeviceCapabilities,
    allocator: Mutex<Option<Allocator>>,
    samplers: Mutex<Vec<vk::Sampler>>,
    bound_sets: Mutex<[vk::DescriptorSet; 4]>,
    pipelines: Mutex<HashMap<u64, vk::Pipeline>>,
    layouts: Mutex<HashMap<u64, vk::PipelineLayout>>,
    next_handle: AtomicU64,
    queues: QueueSet,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    instance: ash::Instance,
    _entry: ash::Entry,
}

impl VulkanDevice {
    /// Bootstrap the instance, device, queues and allocator.
    pub fn new() -> Result<Self, GraphicsError> {
        let init = init::initialize()?;
        let allocator =
            init::create_allocator(&init.instance, init.physical_device, init.device.clone())?;

        let limits = init.properties.limits;
        let caps = DeviceCapabilities {
            constant_buffer_alignment: limits.min_uniform_buffer_offset_alignment.max(256),
            ..DeviceCapabilities::default()
        };

        Ok(Self {
            caps,
            allocator: Mutex::new(Some(allocator)),
            samplers: Mutex::new(Vec::new()),
            bound_sets: Mutex::new([vk::DescriptorSet::null(); 4]),
            pipelines: Mutex::new(HashMap::new()),
            layouts: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            queues: init.queues,
            device: init.device,
            physical_device: init.physical_device,
            instance: init.instance,
            _entry: init.entry,
        })
    }

    /// Register a collaborator-owned pipeline and get its opaque handle.
    pub fn register_pipeline(&self, pipeline: vk::Pipeline) -> PipelineHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.pipelines.lock().insert(raw, pipeline);
        PipelineHandle::from_raw(raw)
    }

    /// Register a collaborator-owned pipeline layout (root signature).
    pub fn register_root_signature(&self, layout: vk::PipelineLayout) -> RootSignatureHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.layouts.lock().insert(raw, layout);
        RootSignatureHandle::from_raw(raw)
    }

    /// Wrap an externally owned image (a swap-chain backbuffer) as a
    /// resource the frame graph can transition and render to. The image and
    /// view stay owned by the caller.
    pub fn wrap_external_image(
        &self,
        image: vk::Image,
        view: vk::ImageView,
        format: ResourceFormat,
    ) -> GpuResource {
        GpuResource::Vulkan(VulkanResource {
            device: self.device.clone(),
            kind: VulkanResourceKind::Image {
                image,
                view,
                owned: false,
            },
            format,
            gpu_address: 0,
            mapped: None,
        })
    }

    fn queue_for(&self, class: QueueClass) -> vk::Queue {
        match class {
            QueueClass::Graphics => self.queues.graphics.1,
            QueueClass::Compute => self.queues.compute.1,
            QueueClass::Copy => self.queues.transfer.1,
        }
    }

    fn family_for(&self, class: QueueClass) -> u32 {
        match class {
            QueueClass::Graphics => self.queues.graphics.0,
            QueueClass::Compute => self.queues.compute.0,
            QueueClass::Copy => self.queues.transfer.0,
        }
    }

    fn create_shader_visible_pool(
        &self,
        kind: DescriptorPoolKind,
        capacity: u32,
    ) -> Result<PoolNative, GraphicsError> {
        let stage = vk::ShaderStageFlags::ALL;
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = match kind {
            DescriptorPoolKind::Resource => vec![
                vk::DescriptorSetLayoutBinding::default()
                    .binding(BINDING_UNIFORM)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(capacity)
                    .stage_flags(stage),
                vk::DescriptorSetLayoutBinding::default()
                    .binding(BINDING_SAMPLED_IMAGE)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .descriptor_count(capacity)
                    .stage_flags(stage),
                vk::DescriptorSetLayoutBinding::default()
                    .binding(BINDING_STORAGE_IMAGE)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .descriptor_count(capacity)
                    .stage_flags(stage),
                vk::DescriptorSetLayoutBinding::default()
                    .binding(BINDING_STORAGE_BUFFER)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(capacity)
                    .stage_flags(stage),
            ],
            DescriptorPoolKind::Sampler => vec![vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(capacity)
                .stage_flags(stage)],
            _ => unreachable!("cpu table pools are not shader visible"),
        };

        let binding_flags = vec![
            vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                | vk::DescriptorBindingFlags::PARTIALLY_BOUND;
            bindings.len()
        ];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut flags_info);
        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| map_vk_error(e, "failed to create descriptor set layout"))?;

        let pool_sizes: Vec<vk::DescriptorPoolSize> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorPoolSize::default()
                    .ty(binding.descriptor_type)
                    .descriptor_count(binding.descriptor_count)
            })
            .collect();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| map_vk_error(e, "failed to create descriptor pool"))?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| map_vk_error(e, "failed to allocate descriptor set"))?[0];

        self.bound_sets.lock()[kind.index()] = set;
        Ok(PoolNative::ShaderVisible { pool, layout, set })
    }

    fn write_shader_visible(
        &self,
        set: vk::DescriptorSet,
        kind: DescriptorPoolKind,
        index: u32,
        view: &ViewDescriptor,
    ) {
        let mut buffer_info = [vk::DescriptorBufferInfo::default()];
        let mut image_info = [vk::DescriptorImageInfo::default()];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_array_element(index)
            .descriptor_count(1);
        let write = match view {
            ViewDescriptor::ShaderResource { resource } => match vulkan_resource(resource) {
                Some(res) if res.buffer().is_some() => {
                    buffer_info[0] = vk::DescriptorBufferInfo::default()
                        .buffer(res.buffer().unwrap_or_default())
                        .offset(0)
                        .range(vk::WHOLE_SIZE);
                    write
                        .dst_binding(BINDING_STORAGE_BUFFER)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .buffer_info(&buffer_info)
                }
                Some(res) => {
                    image_info[0] = vk::DescriptorImageInfo::default()
                        .image_view(res.image_view().unwrap_or_default())
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                    write
                        .dst_binding(BINDING_SAMPLED_IMAGE)
                        .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                        .image_info(&image_info)
                }
                None => return,
            },
            ViewDescriptor::UnorderedAccess { resource } => match vulkan_resource(resource) {
                Some(res) if res.buffer().is_some() => {
                    buffer_info[0] = vk::DescriptorBufferInfo::default()
                        .buffer(res.buffer().unwrap_or_default())
                        .offset(0)
                        .range(vk::WHOLE_SIZE);
                    write
                        .dst_binding(BINDING_STORAGE_BUFFER)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .buffer_info(&buffer_info)
                }
                Some(res) => {
                    image_info[0] = vk::DescriptorImageInfo::default()
                        .image_view(res.image_view().unwrap_or_default())
                        .image_layout(vk::ImageLayout::GENERAL);
                    write
                        .dst_binding(BINDING_STORAGE_IMAGE)
                        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                        .image_info(&image_info)
                }
                None => return,
            },
            ViewDescriptor::ConstantBuffer {
                resource,
                offset,
                size,
            } => {
                let Some(res) = vulkan_resource(resource) else {
                    return;
                };
                let Some(buffer) = res.buffer() else {
                    log::error!("vulkan: constant buffer view over a non-buffer resource");
                    return;
                };
                buffer_info[0] = vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(*offset)
                    .range(*size as u64);
                write
                    .dst_binding(BINDING_UNIFORM)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
            }
            ViewDescriptor::Sampler { descriptor } => {
                debug_assert_eq!(kind, DescriptorPoolKind::Sampler);
                let info = sampler_to_vk(descriptor);
                let sampler = match unsafe { self.device.create_sampler(&info, None) } {
                    Ok(sampler) => sampler,
                    Err(e) => {
                        log::error!("vulkan: failed to create sampler: {e:?}");
                        return;
                    }
                };
                self.samplers.lock().push(sampler);
                image_info[0] = vk::DescriptorImageInfo::default().sampler(sampler);
                write
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(&image_info)
            }
            ViewDescriptor::RenderTarget { .. } | ViewDescriptor::DepthStencil { .. } => {
                log::error!("vulkan: attachment views belong to cpu table pools");
                return;
            }
        };
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    fn record_barriers(
        &self,
        buffer: vk::CommandBuffer,
        barriers: &[crate::context::ResourceBarrier],
    ) {
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        for barrier in barriers {
            let Some(res) = vulkan_resource(&barrier.resource) else {
                continue;
            };
            let (src_stage, src_access) = state_to_sync2(barrier.before);
            let (dst_stage, dst_access) = state_to_sync2(barrier.after);
            match &res.kind {
                VulkanResourceKind::Image { image, .. } => {
                    image_barriers.push(
                        vk::ImageMemoryBarrier2::default()
                            .src_stage_mask(src_stage)
                            .src_access_mask(src_access)
                            .dst_stage_mask(dst_stage)
                            .dst_access_mask(dst_access)
                            .old_layout(state_to_layout(barrier.before, res.format))
                            .new_layout(state_to_layout(barrier.after, res.format))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(*image)
                            .subresource_range(
                                vk::ImageSubresourceRange::default()
                                    .aspect_mask(aspect_for_format(res.format))
                                    .level_count(vk::REMAINING_MIP_LEVELS)
                                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
                            ),
                    );
                }
                VulkanResourceKind::Buffer(vk_buffer) => {
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier2::default()
                            .src_stage_mask(src_stage)
                            .src_access_mask(src_access)
                            .dst_stage_mask(dst_stage)
                            .dst_access_mask(dst_access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(*vk_buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
            }
        }
        let dependency = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(buffer, &dependency) };
    }
}

const BINDING_UNIFORM: u32 = 0;
const BINDING_SAMPLED_IMAGE: u32 = 1;
const BINDING_STORAGE_IMAGE: u32 = 2;
const BINDING_STORAGE_BUFFER: u32 = 3;

fn vulkan_heap(heap: &GpuHeap) -> Option<&VulkanHeap> {
    match heap {
        GpuHeap::Vulkan(heap) => Some(heap),
        _ => None,
    }
}

fn vulkan_resource(resource: &GpuResource) -> Option<&VulkanResource> {
    match resource {
        GpuResource::Vulkan(resource) => Some(resource),
        _ => None,
    }
}

fn vulkan_list(list: &GpuCommandList) -> Option<&VulkanCommandList> {
    match list {
        GpuCommandList::Vulkan(list) => Some(list),
        _ => None,
    }
}

fn vulkan_fence(fence: &GpuFence) -> Result<&VulkanFence, GraphicsError> {
    match fence {
        GpuFence::Vulkan(fence) => Ok(fence),
        _ => Err(GraphicsError::InvalidParameter(
            "fence belongs to a different device".to_string(),
        )),
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn resource_allocation_info(&self, desc: &ResourceDescriptor) -> AllocationInfo {
        unsafe {
            if desc.is_buffer() {
                let info = vk::BufferCreateInfo::default()
                    .size(desc.width.max(1))
                    .usage(buffer_usage_from_flags(desc.flags))
                    .sharing_mode(vk::SharingMode::EXCLUSIVE);
                match self.device.create_buffer(&info, None) {
                    Ok(buffer) => {
                        let requirements = self.device.get_buffer_memory_requirements(buffer);
                        self.device.destroy_buffer(buffer, None);
                        AllocationInfo {
                            size: requirements.size,
                            alignment: requirements.alignment.max(1),
                        }
                    }
                    Err(_) => AllocationInfo {
                        size: desc.width.max(1),
                        alignment: self.caps.placement_alignment,
                    },
                }
            } else {
                let info = vk::ImageCreateInfo::default()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(format_to_vk(desc.format))
                    .extent(vk::Extent3D {
                        width: desc.width.max(1) as u32,
                        height: desc.height.max(1),
                        depth: 1,
                    })
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(image_usage_from_flags(desc.flags, desc.format))
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED);
                match self.device.create_image(&info, None) {
                    Ok(image) => {
                        let requirements = self.device.get_image_memory_requirements(image);
                        self.device.destroy_image(image, None);
                        AllocationInfo {
                            size: requirements.size,
                            alignment: requirements.alignment.max(1),
                        }
                    }
                    Err(_) => AllocationInfo {
                        size: desc.width.max(1) * desc.height.max(1) as u64 * 4,
                        alignment: self.caps.placement_alignment,
                    },
                }
            }
        }
    }

    fn create_heap(
        &self,
        size: u64,
        kind: HeapKind,
        usage: HeapUsage,
    ) -> Result<GpuHeap, GraphicsError> {
        let location = match kind {
            HeapKind::Default => MemoryLocation::GpuOnly,
            HeapKind::Upload => MemoryLocation::CpuToGpu,
            HeapKind::Readback => MemoryLocation::GpuToCpu,
        };
        let linear = !usage.intersects(
            HeapUsage::TEXTURES | HeapUsage::RENDER_TARGETS | HeapUsage::DEPTH_TARGETS,
        );
        let requirements = vk::MemoryRequirements {
            size,
            alignment: self.caps.placement_alignment,
            memory_type_bits: !0,
        };
        let mut guard = self.allocator.lock();
        let allocator = guard
            .as_mut()
            .ok_or_else(|| GraphicsError::Internal("allocator already torn down".to_string()))?;
        let allocation = allocator
            .allocate(&AllocationCreateDesc {
                name: "vermilion_heap",
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
                other => GraphicsError::Internal(format!("heap allocation failed: {other}")),
            })?;

        let memory = unsafe { allocation.memory() };
        let base_offset = allocation.offset();
        let mapped_base = allocation.mapped_ptr();
        Ok(GpuHeap::Vulkan(VulkanHeap {
            memory,
            base_offset,
            size,
            mapped_base,
            allocation: Mutex::new(Some(allocation)),
        }))
    }

    fn destroy_heap(&self, heap: &GpuHeap) {
        let Some(heap) = vulkan_heap(heap) else {
            return;
        };
        if let Some(allocation) = heap.allocation.lock().take() {
            if let Some(allocator) = self.allocator.lock().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    log::warn!("vulkan: failed to free heap allocation: {e}");
                }
            }
        }
    }

    fn create_placed_resource(
        &self,
        heap: &GpuHeap,
        offset: u64,
        desc: &ResourceDescriptor,
    ) -> Result<GpuResource, GraphicsError> {
        let heap = vulkan_heap(heap).ok_or_else(|| {
            GraphicsError::InvalidParameter("heap belongs to a different device".to_string())
        })?;

        if desc.is_buffer() {
            let info = vk::BufferCreateInfo::default()
                .size(desc.width.max(1))
                .usage(buffer_usage_from_flags(desc.flags))
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = unsafe { self.device.create_buffer(&info, None) }
                .map_err(|e| map_vk_error(e, "failed to create buffer"))?;
            unsafe {
                self.device
                    .bind_buffer_memory(buffer, heap.memory, heap.base_offset + offset)
            }
            .map_err(|e| map_vk_error(e, "failed to bind buffer memory"))?;

            let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            let gpu_address = unsafe { self.device.get_buffer_device_address(&address_info) };
            let mapped = heap.mapped_base.map(|base| unsafe {
                NonNull::new_unchecked(base.as_ptr().cast::<u8>().add(offset as usize))
            });

            Ok(GpuResource::Vulkan(VulkanResource {
                device: self.device.clone(),
                kind: VulkanResourceKind::Buffer(buffer),
                format: desc.format,
                gpu_address,
                mapped,
            }))
        } else {
            let info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format_to_vk(desc.format))
                .extent(vk::Extent3D {
                    width: desc.width.max(1) as u32,
                    height: desc.height.max(1),
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(image_usage_from_flags(desc.flags, desc.format))
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image = unsafe { self.device.create_image(&info, None) }
                .map_err(|e| map_vk_error(e, "failed to create image"))?;
            unsafe {
                self.device
                    .bind_image_memory(image, heap.memory, heap.base_offset + offset)
            }
            .map_err(|e| map_vk_error(e, "failed to bind image memory"))?;

            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format_to_vk(desc.format))
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(aspect_for_format(desc.format))
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe { self.device.create_image_view(&view_info, None) }
                .map_err(|e| map_vk_error(e, "failed to create image view"))?;

            Ok(GpuResource::Vulkan(VulkanResource {
                device: self.device.clone(),
                kind: VulkanResourceKind::Image {
                    image,
                    view,
                    owned: true,
                },
                format: desc.format,
                gpu_address: 0,
                mapped: None,
            }))
        }
    }

    fn resource_gpu_address(&self, resource: &GpuResource) -> u64 {
        vulkan_resource(resource).map_or(0, |res| res.gpu_address)
    }

    fn map_resource(&self, resource: &GpuResource) -> Result<NonNull<u8>, GraphicsError> {
        let res = vulkan_resource(resource).ok_or_else(|| {
            GraphicsError::InvalidParameter("resource belongs to a different device".to_string())
        })?;
        res.mapped.ok_or_else(|| {
            GraphicsError::InvalidParameter("resource is not host-visible".to_string())
        })
    }

    fn unmap_resource(&self, _resource: &GpuResource) {
        // Heap blocks stay persistently mapped by gpu-allocator.
    }

    fn set_debug_name(&self, resource: &GpuResource, name: &str) {
        log::trace!("vulkan: resource {} named '{}'", resource.debug_id(), name);
    }

    fn create_descriptor_pool(
        &self,
        kind: DescriptorPoolKind,
        capacity: u32,
    ) -> Result<GpuDescriptorPool, GraphicsError> {
        let native = if kind.is_shader_visible() {
            self.create_shader_visible_pool(kind, capacity)?
        } else {
            PoolNative::CpuTable {
                views: Mutex::new(vec![vk::ImageView::null(); capacity as usize]),
            }
        };
        Ok(GpuDescriptorPool::Vulkan(VulkanDescriptorPool {
            device: self.device.clone(),
            kind,
            capacity,
            native,
        }))
    }

    fn write_descriptor(&self, pool: &GpuDescriptorPool, index: u32, view: &ViewDescriptor) {
        let GpuDescriptorPool::Vulkan(pool) = pool else {
            return;
        };
        assert!(
            index < pool.capacity,
            "descriptor write at {} exceeds pool capacity {}",
            index,
            pool.capacity
        );
        match &pool.native {
            PoolNative::ShaderVisible { set, .. } => {
                self.write_shader_visible(*set, pool.kind, index, view);
            }
            PoolNative::CpuTable { views } => {
                let resource = match view {
                    ViewDescriptor::RenderTarget { resource }
                    | ViewDescriptor::DepthStencil { resource } => resource,
                    _ => {
                        log::error!("vulkan: shader view written into an attachment table");
                        return;
                    }
                };
                let Some(image_view) = vulkan_resource(resource).and_then(VulkanResource::image_view)
                else {
                    log::error!("vulkan: attachment view over a non-image resource");
                    return;
                };
                views.lock()[index as usize] = image_view;
            }
        }
    }

    fn create_command_allocator(
        &self,
        class: QueueClass,
    ) -> Result<GpuCommandAllocator, GraphicsError> {
        let info =
            vk::CommandPoolCreateInfo::default().queue_family_index(self.family_for(class));
        let pool = unsafe { self.device.create_command_pool(&info, None) }
            .map_err(|e| map_vk_error(e, "failed to create command pool"))?;
        Ok(GpuCommandAllocator::Vulkan(VulkanCommandAllocator {
            device: self.device.clone(),
            pool,
        }))
    }

    fn create_command_list(
        &self,
        class: QueueClass,
        allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError> {
        let GpuCommandAllocator::Vulkan(allocator) = allocator else {
            return Err(GraphicsError::InvalidParameter(
                "allocator belongs to a different device".to_string(),
            ));
        };
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(allocator.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| map_vk_error(e, "failed to allocate command buffer"))?[0];
        let bind_point = match class {
            QueueClass::Graphics => vk::PipelineBindPoint::GRAPHICS,
            QueueClass::Compute | QueueClass::Copy => vk::PipelineBindPoint::COMPUTE,
        };
        Ok(GpuCommandList::Vulkan(VulkanCommandList {
            buffer,
            bind_point,
            bound_layout: Mutex::new(vk::PipelineLayout::null()),
        }))
    }

    fn reset_command_allocator(&self, allocator: &GpuCommandAllocator) {
        let GpuCommandAllocator::Vulkan(allocator) = allocator else {
            return;
        };
        if let Err(e) = unsafe {
            self.device
                .reset_command_pool(allocator.pool, vk::CommandPoolResetFlags::empty())
        } {
            log::warn!("vulkan: failed to reset command pool: {e:?}");
        }
    }

    fn begin_command_list(&self, list: &GpuCommandList, _allocator: &GpuCommandAllocator) {
        let Some(list) = vulkan_list(list) else {
            return;
        };
        *list.bound_layout.lock() = vk::PipelineLayout::null();
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(e) = unsafe { self.device.begin_command_buffer(list.buffer, &info) } {
            log::error!("vulkan: failed to begin command buffer: {e:?}");
        }
    }

    fn record(&self, list: &GpuCommandList, command: &Command) {
        let Some(list) = vulkan_list(list) else {
            return;
        };
        let buffer = list.buffer;
        unsafe {
            match command {
                Command::SetPipelineState(handle) => {
                    let pipelines = self.pipelines.lock();
                    let Some(pipeline) = pipelines.get(&handle.raw()) else {
                        panic!("pipeline handle {} was never registered", handle.raw());
                    };
                    self.device.cmd_bind_pipeline(buffer, list.bind_point, *pipeline);
                }
                Command::SetRootSignature(handle) => {
                    let layouts = self.layouts.lock();
                    let Some(layout) = layouts.get(&handle.raw()) else {
                        panic!("root signature handle {} was never registered", handle.raw());
                    };
                    *list.bound_layout.lock() = *layout;
                }
                Command::SetVertexBuffer { buffer: vb, .. } => {
                    if let Some(vk_buffer) = vulkan_resource(vb).and_then(VulkanResource::buffer) {
                        self.device.cmd_bind_vertex_buffers(buffer, 0, &[vk_buffer], &[0]);
                    }
                }
                Command::SetIndexBuffer { buffer: ib, format, .. } => {
                    if let Some(vk_buffer) = vulkan_resource(ib).and_then(VulkanResource::buffer) {
                        self.device.cmd_bind_index_buffer(
                            buffer,
                            vk_buffer,
                            0,
                            index_format_to_vk(*format),
                        );
                    }
                }
                Command::SetConstants { slot, allocation } => {
                    let layout = *list.bound_layout.lock();
                    assert!(
                        layout != vk::PipelineLayout::null(),
                        "set_constants requires a bound root signature"
                    );
                    // Constants bind by GPU virtual address pushed into the
                    // root range; shaders read through buffer device address.
                    self.device.cmd_push_constants(
                        buffer,
                        layout,
                        vk::ShaderStageFlags::ALL,
                        slot * 8,
                        &allocation.gpu_address.to_le_bytes(),
                    );
                }
                Command::SetShaderResources { slot, table } => {
                    let layout = *list.bound_layout.lock();
                    assert!(
                        layout != vk::PipelineLayout::null(),
                        "set_shader_resources requires a bound root signature"
                    );
                    let set = self.bound_sets.lock()[table.pool.index()];
                    if set == vk::DescriptorSet::null() {
                        log::error!("vulkan: descriptor pool {:?} has no set", table.pool);
                        return;
                    }
                    self.device.cmd_bind_descriptor_sets(
                        buffer,
                        list.bind_point,
                        layout,
                        *slot,
                        &[set],
                        &[],
                    );
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => {
                    self.device.cmd_draw(
                        buffer,
                        *vertex_count,
                        *instance_count,
                        *first_vertex,
                        *first_instance,
                    );
                }
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                } => {
                    self.device.cmd_draw_indexed(
                        buffer,
                        *index_count,
                        *instance_count,
                        *first_index,
                        *base_vertex,
                        *first_instance,
                    );
                }
                Command::Dispatch { x, y, z } => {
                    self.device.cmd_dispatch(buffer, *x, *y, *z);
                }
                Command::Barriers(barriers) => {
                    self.record_barriers(buffer, barriers);
                }
                Command::CopyBuffer { src, dst, size } => {
                    let src_buffer = vulkan_resource(src).and_then(VulkanResource::buffer);
                    let dst_buffer = vulkan_resource(dst).and_then(VulkanResource::buffer);
                    if let (Some(src_buffer), Some(dst_buffer)) = (src_buffer, dst_buffer) {
                        let region = vk::BufferCopy::default().size(*size);
                        self.device
                            .cmd_copy_buffer(buffer, src_buffer, dst_buffer, &[region]);
                    }
                }
            }
        }
    }

    fn close_command_list(&self, list: &GpuCommandList) {
        let Some(list) = vulkan_list(list) else {
            return;
        };
        if let Err(e) = unsafe { self.device.end_command_buffer(list.buffer) } {
            log::error!("vulkan: failed to end command buffer: {e:?}");
        }
    }

    fn create_fence(&self, initial: u64) -> Result<GpuFence, GraphicsError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { self.device.create_semaphore(&info, None) }
            .map_err(|e| map_vk_error(e, "failed to create timeline semaphore"))?;
        Ok(GpuFence::Vulkan(VulkanFence {
            device: self.device.clone(),
            semaphore,
        }))
    }

    fn submit(
        &self,
        class: QueueClass,
        lists: &[&GpuCommandList],
        wait: Option<(&GpuFence, u64)>,
        signal: Option<(&GpuFence, u64)>,
    ) -> Result<(), GraphicsError> {
        let buffer_infos: Vec<vk::CommandBufferSubmitInfo> = lists
            .iter()
            .filter_map(|list| vulkan_list(list))
            .map(|list| vk::CommandBufferSubmitInfo::default().command_buffer(list.buffer))
            .collect();

        let mut wait_infos = Vec::new();
        if let Some((fence, value)) = wait {
            wait_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(vulkan_fence(fence)?.semaphore)
                    .value(value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }
        let mut signal_infos = Vec::new();
        if let Some((fence, value)) = signal {
            signal_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(vulkan_fence(fence)?.semaphore)
                    .value(value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }

        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&buffer_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe {
            self.device
                .queue_submit2(self.queue_for(class), &[submit], vk::Fence::null())
        }
        .map_err(|e| map_vk_error(e, "queue submission failed"))
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), GraphicsError> {
        let fence = vulkan_fence(fence)?;
        let semaphores = [fence.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&info, u64::MAX) }
            .map_err(|e| map_vk_error(e, "fence wait failed"))
    }

    fn fence_completed_value(&self, fence: &GpuFence) -> u64 {
        match vulkan_fence(fence) {
            Ok(fence) => unsafe {
                self.device
                    .get_semaphore_counter_value(fence.semaphore)
                    .unwrap_or(0)
            },
            Err(_) => 0,
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for sampler in self.samplers.lock().drain(..) {
                self.device.destroy_sampler(sampler, None);
            }
            // The allocator must release its memory blocks before the device
            // goes away.
            drop(self.allocator.lock().take());
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("physical_device", &self.physical_device)
            .finish_non_exhaustive()
    }
}
