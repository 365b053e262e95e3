//! Conversions from crate types to Vulkan types.

use ash::vk;

use crate::types::{
    FilterMode, AddressMode, IndexFormat, ResourceFlags, ResourceFormat, ResourceState,
    SamplerDescriptor,
};

/// Convert a resource format to a Vulkan format.
pub fn format_to_vk(format: ResourceFormat) -> vk::Format {
    match format {
        ResourceFormat::Unknown => vk::Format::UNDEFINED,
        ResourceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        ResourceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        ResourceFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        ResourceFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        ResourceFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        ResourceFormat::R32Float => vk::Format::R32_SFLOAT,
        ResourceFormat::R32Uint => vk::Format::R32_UINT,
        ResourceFormat::D32Float => vk::Format::D32_SFLOAT,
        ResourceFormat::D24UnormS8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Convert an index format to a Vulkan index type.
pub fn index_format_to_vk(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

/// Image usage flags implied by a texture's resource flags and format.
pub fn image_usage_from_flags(flags: ResourceFlags, format: ResourceFormat) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if !flags.contains(ResourceFlags::DENY_SHADER_RESOURCE) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if flags.contains(ResourceFlags::RENDER_TARGET) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if flags.contains(ResourceFlags::DEPTH_STENCIL) || format.is_depth() {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if flags.contains(ResourceFlags::UNORDERED_ACCESS) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    usage
}

/// Buffer usage flags for placed buffers.
///
/// Buffers are created with the whole-engine usage set (vertex, index,
/// uniform, storage, transfer, device address); placed sub-allocation makes
/// per-usage buffers pointless.
pub fn buffer_usage_from_flags(flags: ResourceFlags) -> vk::BufferUsageFlags {
    let mut usage = vk::BufferUsageFlags::TRANSFER_SRC
        | vk::BufferUsageFlags::TRANSFER_DST
        | vk::BufferUsageFlags::VERTEX_BUFFER
        | vk::BufferUsageFlags::INDEX_BUFFER
        | vk::BufferUsageFlags::UNIFORM_BUFFER
        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    if flags.contains(ResourceFlags::UNORDERED_ACCESS) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    usage
}

/// Image layout for a resource state.
pub fn state_to_layout(state: ResourceState, format: ResourceFormat) -> vk::ImageLayout {
    match state {
        ResourceState::Common => vk::ImageLayout::GENERAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::ShaderResource => {
            if format.is_depth() {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
        }
        ResourceState::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        // Buffer-only states never reach an image barrier.
        ResourceState::VertexAndConstantBuffer | ResourceState::IndexBuffer => {
            vk::ImageLayout::GENERAL
        }
    }
}

/// Pipeline stages and access mask for a resource state.
pub fn state_to_sync2(state: ResourceState) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match state {
        ResourceState::Common => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
        ResourceState::VertexAndConstantBuffer => (
            vk::PipelineStageFlags2::VERTEX_INPUT | vk::PipelineStageFlags2::ALL_GRAPHICS,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::UNIFORM_READ,
        ),
        ResourceState::IndexBuffer => (
            vk::PipelineStageFlags2::INDEX_INPUT,
            vk::AccessFlags2::INDEX_READ,
        ),
        ResourceState::RenderTarget => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::UnorderedAccess => (
            vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        ResourceState::DepthWrite => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthRead => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        ResourceState::ShaderResource => (
            vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ | vk::AccessFlags2::SHADER_STORAGE_READ,
        ),
        ResourceState::CopyDest => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        ResourceState::CopySource => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        ResourceState::Present => (vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::empty()),
    }
}

/// Aspect mask for a format.
pub fn aspect_for_format(format: ResourceFormat) -> vk::ImageAspectFlags {
    match format {
        ResourceFormat::D32Float => vk::ImageAspectFlags::DEPTH,
        ResourceFormat::D24UnormS8 => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Convert a sampler descriptor to a Vulkan create info.
pub fn sampler_to_vk(descriptor: &SamplerDescriptor) -> vk::SamplerCreateInfo<'static> {
    let filter = |mode: FilterMode| match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    };
    let address = match descriptor.address_mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    };
    vk::SamplerCreateInfo::default()
        .min_filter(filter(descriptor.min_filter))
        .mag_filter(filter(descriptor.mag_filter))
        .address_mode_u(address)
        .address_mode_v(address)
        .address_mode_w(address)
        .max_lod(vk::LOD_CLAMP_NONE)
}

/// Map a Vulkan error to a graphics error.
pub fn map_vk_error(result: vk::Result, what: &str) -> crate::error::GraphicsError {
    use crate::error::GraphicsError;
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        other => GraphicsError::Internal(format!("{what}: {other:?}")),
    }
}
