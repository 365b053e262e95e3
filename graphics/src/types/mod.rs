//! Common type definitions shared across the crate.

mod draw;
mod resource;
mod sampler;

pub use draw::{DispatchArgs, DrawIndexedIndirectArgs, DrawIndirectArgs};
pub use resource::{
    HeapKind, HeapUsage, IndexFormat, QueueClass, ResourceDescriptor, ResourceDimension,
    ResourceFlags, ResourceFormat, ResourceId, ResourceLifetime, ResourceState,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};

/// The four typed descriptor pools.
///
/// Mirrors the hardware split between shader-visible view tables
/// (`Resource` = SRV/CBV/UAV, `Sampler`) and CPU-only attachment tables
/// (`RenderTarget`, `DepthStencil`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorPoolKind {
    /// Shader resource, constant buffer and unordered access views.
    Resource,
    /// Render target views.
    RenderTarget,
    /// Depth stencil views.
    DepthStencil,
    /// Sampler descriptors.
    Sampler,
}

impl DescriptorPoolKind {
    /// All pool kinds, in pool-array order.
    pub const ALL: [DescriptorPoolKind; 4] = [
        DescriptorPoolKind::Resource,
        DescriptorPoolKind::RenderTarget,
        DescriptorPoolKind::DepthStencil,
        DescriptorPoolKind::Sampler,
    ];

    /// Index of this kind in the pool array.
    pub fn index(self) -> usize {
        match self {
            Self::Resource => 0,
            Self::RenderTarget => 1,
            Self::DepthStencil => 2,
            Self::Sampler => 3,
        }
    }

    /// Whether descriptors of this kind are visible to shaders.
    pub fn is_shader_visible(self) -> bool {
        matches!(self, Self::Resource | Self::Sampler)
    }
}
