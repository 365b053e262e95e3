//! Resource descriptors, formats and placement types.

use bitflags::bitflags;

/// Identity of a resource inside a frame graph.
///
/// Ids are caller-agreed opaque identities; the only reserved value is
/// [`ResourceId::BACKBUFFER`] (id 0), the image eventually presented to the
/// display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl ResourceId {
    /// The backbuffer, reserved id 0 in every frame graph.
    pub const BACKBUFFER: ResourceId = ResourceId(0);

    /// Whether this id refers to the backbuffer.
    pub fn is_backbuffer(self) -> bool {
        self == Self::BACKBUFFER
    }
}

/// Dimensionality of a GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    /// Linear buffer.
    Buffer,
    /// Two-dimensional texture.
    Texture2d,
}

/// Element formats for typed buffers, textures and depth targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceFormat {
    /// Structureless data (raw or structured buffers).
    #[default]
    Unknown,
    /// 8-bit RGBA, unsigned normalized.
    Rgba8Unorm,
    /// 8-bit BGRA, unsigned normalized (common swapchain format).
    Bgra8Unorm,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 32-bit float RG.
    Rg32Float,
    /// Single 32-bit float.
    R32Float,
    /// Single 32-bit unsigned integer.
    R32Uint,
    /// 32-bit float depth.
    D32Float,
    /// 24-bit depth with 8-bit stencil.
    D24UnormS8,
}

impl ResourceFormat {
    /// Whether this is a depth (or depth/stencil) format.
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8)
    }

    /// Size of one element in bytes.
    pub fn bytes_per_element(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Rgba8Unorm | Self::Bgra8Unorm => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::Rg32Float => 8,
            Self::R32Float | Self::R32Uint => 4,
            Self::D32Float | Self::D24UnormS8 => 4,
        }
    }
}

/// Logical state of a resource, used for transition barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// No particular usage.
    #[default]
    Common,
    /// Bound as vertex or constant buffer.
    VertexAndConstantBuffer,
    /// Bound as index buffer.
    IndexBuffer,
    /// Written as color render target.
    RenderTarget,
    /// Read/write through unordered access views.
    UnorderedAccess,
    /// Written as depth target.
    DepthWrite,
    /// Read-only depth (depth test + sampling).
    DepthRead,
    /// Sampled in a shader.
    ShaderResource,
    /// Destination of a copy.
    CopyDest,
    /// Source of a copy.
    CopySource,
    /// Ready for presentation.
    Present,
}

impl ResourceState {
    /// Whether the state allows GPU writes.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::RenderTarget | Self::UnorderedAccess | Self::DepthWrite | Self::CopyDest
        )
    }
}

/// Memory class a resource is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapKind {
    /// Device-local memory, not host-visible.
    #[default]
    Default,
    /// Host-visible write-combined memory for CPU -> GPU streaming.
    Upload,
    /// Host-visible cached memory for GPU -> CPU readback.
    Readback,
}

bitflags! {
    /// Resource categories a heap may host.
    ///
    /// The heap manager keys its buckets on `HeapKind` x `HeapUsage`, so
    /// buffers, plain textures and attachment textures never share a heap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeapUsage: u32 {
        /// Linear buffers.
        const BUFFERS = 1 << 0;
        /// Sampled textures.
        const TEXTURES = 1 << 1;
        /// Color attachment textures.
        const RENDER_TARGETS = 1 << 2;
        /// Depth attachment textures.
        const DEPTH_TARGETS = 1 << 3;
        /// Resources written through unordered access views.
        const UNORDERED_ACCESS = 1 << 4;
    }
}

impl Default for HeapUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Usage flags attached to a resource at creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        /// Resource may be bound as a color render target.
        const RENDER_TARGET = 1 << 0;
        /// Resource may be bound as a depth/stencil target.
        const DEPTH_STENCIL = 1 << 1;
        /// Resource may be written through unordered access views.
        const UNORDERED_ACCESS = 1 << 2;
        /// Resource is never bound as a shader resource.
        const DENY_SHADER_RESOURCE = 1 << 3;
    }
}

impl Default for ResourceFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// How long a resource is expected to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceLifetime {
    /// Lives until explicitly released.
    #[default]
    Permanent,
    /// Retired automatically at the end of the frame that created it.
    Transient,
}

/// Index element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(self) -> u64 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

/// Hardware queue classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueClass {
    /// Direct queue: graphics, compute and copy work.
    Graphics,
    /// Async compute queue.
    Compute,
    /// Transfer queue, used by the synchronous upload path.
    Copy,
}

impl QueueClass {
    /// Index of this class in per-queue arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Copy => 2,
        }
    }
}

/// Descriptor for creating a GPU resource.
///
/// A created resource is placed inside a heap owned by the heap manager and
/// stays bound to that heap until released; the heap itself never reuses the
/// occupied range before teardown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Buffer or texture.
    pub dimension: ResourceDimension,
    /// Byte size for buffers, width in texels for textures.
    pub width: u64,
    /// Height in texels; 1 for buffers.
    pub height: u32,
    /// Element stride in bytes for structured buffers; 0 otherwise.
    pub stride: u32,
    /// Element format; `Unknown` for structureless buffers.
    pub format: ResourceFormat,
    /// State the resource starts its life in.
    pub initial_state: ResourceState,
    /// Memory class.
    pub heap_kind: HeapKind,
    /// Permanent or frame-transient.
    pub lifetime: ResourceLifetime,
    /// Usage flags.
    pub flags: ResourceFlags,
}

impl Default for ResourceDimension {
    fn default() -> Self {
        Self::Buffer
    }
}

impl ResourceDescriptor {
    /// Create a buffer descriptor.
    pub fn buffer(size: u64) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            ..Default::default()
        }
    }

    /// Create a 2D texture descriptor.
    pub fn texture_2d(width: u32, height: u32, format: ResourceFormat) -> Self {
        Self {
            dimension: ResourceDimension::Texture2d,
            width: width as u64,
            height,
            format,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the element stride (structured buffers).
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Set the element format.
    pub fn with_format(mut self, format: ResourceFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the initial resource state.
    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    /// Set the memory class.
    pub fn with_heap_kind(mut self, kind: HeapKind) -> Self {
        self.heap_kind = kind;
        self
    }

    /// Set the lifetime class.
    pub fn with_lifetime(mut self, lifetime: ResourceLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the usage flags.
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether this describes a buffer.
    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    /// Total byte size for buffers, 0 for textures (device-computed).
    pub fn buffer_size(&self) -> u64 {
        if self.is_buffer() {
            self.width
        } else {
            0
        }
    }

    /// Heap categories implied by the dimension and usage flags.
    ///
    /// This is the second half of the heap manager's placement key.
    pub fn implied_heap_usage(&self) -> HeapUsage {
        let mut usage = match self.dimension {
            ResourceDimension::Buffer => HeapUsage::BUFFERS,
            ResourceDimension::Texture2d => HeapUsage::TEXTURES,
        };
        if self.flags.contains(ResourceFlags::RENDER_TARGET) {
            usage |= HeapUsage::RENDER_TARGETS;
        }
        if self.flags.contains(ResourceFlags::DEPTH_STENCIL) {
            usage |= HeapUsage::DEPTH_TARGETS;
        }
        if self.flags.contains(ResourceFlags::UNORDERED_ACCESS) {
            usage |= HeapUsage::UNORDERED_ACCESS;
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backbuffer_id() {
        assert!(ResourceId::BACKBUFFER.is_backbuffer());
        assert!(!ResourceId(3).is_backbuffer());
    }

    #[test]
    fn test_depth_formats() {
        assert!(ResourceFormat::D32Float.is_depth());
        assert!(ResourceFormat::D24UnormS8.is_depth());
        assert!(!ResourceFormat::Rgba8Unorm.is_depth());
    }

    #[test]
    fn test_implied_heap_usage() {
        let buffer = ResourceDescriptor::buffer(1024);
        assert_eq!(buffer.implied_heap_usage(), HeapUsage::BUFFERS);

        let depth = ResourceDescriptor::texture_2d(64, 64, ResourceFormat::D32Float)
            .with_flags(ResourceFlags::DEPTH_STENCIL);
        assert_eq!(
            depth.implied_heap_usage(),
            HeapUsage::TEXTURES | HeapUsage::DEPTH_TARGETS
        );

        let uav = ResourceDescriptor::buffer(256).with_flags(ResourceFlags::UNORDERED_ACCESS);
        assert_eq!(
            uav.implied_heap_usage(),
            HeapUsage::BUFFERS | HeapUsage::UNORDERED_ACCESS
        );
    }

    #[test]
    fn test_write_states() {
        assert!(ResourceState::RenderTarget.is_write());
        assert!(ResourceState::CopyDest.is_write());
        assert!(!ResourceState::ShaderResource.is_write());
        assert!(!ResourceState::Present.is_write());
    }
}
