//! Sampler types and descriptors.

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest-neighbor filtering.
    Nearest,
    /// Linear interpolation.
    #[default]
    Linear,
}

/// Texture addressing mode outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Repeat the texture.
    #[default]
    Repeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Repeat with mirroring.
    MirrorRepeat,
}

/// Descriptor for a sampler written into the sampler pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDescriptor {
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Addressing mode for all coordinates.
    pub address_mode: AddressMode,
}

impl SamplerDescriptor {
    /// Linear filtering with repeat addressing.
    pub fn linear() -> Self {
        Self::default()
    }

    /// Nearest filtering with clamped addressing.
    pub fn nearest_clamp() -> Self {
        Self {
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
        }
    }
}
