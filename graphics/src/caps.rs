//! Platform capabilities, queried once at device creation.
//!
//! Every factory in the crate receives these limits by reference instead of
//! reading file-scoped constants or global counters, so the values stay
//! lifetime-bound to the graphics module that owns the device.

/// Platform constants and pool capacities for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Minimum alignment for constant-buffer allocations.
    pub constant_buffer_alignment: u64,
    /// Placement alignment for resources inside heaps.
    pub placement_alignment: u64,
    /// Slot capacity of the SRV/CBV/UAV pool.
    pub resource_descriptor_capacity: u32,
    /// Slot capacity of the render-target pool.
    pub render_target_descriptor_capacity: u32,
    /// Slot capacity of the depth-stencil pool.
    pub depth_stencil_descriptor_capacity: u32,
    /// Slot capacity of the sampler pool.
    pub sampler_descriptor_capacity: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            constant_buffer_alignment: 256,
            placement_alignment: 64 * 1024,
            resource_descriptor_capacity: 4096,
            render_target_descriptor_capacity: 256,
            depth_stencil_descriptor_capacity: 64,
            sampler_descriptor_capacity: 128,
        }
    }
}

impl DeviceCapabilities {
    /// Capacity of the pool identified by `kind`.
    pub fn descriptor_capacity(&self, kind: crate::types::DescriptorPoolKind) -> u32 {
        use crate::types::DescriptorPoolKind;
        match kind {
            DescriptorPoolKind::Resource => self.resource_descriptor_capacity,
            DescriptorPoolKind::RenderTarget => self.render_target_descriptor_capacity,
            DescriptorPoolKind::DepthStencil => self.depth_stencil_descriptor_capacity,
            DescriptorPoolKind::Sampler => self.sampler_descriptor_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DescriptorPoolKind;

    #[test]
    fn test_defaults_are_aligned() {
        let caps = DeviceCapabilities::default();
        assert!(caps.constant_buffer_alignment.is_power_of_two());
        assert!(caps.placement_alignment.is_power_of_two());
    }

    #[test]
    fn test_per_pool_capacity() {
        let caps = DeviceCapabilities::default();
        assert_eq!(
            caps.descriptor_capacity(DescriptorPoolKind::Resource),
            caps.resource_descriptor_capacity
        );
        assert_eq!(
            caps.descriptor_capacity(DescriptorPoolKind::Sampler),
            caps.sampler_descriptor_capacity
        );
    }
}
