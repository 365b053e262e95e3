//! Descriptor and view-table allocation.
//!
//! Four typed pools (SRV/CBV/UAV, render target, depth stencil, sampler)
//! each split into a permanent prefix and a per-frame suffix:
//!
//! - the *static* region is reserved through `create_permanent_*` before any
//!   frame begins and survives for the device's lifetime;
//! - the *dynamic* region is bump-allocated by the per-view `create_*` calls
//!   while a frame is being recorded, and rewound by [`prepare`] /
//!   [`reset`].
//!
//! Dynamic allocations can never collide with static ones: the dynamic
//! offset always starts at the static count, and the static count is frozen
//! while a frame is open.
//!
//! [`prepare`]: DescriptorAllocator::prepare
//! [`reset`]: DescriptorAllocator::reset

use std::sync::Arc;

use crate::backend::{GpuDescriptorPool, GpuDevice, GpuResource, ViewDescriptor};
use crate::caps::DeviceCapabilities;
use crate::constants::{ConstantAllocation, ConstantPool};
use crate::error::GraphicsError;
use crate::types::{DescriptorPoolKind, SamplerDescriptor};

/// Handle to a single descriptor slot.
///
/// Transient handles are valid until the next [`DescriptorAllocator::reset`];
/// handles into a permanent table are valid for the allocator's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    /// Pool the slot lives in.
    pub pool: DescriptorPoolKind,
    /// Slot index inside the pool.
    pub index: u32,
}

/// A contiguous range of descriptor slots in one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorTable {
    /// Pool the range lives in.
    pub pool: DescriptorPoolKind,
    /// First slot of the range.
    pub start: u32,
    /// Number of slots.
    pub count: u32,
}

impl DescriptorTable {
    /// Handle to the `slot`-th entry of the table.
    pub fn slot(&self, slot: u32) -> DescriptorHandle {
        assert!(slot < self.count, "descriptor table slot out of range");
        DescriptorHandle {
            pool: self.pool,
            index: self.start + slot,
        }
    }
}

/// Bookkeeping for one typed pool.
struct PoolState {
    kind: DescriptorPoolKind,
    gpu: GpuDescriptorPool,
    capacity: u32,
    static_count: u32,
    dynamic_next: u32,
}

impl PoolState {
    fn reserve_static(&mut self, count: u32) -> u32 {
        assert!(
            self.static_count + count <= self.capacity,
            "{:?} descriptor pool exhausted ({} static + {} requested > {} capacity)",
            self.kind,
            self.static_count,
            count,
            self.capacity
        );
        let start = self.static_count;
        self.static_count += count;
        self.dynamic_next = self.static_count;
        start
    }

    fn reserve_dynamic(&mut self) -> u32 {
        assert!(
            self.dynamic_next < self.capacity,
            "{:?} descriptor pool exhausted ({} slots)",
            self.kind,
            self.capacity
        );
        let index = self.dynamic_next;
        self.dynamic_next += 1;
        index
    }
}

/// Allocator over the four typed descriptor pools.
pub struct DescriptorAllocator {
    device: Arc<dyn GpuDevice>,
    pools: [PoolState; 4],
    mid_frame: bool,
}

impl DescriptorAllocator {
    /// Create the four pools with the capacities the device reports.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        caps: &DeviceCapabilities,
    ) -> Result<Self, GraphicsError> {
        let mut pools = Vec::with_capacity(4);
        for kind in DescriptorPoolKind::ALL {
            let capacity = caps.descriptor_capacity(kind);
            let gpu = device.create_descriptor_pool(kind, capacity)?;
            pools.push(PoolState {
                kind,
                gpu,
                capacity,
                static_count: 0,
                dynamic_next: 0,
            });
        }
        let pools = match <[PoolState; 4]>::try_from(pools) {
            Ok(pools) => pools,
            Err(_) => unreachable!("exactly four pool kinds"),
        };
        Ok(Self {
            device,
            pools,
            mid_frame: false,
        })
    }

    /// Whether a frame is currently open.
    pub fn is_mid_frame(&self) -> bool {
        self.mid_frame
    }

    /// Open the frame: freeze static counts and rewind the dynamic regions.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already open.
    pub fn prepare(&mut self) {
        assert!(!self.mid_frame, "prepare() called while a frame is open");
        self.mid_frame = true;
        for pool in &mut self.pools {
            pool.dynamic_next = pool.static_count;
        }
    }

    /// Close the frame: invalidate every transient handle and rewind the
    /// dynamic regions.
    pub fn reset(&mut self) {
        self.mid_frame = false;
        for pool in &mut self.pools {
            pool.dynamic_next = pool.static_count;
        }
    }

    /// Reserve `count` permanent SRV/CBV/UAV slots.
    ///
    /// # Panics
    ///
    /// Panics when called mid-frame: the static region must be fixed before
    /// any frame begins.
    pub fn create_permanent_resource(&mut self, count: u32) -> DescriptorTable {
        self.reserve_permanent(DescriptorPoolKind::Resource, count)
    }

    /// Reserve `count` permanent render-target slots.
    pub fn create_permanent_render_target(&mut self, count: u32) -> DescriptorTable {
        self.reserve_permanent(DescriptorPoolKind::RenderTarget, count)
    }

    /// Reserve `count` permanent depth-stencil slots.
    pub fn create_permanent_depth_stencil(&mut self, count: u32) -> DescriptorTable {
        self.reserve_permanent(DescriptorPoolKind::DepthStencil, count)
    }

    /// Reserve `count` permanent sampler slots.
    pub fn create_permanent_sampler(&mut self, count: u32) -> DescriptorTable {
        self.reserve_permanent(DescriptorPoolKind::Sampler, count)
    }

    /// Write a view into a slot of a permanent table.
    pub fn write_permanent(&self, table: &DescriptorTable, slot: u32, view: &ViewDescriptor) {
        assert_eq!(
            view.pool_kind(),
            table.pool,
            "view kind does not match the table's pool"
        );
        let handle = table.slot(slot);
        let pool = &self.pools[table.pool.index()];
        assert!(
            handle.index < pool.static_count,
            "write_permanent() targets a slot outside the static region"
        );
        self.device.write_descriptor(&pool.gpu, handle.index, view);
    }

    /// Allocate a transient shader-resource view.
    ///
    /// # Panics
    ///
    /// Panics when called outside an open frame.
    pub fn create_srv(&mut self, resource: &Arc<GpuResource>) -> DescriptorHandle {
        self.write_dynamic(ViewDescriptor::ShaderResource {
            resource: Arc::clone(resource),
        })
    }

    /// Allocate a transient unordered-access view.
    pub fn create_uav(&mut self, resource: &Arc<GpuResource>) -> DescriptorHandle {
        self.write_dynamic(ViewDescriptor::UnorderedAccess {
            resource: Arc::clone(resource),
        })
    }

    /// Allocate a transient constant-buffer view over a constant allocation.
    pub fn create_cbv(
        &mut self,
        constants: &ConstantPool,
        allocation: &ConstantAllocation,
    ) -> DescriptorHandle {
        self.write_dynamic(ViewDescriptor::ConstantBuffer {
            resource: constants.page_buffer(allocation.page),
            offset: allocation.offset,
            size: allocation.size as u32,
        })
    }

    /// Allocate a transient render-target view.
    pub fn create_rtv(&mut self, resource: &Arc<GpuResource>) -> DescriptorHandle {
        self.write_dynamic(ViewDescriptor::RenderTarget {
            resource: Arc::clone(resource),
        })
    }

    /// Allocate a transient depth-stencil view.
    pub fn create_dsv(&mut self, resource: &Arc<GpuResource>) -> DescriptorHandle {
        self.write_dynamic(ViewDescriptor::DepthStencil {
            resource: Arc::clone(resource),
        })
    }

    /// Allocate a transient sampler.
    pub fn create_sampler(&mut self, descriptor: SamplerDescriptor) -> DescriptorHandle {
        self.write_dynamic(ViewDescriptor::Sampler { descriptor })
    }

    /// Static slots reserved in a pool.
    pub fn static_count(&self, kind: DescriptorPoolKind) -> u32 {
        self.pools[kind.index()].static_count
    }

    /// Transient slots handed out in the current frame.
    pub fn dynamic_count(&self, kind: DescriptorPoolKind) -> u32 {
        let pool = &self.pools[kind.index()];
        pool.dynamic_next - pool.static_count
    }

    fn reserve_permanent(&mut self, kind: DescriptorPoolKind, count: u32) -> DescriptorTable {
        assert!(
            !self.mid_frame,
            "permanent descriptors cannot be allocated while a frame is open"
        );
        assert!(count > 0, "permanent descriptor tables cannot be empty");
        let start = self.pools[kind.index()].reserve_static(count);
        log::trace!(
            "descriptor allocator: reserved {} permanent {:?} slots at {}",
            count,
            kind,
            start
        );
        DescriptorTable {
            pool: kind,
            start,
            count,
        }
    }

    fn write_dynamic(&mut self, view: ViewDescriptor) -> DescriptorHandle {
        assert!(
            self.mid_frame,
            "transient descriptors require an open frame"
        );
        let kind = view.pool_kind();
        let index = self.pools[kind.index()].reserve_dynamic();
        self.device
            .write_descriptor(&self.pools[kind.index()].gpu, index, &view);
        DescriptorHandle { pool: kind, index }
    }
}

impl std::fmt::Debug for DescriptorAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("DescriptorAllocator");
        s.field("mid_frame", &self.mid_frame);
        for pool in &self.pools {
            s.field(
                match pool.kind {
                    DescriptorPoolKind::Resource => "resource",
                    DescriptorPoolKind::RenderTarget => "render_target",
                    DescriptorPoolKind::DepthStencil => "depth_stencil",
                    DescriptorPoolKind::Sampler => "sampler",
                },
                &(pool.static_count, pool.dynamic_next),
            );
        }
        s.finish()
    }
}
