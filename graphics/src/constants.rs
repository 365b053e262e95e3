//! Per-frame constant-data pool.
//!
//! The pool streams per-draw uniform blocks into large host-visible pages
//! that are mapped once and written through a bump offset. Allocations live
//! for exactly one frame: [`ConstantPool::clear`] invalidates every
//! allocation at once after the GPU has consumed the previous frame, and no
//! allocation is ever freed individually.
//!
//! # Usage
//!
//! ```ignore
//! // During a frame:
//! let camera = pool.copy_constants(&[camera_uniforms])?;
//! ctx.set_constants(0, camera);
//!
//! // Once per frame, after the previous frame's fence:
//! pool.clear();
//! ```

use std::ptr::NonNull;
use std::sync::Arc;

use static_assertions::const_assert;

use crate::backend::{GpuDevice, GpuHeap, GpuResource};
use crate::caps::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::types::{HeapKind, HeapUsage, ResourceDescriptor, ResourceState};

/// Size of one constant page.
pub const CONSTANT_PAGE_SIZE: u64 = 512 * 1024;

/// Records per bookkeeping block.
const RECORD_BLOCK_LEN: usize = 256;

const_assert!(CONSTANT_PAGE_SIZE.is_power_of_two());
const_assert!(RECORD_BLOCK_LEN.is_power_of_two());

/// A sub-allocation from the constant pool.
///
/// `ConstantAllocation` is a plain value: it never dangles, but the GPU
/// memory it points at is only valid until the next [`ConstantPool::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConstantAllocation {
    /// GPU virtual address of the block.
    pub gpu_address: u64,
    /// Page the block lives in.
    pub page: u32,
    /// Byte offset inside the page.
    pub offset: u64,
    /// Aligned size of the block in bytes.
    pub size: u64,
}

impl ConstantAllocation {
    /// End offset inside the page (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// One mapped host-visible page.
struct Page {
    heap: GpuHeap,
    buffer: Arc<GpuResource>,
    base_address: u64,
    mapped: Option<NonNull<u8>>,
    offset: u64,
}

/// Bookkeeping store for the allocations of the current frame.
///
/// Records are appended into fixed-size blocks so the store never moves
/// existing entries mid-frame; `clear` drops the records but keeps the
/// blocks.
struct RecordStore {
    blocks: Vec<Box<[ConstantAllocation]>>,
    len: usize,
}

impl RecordStore {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            len: 0,
        }
    }

    fn push(&mut self, record: ConstantAllocation) {
        let block = self.len / RECORD_BLOCK_LEN;
        let slot = self.len % RECORD_BLOCK_LEN;
        if block == self.blocks.len() {
            self.blocks
                .push(vec![ConstantAllocation::default(); RECORD_BLOCK_LEN].into_boxed_slice());
        }
        self.blocks[block][slot] = record;
        self.len += 1;
    }

    fn get(&self, index: usize) -> Option<&ConstantAllocation> {
        if index < self.len {
            Some(&self.blocks[index / RECORD_BLOCK_LEN][index % RECORD_BLOCK_LEN])
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

/// Page-based linear allocator for per-draw constant data.
///
/// Pages are owned for the pool's whole lifetime: rolling over to a new page
/// retains the old one, and [`clear`](Self::clear) rewinds every page instead
/// of freeing anything. Only [`reset`](Self::reset) (teardown) releases
/// memory.
pub struct ConstantPool {
    device: Arc<dyn GpuDevice>,
    alignment: u64,
    pages: Vec<Page>,
    active: usize,
    records: RecordStore,
}

impl ConstantPool {
    /// Create the pool and map its first page.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        caps: &DeviceCapabilities,
    ) -> Result<Self, GraphicsError> {
        let mut pool = Self {
            device,
            alignment: caps.constant_buffer_alignment,
            pages: Vec::new(),
            active: 0,
            records: RecordStore::new(),
        };
        let page = pool.allocate_page(0)?;
        pool.pages.push(page);
        Ok(pool)
    }

    /// Allocate a constant block of at least `size` bytes.
    ///
    /// The size is rounded up to the device's minimum constant-buffer
    /// alignment. If the active page lacks room it is unmapped and the next
    /// page is mapped (allocating it first if the pool has never grown this
    /// far).
    pub fn create_constant_buffer(
        &mut self,
        size: u64,
    ) -> Result<ConstantAllocation, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "constant buffer size cannot be zero".to_string(),
            ));
        }
        let aligned = align_up(size, self.alignment);
        if aligned > CONSTANT_PAGE_SIZE {
            return Err(GraphicsError::InvalidParameter(format!(
                "constant buffer of {size} bytes exceeds the page size"
            )));
        }

        if self.pages[self.active].offset + aligned > CONSTANT_PAGE_SIZE {
            self.roll_over()?;
        }

        let page = &mut self.pages[self.active];
        let offset = page.offset;
        page.offset += aligned;

        let allocation = ConstantAllocation {
            gpu_address: page.base_address + offset,
            page: self.active as u32,
            offset,
            size: aligned,
        };
        self.records.push(allocation);
        Ok(allocation)
    }

    /// Allocate a constant block and copy `data` into it.
    pub fn copy_constants<T: bytemuck::Pod>(
        &mut self,
        data: &[T],
    ) -> Result<ConstantAllocation, GraphicsError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let allocation = self.create_constant_buffer(bytes.len() as u64)?;
        let mapped = self.pages[self.active].mapped.ok_or_else(|| {
            GraphicsError::Internal("active constant page is not mapped".to_string())
        })?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapped.as_ptr().add(allocation.offset as usize),
                bytes.len(),
            );
        }
        Ok(allocation)
    }

    /// Rewind every page and drop the frame's records.
    ///
    /// Must be called once per frame, after the GPU has consumed the prior
    /// frame's constants. Page buffers are kept.
    pub fn clear(&mut self) {
        for (index, page) in self.pages.iter_mut().enumerate() {
            page.offset = 0;
            if index != 0 {
                if page.mapped.take().is_some() {
                    self.device.unmap_resource(&page.buffer);
                }
            }
        }
        if let Some(first) = self.pages.first_mut() {
            if first.mapped.is_none() {
                first.mapped = self.device.map_resource(&first.buffer).ok();
            }
        }
        self.active = 0;
        self.records.clear();
    }

    /// Release all pages. Teardown only.
    pub fn reset(&mut self) {
        for page in self.pages.drain(..) {
            if page.mapped.is_some() {
                self.device.unmap_resource(&page.buffer);
            }
            let heap = page.heap;
            drop(page.buffer);
            self.device.destroy_heap(&heap);
        }
        self.active = 0;
        self.records.clear();
    }

    /// The buffer backing a page, for constant-buffer views.
    pub fn page_buffer(&self, page: u32) -> Arc<GpuResource> {
        Arc::clone(&self.pages[page as usize].buffer)
    }

    /// Number of allocations made since the last clear.
    pub fn allocations_in_flight(&self) -> usize {
        self.records.len()
    }

    /// The `index`-th allocation of the current frame.
    pub fn allocation(&self, index: usize) -> Option<&ConstantAllocation> {
        self.records.get(index)
    }

    /// Number of pages the pool has grown to.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Bytes used in the active page.
    pub fn active_page_used(&self) -> u64 {
        self.pages[self.active].offset
    }

    fn roll_over(&mut self) -> Result<(), GraphicsError> {
        if self.pages[self.active].mapped.take().is_some() {
            self.device.unmap_resource(&self.pages[self.active].buffer);
        }
        self.active += 1;
        if self.active == self.pages.len() {
            log::debug!(
                "constant pool: growing to {} pages ({} KiB)",
                self.pages.len() + 1,
                (self.pages.len() as u64 + 1) * CONSTANT_PAGE_SIZE / 1024
            );
            let page = self.allocate_page(self.active)?;
            self.pages.push(page);
        } else {
            let page = &mut self.pages[self.active];
            page.offset = 0;
            page.mapped = Some(self.device.map_resource(&page.buffer)?);
        }
        Ok(())
    }

    fn allocate_page(&self, index: usize) -> Result<Page, GraphicsError> {
        let heap = self
            .device
            .create_heap(CONSTANT_PAGE_SIZE, HeapKind::Upload, HeapUsage::BUFFERS)?;
        let desc = ResourceDescriptor::buffer(CONSTANT_PAGE_SIZE)
            .with_heap_kind(HeapKind::Upload)
            .with_initial_state(ResourceState::VertexAndConstantBuffer)
            .with_label(format!("constant_page_{index}"));
        let buffer = Arc::new(self.device.create_placed_resource(&heap, 0, &desc)?);
        let base_address = self.device.resource_gpu_address(&buffer);
        let mapped = Some(self.device.map_resource(&buffer)?);
        Ok(Page {
            heap,
            buffer,
            base_address,
            mapped,
            offset: 0,
        })
    }
}

impl Drop for ConstantPool {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantPool")
            .field("pages", &self.pages.len())
            .field("active", &self.active)
            .field("allocations", &self.records.len())
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// Align a value up to the given alignment.
#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;

    fn create_pool() -> ConstantPool {
        let device = Arc::new(DummyDevice::new());
        let caps = device.capabilities().clone();
        ConstantPool::new(device, &caps).unwrap()
    }

    #[test]
    fn test_allocations_are_aligned() {
        let mut pool = create_pool();

        let a = pool.create_constant_buffer(100).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(a.size, 256);

        let b = pool.create_constant_buffer(256).unwrap();
        assert_eq!(b.offset, 256);
        assert_eq!(b.size, 256);

        let c = pool.create_constant_buffer(257).unwrap();
        assert_eq!(c.offset, 512);
        assert_eq!(c.size, 512);

        assert_eq!(pool.allocations_in_flight(), 3);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut pool = create_pool();
        assert!(pool.create_constant_buffer(0).is_err());
    }

    #[test]
    fn test_oversized_rejected() {
        let mut pool = create_pool();
        assert!(pool.create_constant_buffer(CONSTANT_PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_page_boundary_spans_two_pages() {
        let mut pool = create_pool();

        // Three 200 KiB blocks: the first two fill most of page 0, the third
        // must start page 1. Ranges inside a page must never overlap.
        let size = 200 * 1024;
        let a = pool.create_constant_buffer(size).unwrap();
        let b = pool.create_constant_buffer(size).unwrap();
        let c = pool.create_constant_buffer(size).unwrap();

        assert_eq!(a.page, 0);
        assert_eq!(b.page, 0);
        assert_eq!(c.page, 1);
        assert_eq!(pool.page_count(), 2);

        assert!(a.end() <= b.offset);
        assert_eq!(c.offset, 0);
        assert_ne!(a.gpu_address, c.gpu_address);
    }

    #[test]
    fn test_exact_fill_then_roll() {
        let mut pool = create_pool();

        // 2048 x 256 bytes fills one page exactly.
        for _ in 0..2048 {
            pool.create_constant_buffer(256).unwrap();
        }
        assert_eq!(pool.page_count(), 1);
        assert_eq!(pool.active_page_used(), CONSTANT_PAGE_SIZE);

        let next = pool.create_constant_buffer(256).unwrap();
        assert_eq!(next.page, 1);
        assert_eq!(next.offset, 0);
        assert_eq!(pool.page_count(), 2);
    }

    #[test]
    fn test_clear_keeps_pages() {
        let mut pool = create_pool();

        for _ in 0..3000 {
            pool.create_constant_buffer(256).unwrap();
        }
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.allocations_in_flight(), 3000);

        pool.clear();
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.allocations_in_flight(), 0);

        // Reused from the start of page 0.
        let a = pool.create_constant_buffer(64).unwrap();
        assert_eq!(a.page, 0);
        assert_eq!(a.offset, 0);
        // Pages from the previous frame are reused before any new allocation.
        for _ in 0..2500 {
            pool.create_constant_buffer(256).unwrap();
        }
        assert_eq!(pool.page_count(), 2);
    }

    #[test]
    fn test_copy_constants_round_trips() {
        let mut pool = create_pool();

        let data: [u32; 4] = [1, 2, 3, 4];
        let allocation = pool.copy_constants(&data).unwrap();
        assert_eq!(allocation.size, 256);

        // The dummy device backs upload memory on the host, so the write is
        // observable through the mapped pointer.
        let mapped = pool.pages[allocation.page as usize].mapped.unwrap();
        let written = unsafe {
            std::slice::from_raw_parts(mapped.as_ptr().add(allocation.offset as usize), 16)
        };
        assert_eq!(written, bytemuck::cast_slice::<u32, u8>(&data));
    }

    #[test]
    fn test_record_store_blocks_are_stable() {
        let mut store = RecordStore::new();
        for i in 0..1000 {
            store.push(ConstantAllocation {
                gpu_address: i,
                page: 0,
                offset: i,
                size: 256,
            });
        }
        assert_eq!(store.len(), 1000);
        assert_eq!(store.get(999).unwrap().offset, 999);
        assert!(store.get(1000).is_none());

        let blocks_before = store.blocks.len();
        store.clear();
        assert_eq!(store.len(), 0);
        assert_eq!(store.blocks.len(), blocks_before);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }
}
