//! Bucketed GPU heap manager.
//!
//! Raw device memory is committed in heaps of fixed size classes and handed
//! out through a monotonic offset per heap. Heaps are keyed by a placement
//! key (memory class x implied usage) so buffers, textures and attachment
//! targets never share a block. A heap is never compacted and a full heap is
//! never reused before teardown; exhausting a bucket simply appends a new
//! heap.

use std::collections::HashMap;
use std::sync::Arc;

use static_assertions::const_assert;

use crate::backend::{AllocationInfo, GpuDevice, GpuHeap, GpuResource};
use crate::error::GraphicsError;
use crate::types::{HeapKind, HeapUsage, ResourceDescriptor};

/// Heap size classes, ascending. Requests above the last bucket get an
/// exactly-sized heap.
pub const HEAP_BUCKETS: [u64; 3] = [512 * 1024, 4 * 1024 * 1024, 32 * 1024 * 1024];

const_assert!(HEAP_BUCKETS[0].is_power_of_two());
const_assert!(HEAP_BUCKETS[1].is_power_of_two());
const_assert!(HEAP_BUCKETS[2].is_power_of_two());
const_assert!(HEAP_BUCKETS[0] < HEAP_BUCKETS[1]);
const_assert!(HEAP_BUCKETS[1] < HEAP_BUCKETS[2]);

/// Key a heap is filed under: memory class plus the usage categories the
/// resource's flags imply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PlacementKey {
    kind: HeapKind,
    usage: HeapUsage,
}

/// A committed memory block with a monotonic free offset.
struct Heap {
    memory: GpuHeap,
    capacity: u64,
    offset: u64,
}

impl Heap {
    /// Reserve `info.size` bytes at the next aligned offset, or `None` if the
    /// heap cannot fit the request.
    fn try_reserve(&mut self, info: &AllocationInfo) -> Option<u64> {
        let aligned = align_up(self.offset, info.alignment);
        if aligned + info.size > self.capacity {
            return None;
        }
        self.offset = aligned + info.size;
        Some(aligned)
    }

    fn used(&self) -> u64 {
        self.offset
    }
}

/// Aggregate heap usage, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStatistics {
    /// Number of committed heaps.
    pub heap_count: usize,
    /// Total committed bytes.
    pub committed_bytes: u64,
    /// Bytes handed out to placed resources.
    pub used_bytes: u64,
}

/// Bucketed allocator over committed GPU heaps.
pub struct HeapManager {
    device: Arc<dyn GpuDevice>,
    heaps: HashMap<PlacementKey, Vec<Heap>>,
}

impl HeapManager {
    /// Create an empty heap manager.
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            heaps: HashMap::new(),
        }
    }

    /// Create a resource placed inside a managed heap.
    ///
    /// Existing heaps under the descriptor's placement key are scanned
    /// first-fit; if none can host the allocation a new heap is committed,
    /// sized to the request's bucket (or exactly, above the largest bucket).
    ///
    /// An allocation failure reported by the device is returned as-is: GPU
    /// exhaustion mid-frame is not recoverable and the caller is expected to
    /// treat the error as fatal.
    pub fn create_resource(
        &mut self,
        desc: &ResourceDescriptor,
    ) -> Result<Arc<GpuResource>, GraphicsError> {
        let device = self.device.clone();
        let info = device.resource_allocation_info(desc);
        let key = PlacementKey {
            kind: desc.heap_kind,
            usage: desc.implied_heap_usage(),
        };

        let heaps = self.heaps.entry(key).or_default();
        for heap in heaps.iter_mut() {
            if let Some(offset) = heap.try_reserve(&info) {
                let resource = device.create_placed_resource(&heap.memory, offset, desc)?;
                return Ok(Arc::new(resource));
            }
        }

        let capacity = bucket_for(info.size, info.alignment);
        log::debug!(
            "heap manager: committing {} KiB {:?}/{:?} heap (now {} heaps under key)",
            capacity / 1024,
            key.kind,
            key.usage,
            heaps.len() + 1
        );
        let memory = device.create_heap(capacity, key.kind, key.usage)?;
        let mut heap = Heap {
            memory,
            capacity,
            offset: 0,
        };
        let offset = heap.try_reserve(&info).ok_or_else(|| {
            GraphicsError::Internal(format!(
                "freshly committed {capacity}-byte heap cannot fit {} bytes",
                info.size
            ))
        })?;
        let resource = device.create_placed_resource(&heap.memory, offset, desc)?;
        heaps.push(heap);
        Ok(Arc::new(resource))
    }

    /// Aggregate statistics across all heaps.
    pub fn statistics(&self) -> HeapStatistics {
        let mut stats = HeapStatistics::default();
        for heaps in self.heaps.values() {
            for heap in heaps {
                stats.heap_count += 1;
                stats.committed_bytes += heap.capacity;
                stats.used_bytes += heap.used();
            }
        }
        stats
    }

    /// Number of heaps filed under the placement key of `desc`.
    pub fn heap_count_for(&self, desc: &ResourceDescriptor) -> usize {
        let key = PlacementKey {
            kind: desc.heap_kind,
            usage: desc.implied_heap_usage(),
        };
        self.heaps.get(&key).map_or(0, Vec::len)
    }
}

impl Drop for HeapManager {
    fn drop(&mut self) {
        for heaps in self.heaps.values() {
            for heap in heaps {
                self.device.destroy_heap(&heap.memory);
            }
        }
    }
}

impl std::fmt::Debug for HeapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.statistics();
        f.debug_struct("HeapManager")
            .field("heap_count", &stats.heap_count)
            .field("committed_bytes", &stats.committed_bytes)
            .field("used_bytes", &stats.used_bytes)
            .finish()
    }
}

/// Round an allocation up to its heap bucket.
fn bucket_for(size: u64, alignment: u64) -> u64 {
    for bucket in HEAP_BUCKETS {
        if size <= bucket {
            return bucket;
        }
    }
    align_up(size, alignment)
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
    use crate::types::{ResourceFlags, ResourceFormat};

    fn create_manager() -> HeapManager {
        HeapManager::new(Arc::new(DummyDevice::new()))
    }

    #[test]
    fn test_bucket_for() {
        assert_eq!(bucket_for(1, 65536), HEAP_BUCKETS[0]);
        assert_eq!(bucket_for(512 * 1024, 65536), HEAP_BUCKETS[0]);
        assert_eq!(bucket_for(512 * 1024 + 1, 65536), HEAP_BUCKETS[1]);
        assert_eq!(bucket_for(5 * 1024 * 1024, 65536), HEAP_BUCKETS[2]);
        // Above the largest bucket: exact, alignment-rounded.
        assert_eq!(bucket_for(40 * 1024 * 1024, 65536), 40 * 1024 * 1024);
        assert_eq!(
            bucket_for(40 * 1024 * 1024 + 1, 65536),
            40 * 1024 * 1024 + 65536
        );
    }

    #[test]
    fn test_same_bucket_shares_heap_until_overflow() {
        let mut manager = create_manager();
        let desc = ResourceDescriptor::buffer(200 * 1024).with_label("shared");

        // Two 200 KiB buffers fit one 512 KiB heap (offsets 0 and 256 KiB
        // after 64 KiB placement alignment).
        let _a = manager.create_resource(&desc).unwrap();
        let _b = manager.create_resource(&desc).unwrap();
        assert_eq!(manager.heap_count_for(&desc), 1);

        // The third overflows the bucket and lands in a fresh heap.
        let _c = manager.create_resource(&desc).unwrap();
        assert_eq!(manager.heap_count_for(&desc), 2);

        let stats = manager.statistics();
        assert_eq!(stats.heap_count, 2);
        assert_eq!(stats.committed_bytes, 2 * HEAP_BUCKETS[0]);
    }

    #[test]
    fn test_placement_keys_separate_heaps() {
        let mut manager = create_manager();

        let buffer = ResourceDescriptor::buffer(1024);
        let texture = ResourceDescriptor::texture_2d(64, 64, ResourceFormat::Rgba8Unorm);
        let target = ResourceDescriptor::texture_2d(64, 64, ResourceFormat::Rgba8Unorm)
            .with_flags(ResourceFlags::RENDER_TARGET);

        manager.create_resource(&buffer).unwrap();
        manager.create_resource(&texture).unwrap();
        manager.create_resource(&target).unwrap();

        // Three placement keys, three heaps, even though everything would
        // have fit in one bucket.
        assert_eq!(manager.statistics().heap_count, 3);
        assert_eq!(manager.heap_count_for(&buffer), 1);
        assert_eq!(manager.heap_count_for(&texture), 1);
        assert_eq!(manager.heap_count_for(&target), 1);
    }

    #[test]
    fn test_upload_and_default_heaps_are_distinct() {
        let mut manager = create_manager();

        let default = ResourceDescriptor::buffer(1024);
        let upload = ResourceDescriptor::buffer(1024).with_heap_kind(HeapKind::Upload);

        manager.create_resource(&default).unwrap();
        manager.create_resource(&upload).unwrap();

        assert_eq!(manager.heap_count_for(&default), 1);
        assert_eq!(manager.heap_count_for(&upload), 1);
        assert_eq!(manager.statistics().heap_count, 2);
    }

    #[test]
    fn test_oversized_request_gets_exact_heap() {
        let mut manager = create_manager();
        let desc = ResourceDescriptor::buffer(48 * 1024 * 1024).with_label("huge");

        manager.create_resource(&desc).unwrap();

        let stats = manager.statistics();
        assert_eq!(stats.heap_count, 1);
        assert_eq!(stats.committed_bytes, 48 * 1024 * 1024);
    }

    #[test]
    fn test_offsets_advance_monotonically() {
        // Placed resources in the dummy device encode heap id and offset in
        // their GPU address, so distinct offsets yield distinct addresses.
        let device = Arc::new(DummyDevice::new());
        let mut manager = HeapManager::new(device.clone());
        let desc = ResourceDescriptor::buffer(1024);

        let a = manager.create_resource(&desc).unwrap();
        let b = manager.create_resource(&desc).unwrap();
        assert_ne!(
            device.resource_gpu_address(&a),
            device.resource_gpu_address(&b)
        );
    }
}
