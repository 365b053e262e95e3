//! Dummy GPU device for testing and development.
//!
//! The dummy device performs no real GPU work but journals everything the
//! core asks of it: heap commits, placed resources (with host backing for
//! mappable memory), descriptor writes, recorded commands and queue
//! submissions with their fence wait/signal values. Submitted work
//! "completes" instantly, advancing the fence at submit time, which makes
//! the executor's synchronization observable from tests without hardware.

// Handle patterns are irrefutable when the dummy device is the only backend
// compiled in.
#![allow(irrefutable_let_patterns)]

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::caps::DeviceCapabilities;
use crate::context::Command;
use crate::error::GraphicsError;
use crate::types::{
    DescriptorPoolKind, HeapKind, HeapUsage, QueueClass, ResourceDescriptor, ResourceDimension,
};

use super::{
    AllocationInfo, GpuCommandAllocator, GpuCommandList, GpuDescriptorPool, GpuDevice, GpuFence,
    GpuHeap, GpuResource, ViewDescriptor,
};

/// Bookkeeping for a committed dummy heap.
#[derive(Debug)]
pub struct DummyHeap {
    /// Backend id.
    pub id: u64,
    /// Committed size in bytes.
    pub size: u64,
    /// Memory class.
    pub kind: HeapKind,
    /// Hosted resource categories.
    pub usage: HeapUsage,
}

/// Host storage standing in for mappable GPU memory.
struct HostBacking(UnsafeCell<Box<[u8]>>);

impl HostBacking {
    fn new(size: u64) -> Self {
        Self(UnsafeCell::new(vec![0u8; size as usize].into_boxed_slice()))
    }

    fn ptr(&self) -> NonNull<u8> {
        // The single orchestrating thread is the only writer; the pointer
        // stays valid because the boxed slice never moves.
        let slice = unsafe { &mut *self.0.get() };
        NonNull::new(slice.as_mut_ptr()).expect("boxed slice is never null")
    }
}

/// A placed dummy resource.
pub struct DummyResource {
    /// Backend id.
    pub id: u64,
    /// Placed size in bytes.
    pub size: u64,
    /// Memory class of the owning heap.
    pub heap_kind: HeapKind,
    /// Fake GPU virtual address (heap id in the high bits, offset in the
    /// low), unique per placement.
    pub gpu_address: u64,
    backing: Option<HostBacking>,
    label: Mutex<Option<String>>,
}

impl std::fmt::Debug for DummyResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyResource")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("heap_kind", &self.heap_kind)
            .field("label", &self.label.lock().unwrap().clone())
            .finish()
    }
}

/// Summary of one descriptor write, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWriteSummary {
    /// View kind written.
    pub view: &'static str,
    /// Id of the viewed resource, if any.
    pub resource_id: Option<u64>,
}

/// A dummy descriptor pool journaling its slot writes.
#[derive(Debug)]
pub struct DummyDescriptorPool {
    /// Backend id.
    pub id: u64,
    /// Pool kind.
    pub kind: DescriptorPoolKind,
    /// Slot capacity.
    pub capacity: u32,
    writes: Mutex<Vec<Option<DescriptorWriteSummary>>>,
}

impl DummyDescriptorPool {
    /// Slots that have ever been written.
    pub fn written_slot_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    /// The write journaled at `index`.
    pub fn write_at(&self, index: u32) -> Option<DescriptorWriteSummary> {
        self.writes
            .lock()
            .unwrap()
            .get(index as usize)
            .and_then(Clone::clone)
    }
}

/// A dummy command allocator.
#[derive(Debug)]
pub struct DummyCommandAllocator {
    /// Backend id.
    pub id: u64,
}

/// A dummy command list journaling its recorded commands.
pub struct DummyCommandList {
    /// Backend id.
    pub id: u64,
    /// Queue class the list records for.
    pub class: QueueClass,
    commands: Mutex<Vec<Command>>,
    open: AtomicBool,
}

impl std::fmt::Debug for DummyCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyCommandList")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("commands", &self.commands.lock().unwrap().len())
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}

/// The dummy fence: an atomically advanced monotonic counter.
#[derive(Debug)]
pub struct DummyFence {
    completed: AtomicU64,
}

/// One journaled queue submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    /// Queue submitted to.
    pub queue: QueueClass,
    /// Ids of the submitted lists, in order.
    pub lists: Vec<u64>,
    /// Fence value the queue waited on, if any.
    pub wait: Option<u64>,
    /// Fence value the queue signaled, if any.
    pub signal: Option<u64>,
}

/// Dummy GPU device.
#[derive(Debug, Default)]
pub struct DummyDevice {
    caps: DeviceCapabilities,
    next_id: AtomicU64,
    submissions: Mutex<Vec<SubmissionRecord>>,
}

impl DummyDevice {
    /// Create a new dummy device with default capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dummy device with explicit capabilities.
    pub fn with_capabilities(caps: DeviceCapabilities) -> Self {
        Self {
            caps,
            next_id: AtomicU64::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Every submission journaled so far, in submit order.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.submissions.lock().unwrap().clone()
    }

    /// Drain the submission journal.
    pub fn take_submissions(&self) -> Vec<SubmissionRecord> {
        std::mem::take(&mut self.submissions.lock().unwrap())
    }

    /// Commands recorded into a list (the journal survives close, and is
    /// reset by the next begin).
    pub fn recorded_commands(&self, list: &GpuCommandList) -> Vec<Command> {
        let GpuCommandList::Dummy(list) = list else {
            return Vec::new();
        };
        list.commands.lock().unwrap().clone()
    }

    /// Count (signal, wait) pairs between two different queues: submissions
    /// on one queue that waited a value another queue signaled.
    pub fn cross_queue_sync_pairs(&self) -> usize {
        let submissions = self.submissions.lock().unwrap();
        submissions
            .iter()
            .filter(|waiter| {
                waiter.wait.is_some_and(|value| {
                    submissions.iter().any(|signaler| {
                        signaler.queue != waiter.queue && signaler.signal == Some(value)
                    })
                })
            })
            .count()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn resource_allocation_info(&self, desc: &ResourceDescriptor) -> AllocationInfo {
        let size = match desc.dimension {
            ResourceDimension::Buffer => desc.width.max(1),
            ResourceDimension::Texture2d => {
                let bytes_per_element = desc.format.bytes_per_element().max(1) as u64;
                desc.width.max(1) * desc.height.max(1) as u64 * bytes_per_element
            }
        };
        AllocationInfo {
            size,
            alignment: self.caps.placement_alignment,
        }
    }

    fn create_heap(
        &self,
        size: u64,
        kind: HeapKind,
        usage: HeapUsage,
    ) -> Result<GpuHeap, GraphicsError> {
        let id = self.next_id();
        log::trace!("dummy: heap {} ({} KiB, {:?}, {:?})", id, size / 1024, kind, usage);
        Ok(GpuHeap::Dummy(DummyHeap {
            id,
            size,
            kind,
            usage,
        }))
    }

    fn destroy_heap(&self, heap: &GpuHeap) {
        if let GpuHeap::Dummy(heap) = heap {
            log::trace!("dummy: destroyed heap {}", heap.id);
        }
    }

    fn create_placed_resource(
        &self,
        heap: &GpuHeap,
        offset: u64,
        desc: &ResourceDescriptor,
    ) -> Result<GpuResource, GraphicsError> {
        let GpuHeap::Dummy(heap) = heap else {
            return Err(GraphicsError::InvalidParameter(
                "heap belongs to a different device".to_string(),
            ));
        };
        let info = self.resource_allocation_info(desc);
        if offset + info.size > heap.size {
            return Err(GraphicsError::Internal(format!(
                "placement at {offset}+{} escapes heap of {} bytes",
                info.size, heap.size
            )));
        }
        let backing = match heap.kind {
            HeapKind::Default => None,
            HeapKind::Upload | HeapKind::Readback => Some(HostBacking::new(info.size)),
        };
        Ok(GpuResource::Dummy(DummyResource {
            id: self.next_id(),
            size: info.size,
            heap_kind: heap.kind,
            gpu_address: (heap.id << 32) | offset,
            backing,
            label: Mutex::new(desc.label.clone()),
        }))
    }

    fn resource_gpu_address(&self, resource: &GpuResource) -> u64 {
        let GpuResource::Dummy(resource) = resource else {
            return 0;
        };
        resource.gpu_address
    }

    fn map_resource(&self, resource: &GpuResource) -> Result<NonNull<u8>, GraphicsError> {
        let GpuResource::Dummy(resource) = resource else {
            return Err(GraphicsError::InvalidParameter(
                "resource belongs to a different device".to_string(),
            ));
        };
        resource
            .backing
            .as_ref()
            .map(HostBacking::ptr)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "resource {} is not host-visible",
                    resource.id
                ))
            })
    }

    fn unmap_resource(&self, resource: &GpuResource) {
        log::trace!("dummy: unmapped resource {}", resource.debug_id());
    }

    fn set_debug_name(&self, resource: &GpuResource, name: &str) {
        if let GpuResource::Dummy(resource) = resource {
            *resource.label.lock().unwrap() = Some(name.to_string());
        }
    }

    fn create_descriptor_pool(
        &self,
        kind: DescriptorPoolKind,
        capacity: u32,
    ) -> Result<GpuDescriptorPool, GraphicsError> {
        Ok(GpuDescriptorPool::Dummy(DummyDescriptorPool {
            id: self.next_id(),
            kind,
            capacity,
            writes: Mutex::new(vec![None; capacity as usize]),
        }))
    }

    fn write_descriptor(&self, pool: &GpuDescriptorPool, index: u32, view: &ViewDescriptor) {
        let GpuDescriptorPool::Dummy(pool) = pool else {
            return;
        };
        assert!(
            index < pool.capacity,
            "descriptor write at {} exceeds pool capacity {}",
            index,
            pool.capacity
        );
        let summary = match view {
            ViewDescriptor::ShaderResource { resource } => DescriptorWriteSummary {
                view: "srv",
                resource_id: Some(resource.debug_id()),
            },
            ViewDescriptor::UnorderedAccess { resource } => DescriptorWriteSummary {
                view: "uav",
                resource_id: Some(resource.debug_id()),
            },
            ViewDescriptor::ConstantBuffer { resource, .. } => DescriptorWriteSummary {
                view: "cbv",
                resource_id: Some(resource.debug_id()),
            },
            ViewDescriptor::RenderTarget { resource } => DescriptorWriteSummary {
                view: "rtv",
                resource_id: Some(resource.debug_id()),
            },
            ViewDescriptor::DepthStencil { resource } => DescriptorWriteSummary {
                view: "dsv",
                resource_id: Some(resource.debug_id()),
            },
            ViewDescriptor::Sampler { .. } => DescriptorWriteSummary {
                view: "sampler",
                resource_id: None,
            },
        };
        pool.writes.lock().unwrap()[index as usize] = Some(summary);
    }

    fn create_command_allocator(
        &self,
        class: QueueClass,
    ) -> Result<GpuCommandAllocator, GraphicsError> {
        let id = self.next_id();
        log::trace!("dummy: command allocator {} ({:?})", id, class);
        Ok(GpuCommandAllocator::Dummy(DummyCommandAllocator { id }))
    }

    fn create_command_list(
        &self,
        class: QueueClass,
        _allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError> {
        Ok(GpuCommandList::Dummy(DummyCommandList {
            id: self.next_id(),
            class,
            commands: Mutex::new(Vec::new()),
            open: AtomicBool::new(false),
        }))
    }

    fn reset_command_allocator(&self, allocator: &GpuCommandAllocator) {
        log::trace!("dummy: reset allocator {}", allocator.debug_id());
    }

    fn begin_command_list(&self, list: &GpuCommandList, _allocator: &GpuCommandAllocator) {
        let GpuCommandList::Dummy(list) = list else {
            return;
        };
        list.commands.lock().unwrap().clear();
        list.open.store(true, Ordering::Relaxed);
    }

    fn record(&self, list: &GpuCommandList, command: &Command) {
        let GpuCommandList::Dummy(list) = list else {
            return;
        };
        assert!(
            list.open.load(Ordering::Relaxed),
            "recording into a closed command list"
        );
        list.commands.lock().unwrap().push(command.clone());
    }

    fn close_command_list(&self, list: &GpuCommandList) {
        let GpuCommandList::Dummy(list) = list else {
            return;
        };
        assert!(
            list.open.swap(false, Ordering::Relaxed),
            "closing a command list that is not open"
        );
    }

    fn create_fence(&self, initial: u64) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Dummy(DummyFence {
            completed: AtomicU64::new(initial),
        }))
    }

    fn submit(
        &self,
        class: QueueClass,
        lists: &[&GpuCommandList],
        wait: Option<(&GpuFence, u64)>,
        signal: Option<(&GpuFence, u64)>,
    ) -> Result<(), GraphicsError> {
        let mut ids = Vec::with_capacity(lists.len());
        for list in lists {
            if let GpuCommandList::Dummy(list) = list {
                assert!(
                    !list.open.load(Ordering::Relaxed),
                    "submitting an open command list"
                );
                ids.push(list.id);
            }
        }

        // Work "completes" instantly, so a queue-side wait on a value no one
        // has signaled yet can never make progress; flag it instead of
        // deadlocking the test.
        if let Some((GpuFence::Dummy(fence), value)) = wait {
            if fence.completed.load(Ordering::Acquire) < value {
                return Err(GraphicsError::Internal(format!(
                    "queue wait on fence value {value} that was never signaled"
                )));
            }
        }

        if let Some((GpuFence::Dummy(fence), value)) = signal {
            fence.completed.fetch_max(value, Ordering::AcqRel);
        }

        log::trace!(
            "dummy: submit {:?} lists={:?} wait={:?} signal={:?}",
            class,
            ids,
            wait.map(|(_, value)| value),
            signal.map(|(_, value)| value)
        );
        self.submissions.lock().unwrap().push(SubmissionRecord {
            queue: class,
            lists: ids,
            wait: wait.map(|(_, value)| value),
            signal: signal.map(|(_, value)| value),
        });
        Ok(())
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), GraphicsError> {
        let GpuFence::Dummy(fence) = fence else {
            return Err(GraphicsError::InvalidParameter(
                "fence belongs to a different device".to_string(),
            ));
        };
        if fence.completed.load(Ordering::Acquire) >= value {
            Ok(())
        } else {
            Err(GraphicsError::Internal(format!(
                "host wait on fence value {value} that was never signaled"
            )))
        }
    }

    fn fence_completed_value(&self, fence: &GpuFence) -> u64 {
        let GpuFence::Dummy(fence) = fence else {
            return 0;
        };
        fence.completed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceFormat;

    #[test]
    fn test_placed_resources_have_unique_addresses() {
        let device = DummyDevice::new();
        let heap = device
            .create_heap(1 << 20, HeapKind::Default, HeapUsage::BUFFERS)
            .unwrap();

        let desc = ResourceDescriptor::buffer(1024);
        let a = device.create_placed_resource(&heap, 0, &desc).unwrap();
        let b = device.create_placed_resource(&heap, 65536, &desc).unwrap();
        assert_ne!(
            device.resource_gpu_address(&a),
            device.resource_gpu_address(&b)
        );
    }

    #[test]
    fn test_placement_outside_heap_is_rejected() {
        let device = DummyDevice::new();
        let heap = device
            .create_heap(1024, HeapKind::Default, HeapUsage::BUFFERS)
            .unwrap();
        let desc = ResourceDescriptor::buffer(1024);
        assert!(device.create_placed_resource(&heap, 512, &desc).is_err());
    }

    #[test]
    fn test_only_host_heaps_are_mappable() {
        let device = DummyDevice::new();
        let default_heap = device
            .create_heap(1 << 20, HeapKind::Default, HeapUsage::BUFFERS)
            .unwrap();
        let upload_heap = device
            .create_heap(1 << 20, HeapKind::Upload, HeapUsage::BUFFERS)
            .unwrap();

        let desc = ResourceDescriptor::buffer(256);
        let device_local = device
            .create_placed_resource(&default_heap, 0, &desc)
            .unwrap();
        let upload_desc = ResourceDescriptor::buffer(256).with_heap_kind(HeapKind::Upload);
        let staging = device
            .create_placed_resource(&upload_heap, 0, &upload_desc)
            .unwrap();

        assert!(device.map_resource(&device_local).is_err());
        assert!(device.map_resource(&staging).is_ok());
    }

    #[test]
    fn test_mapped_writes_are_visible() {
        let device = DummyDevice::new();
        let heap = device
            .create_heap(1 << 20, HeapKind::Upload, HeapUsage::BUFFERS)
            .unwrap();
        let desc = ResourceDescriptor::buffer(16).with_heap_kind(HeapKind::Upload);
        let staging = device.create_placed_resource(&heap, 0, &desc).unwrap();

        let ptr = device.map_resource(&staging).unwrap();
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0xAB, 16) };
        let again = device.map_resource(&staging).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(again.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_submission_journal_and_fence() {
        let device = DummyDevice::new();
        let fence = device.create_fence(0).unwrap();
        let allocator = device.create_command_allocator(QueueClass::Compute).unwrap();
        let list = device
            .create_command_list(QueueClass::Compute, &allocator)
            .unwrap();
        device.begin_command_list(&list, &allocator);
        device.close_command_list(&list);

        device
            .submit(QueueClass::Compute, &[&list], None, Some((&fence, 1)))
            .unwrap();
        assert_eq!(device.fence_completed_value(&fence), 1);
        assert!(device.wait_fence(&fence, 1).is_ok());
        assert!(device.wait_fence(&fence, 2).is_err());

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].queue, QueueClass::Compute);
        assert_eq!(submissions[0].signal, Some(1));
    }

    #[test]
    fn test_cross_queue_sync_pair_counting() {
        let device = DummyDevice::new();
        let fence = device.create_fence(0).unwrap();

        device
            .submit(QueueClass::Compute, &[], None, Some((&fence, 1)))
            .unwrap();
        device
            .submit(QueueClass::Graphics, &[], Some((&fence, 1)), Some((&fence, 2)))
            .unwrap();

        assert_eq!(device.cross_queue_sync_pairs(), 1);
    }

    #[test]
    #[should_panic(expected = "recording into a closed command list")]
    fn test_record_into_closed_list_panics() {
        let device = DummyDevice::new();
        let allocator = device
            .create_command_allocator(QueueClass::Graphics)
            .unwrap();
        let list = device
            .create_command_list(QueueClass::Graphics, &allocator)
            .unwrap();
        device.record(
            &list,
            &Command::Dispatch { x: 1, y: 1, z: 1 },
        );
    }

    #[test]
    fn test_texture_allocation_info() {
        let device = DummyDevice::new();
        let desc = ResourceDescriptor::texture_2d(256, 256, ResourceFormat::Rgba8Unorm);
        let info = device.resource_allocation_info(&desc);
        assert_eq!(info.size, 256 * 256 * 4);
        assert_eq!(info.alignment, device.capabilities().placement_alignment);
    }
}
