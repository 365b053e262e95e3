//! Command-buffer recycling pool.
//!
//! Command buffers and their backing allocators circulate through per-queue
//! shelves: acquiring hands out an open lease, and dropping the lease resets
//! the pair and returns it to its shelf. A command buffer's lifetime *is* its
//! pool membership; no caller ever frees one explicitly.
//!
//! # Usage
//!
//! ```ignore
//! let lease = pool.get_direct()?;
//! // record through the lease, submit its list...
//! drop(lease); // pair returns to the graphics shelf
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::backend::{GpuCommandAllocator, GpuCommandList, GpuDevice};
use crate::context::Command;
use crate::error::GraphicsError;
use crate::types::QueueClass;

/// Free lists for one queue class: bare allocators and ready
/// (allocator, command-buffer) pairs.
#[derive(Default)]
struct Shelf {
    allocators: Vec<GpuCommandAllocator>,
    ready: Vec<(GpuCommandAllocator, GpuCommandList)>,
}

/// Recycling pool of command buffers, one shelf per queue class.
///
/// The pool is used only from the single orchestrating thread; the shared
/// shelves exist so leases can return themselves on drop.
pub struct CommandBufferPool {
    device: Arc<dyn GpuDevice>,
    shelves: [Rc<RefCell<Shelf>>; 3],
}

impl CommandBufferPool {
    /// Create an empty pool.
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            shelves: [
                Rc::new(RefCell::new(Shelf::default())),
                Rc::new(RefCell::new(Shelf::default())),
                Rc::new(RefCell::new(Shelf::default())),
            ],
        }
    }

    /// Acquire an open command buffer on the graphics queue.
    pub fn get_direct(&self) -> Result<CommandBufferLease, GraphicsError> {
        self.acquire(QueueClass::Graphics)
    }

    /// Acquire an open command buffer on the compute queue.
    pub fn get_compute(&self) -> Result<CommandBufferLease, GraphicsError> {
        self.acquire(QueueClass::Compute)
    }

    /// Acquire an open command buffer on the copy queue.
    pub fn get_copy(&self) -> Result<CommandBufferLease, GraphicsError> {
        self.acquire(QueueClass::Copy)
    }

    /// Ready pairs currently shelved for `class`.
    pub fn ready_pair_count(&self, class: QueueClass) -> usize {
        self.shelves[class.index()].borrow().ready.len()
    }

    /// Bare allocators currently shelved for `class`.
    pub fn bare_allocator_count(&self, class: QueueClass) -> usize {
        self.shelves[class.index()].borrow().allocators.len()
    }

    fn acquire(&self, class: QueueClass) -> Result<CommandBufferLease, GraphicsError> {
        let shelf = Rc::clone(&self.shelves[class.index()]);
        let (allocator, list) = {
            let mut inner = shelf.borrow_mut();
            match inner.ready.pop() {
                Some(pair) => pair,
                None => {
                    let allocator = match inner.allocators.pop() {
                        Some(allocator) => allocator,
                        None => self.device.create_command_allocator(class)?,
                    };
                    let list = self.device.create_command_list(class, &allocator)?;
                    (allocator, list)
                }
            }
        };
        self.device.begin_command_list(&list, &allocator);
        log::trace!(
            "command pool: leased {:?} buffer {} (allocator {})",
            class,
            list.debug_id(),
            allocator.debug_id()
        );
        Ok(CommandBufferLease {
            device: self.device.clone(),
            shelf,
            class,
            allocator: Some(allocator),
            list: Some(list),
        })
    }
}

impl std::fmt::Debug for CommandBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferPool")
            .field(
                "ready",
                &[
                    self.ready_pair_count(QueueClass::Graphics),
                    self.ready_pair_count(QueueClass::Compute),
                    self.ready_pair_count(QueueClass::Copy),
                ],
            )
            .finish()
    }
}

/// Scoped lease of an (allocator, command-buffer) pair.
///
/// The lease exclusively owns the pair; on scope exit it resets the allocator
/// and shelves the pair back into the pool it was acquired from. The return
/// hook is bound at acquisition, so the lease never points into pool storage.
pub struct CommandBufferLease {
    device: Arc<dyn GpuDevice>,
    shelf: Rc<RefCell<Shelf>>,
    class: QueueClass,
    allocator: Option<GpuCommandAllocator>,
    list: Option<GpuCommandList>,
}

impl CommandBufferLease {
    /// The leased command list.
    pub fn list(&self) -> &GpuCommandList {
        self.list.as_ref().expect("lease holds its list until drop")
    }

    /// The leased allocator.
    pub fn allocator(&self) -> &GpuCommandAllocator {
        self.allocator
            .as_ref()
            .expect("lease holds its allocator until drop")
    }

    /// Queue class the pair belongs to.
    pub fn class(&self) -> QueueClass {
        self.class
    }

    /// Record a command into the leased list.
    pub fn record(&self, command: &Command) {
        self.device.record(self.list(), command);
    }

    /// Close the leased list for submission.
    pub fn close(&self) {
        self.device.close_command_list(self.list());
    }
}

impl Drop for CommandBufferLease {
    fn drop(&mut self) {
        let (Some(allocator), Some(list)) = (self.allocator.take(), self.list.take()) else {
            return;
        };
        self.device.reset_command_allocator(&allocator);
        log::trace!(
            "command pool: returned {:?} buffer {} (allocator {})",
            self.class,
            list.debug_id(),
            allocator.debug_id()
        );
        self.shelf.borrow_mut().ready.push((allocator, list));
    }
}

impl std::fmt::Debug for CommandBufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferLease")
            .field("class", &self.class)
            .field("list", &self.list.as_ref().map(GpuCommandList::debug_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;

    fn create_pool() -> CommandBufferPool {
        CommandBufferPool::new(Arc::new(DummyDevice::new()))
    }

    #[test]
    fn test_lease_round_trip_grows_free_list_by_one() {
        let pool = create_pool();
        assert_eq!(pool.ready_pair_count(QueueClass::Graphics), 0);

        let lease = pool.get_direct().unwrap();
        assert_eq!(pool.ready_pair_count(QueueClass::Graphics), 0);

        drop(lease);
        assert_eq!(pool.ready_pair_count(QueueClass::Graphics), 1);
    }

    #[test]
    fn test_reacquire_reuses_identical_allocator() {
        let pool = create_pool();

        let first = pool.get_direct().unwrap();
        let allocator_id = first.allocator().debug_id();
        let list_id = first.list().debug_id();
        drop(first);

        let second = pool.get_direct().unwrap();
        assert_eq!(second.allocator().debug_id(), allocator_id);
        assert_eq!(second.list().debug_id(), list_id);
    }

    #[test]
    fn test_concurrent_leases_use_distinct_pairs() {
        let pool = create_pool();

        let a = pool.get_direct().unwrap();
        let b = pool.get_direct().unwrap();
        assert_ne!(a.allocator().debug_id(), b.allocator().debug_id());
        assert_ne!(a.list().debug_id(), b.list().debug_id());

        drop(a);
        drop(b);
        assert_eq!(pool.ready_pair_count(QueueClass::Graphics), 2);
    }

    #[test]
    fn test_queue_classes_have_separate_shelves() {
        let pool = create_pool();

        drop(pool.get_direct().unwrap());
        drop(pool.get_compute().unwrap());
        drop(pool.get_copy().unwrap());

        assert_eq!(pool.ready_pair_count(QueueClass::Graphics), 1);
        assert_eq!(pool.ready_pair_count(QueueClass::Compute), 1);
        assert_eq!(pool.ready_pair_count(QueueClass::Copy), 1);
    }

    #[test]
    fn test_lease_outlives_pool_handle() {
        // The shelf is shared, so a lease acquired before the pool value is
        // dropped still returns its pair without issue.
        let pool = create_pool();
        let lease = pool.get_direct().unwrap();
        drop(pool);
        drop(lease);
    }
}
