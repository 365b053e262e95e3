//! Render pass types.

use crate::context::{RenderContext, ResourceContext};
use crate::error::GraphicsError;
use crate::types::{QueueClass, ResourceId};

/// Per-pass budget for declared reads and for declared writes.
pub const MAX_PASS_RESOURCES: usize = 32;

/// Kind of work a pass records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Rasterization work on the graphics queue.
    Graphics,
    /// Compute work on the async compute queue.
    Compute,
}

impl PassKind {
    /// Queue class passes of this kind are recorded and submitted on.
    pub fn queue_class(self) -> QueueClass {
        match self {
            Self::Graphics => QueueClass::Graphics,
            Self::Compute => QueueClass::Compute,
        }
    }
}

/// Setup callback: declares the pass's resource accesses and creates frame
/// resources. Runs once per build, before any GPU work is recorded.
pub type SetupFn = Box<dyn FnMut(&mut ResourceContext<'_>) -> Result<(), GraphicsError>>;

/// Render callback: records commands into the pass's pooled command buffer.
/// Must not perform host or GPU synchronization.
pub type RenderFn = Box<dyn FnMut(&mut RenderContext<'_>)>;

/// A unit of GPU work with a declared read/write set.
///
/// Identity is the pass name. Passes are created at graph build and destroyed
/// either by culling or once the frame completes.
pub struct RenderPass {
    name: String,
    kind: PassKind,
    reads: Vec<ResourceId>,
    writes: Vec<ResourceId>,
    render: RenderFn,
}

impl RenderPass {
    pub(crate) fn new(
        name: String,
        kind: PassKind,
        reads: Vec<ResourceId>,
        writes: Vec<ResourceId>,
        render: RenderFn,
    ) -> Self {
        debug_assert!(reads.len() <= MAX_PASS_RESOURCES);
        debug_assert!(writes.len() <= MAX_PASS_RESOURCES);
        Self {
            name,
            kind,
            reads,
            writes,
            render,
        }
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pass kind.
    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Resources the pass reads, in declaration order.
    pub fn reads(&self) -> &[ResourceId] {
        &self.reads
    }

    /// Resources the pass writes, in declaration order.
    pub fn writes(&self) -> &[ResourceId] {
        &self.writes
    }

    /// Whether the pass reads `id`.
    pub fn reads_resource(&self, id: ResourceId) -> bool {
        self.reads.contains(&id)
    }

    /// Whether the pass writes `id`.
    pub fn writes_resource(&self, id: ResourceId) -> bool {
        self.writes.contains(&id)
    }

    /// Whether the pass touches the backbuffer at all.
    pub fn touches_backbuffer(&self) -> bool {
        self.reads_resource(ResourceId::BACKBUFFER) || self.writes_resource(ResourceId::BACKBUFFER)
    }

    /// Invoke the render callback.
    pub(crate) fn record(&mut self, ctx: &mut RenderContext<'_>) {
        (self.render)(ctx);
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pass(reads: &[u32], writes: &[u32]) -> RenderPass {
        RenderPass::new(
            "test".to_string(),
            PassKind::Graphics,
            reads.iter().copied().map(ResourceId).collect(),
            writes.iter().copied().map(ResourceId).collect(),
            Box::new(|_| {}),
        )
    }

    #[test]
    fn test_resource_queries() {
        let pass = make_pass(&[1, 2], &[0]);
        assert!(pass.reads_resource(ResourceId(1)));
        assert!(!pass.reads_resource(ResourceId(0)));
        assert!(pass.writes_resource(ResourceId::BACKBUFFER));
        assert!(pass.touches_backbuffer());
    }

    #[test]
    fn test_kind_to_queue_class() {
        assert_eq!(PassKind::Graphics.queue_class(), QueueClass::Graphics);
        assert_eq!(PassKind::Compute.queue_class(), QueueClass::Compute);
    }
}
