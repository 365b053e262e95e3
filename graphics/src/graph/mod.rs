//! Frame graph infrastructure.
//!
//! A frame graph is a DAG of render passes connected by implicit
//! producer/consumer relationships over resource ids, rebuilt every frame.
//! Instead of explicit edges the graph keeps two reference counts per
//! resource:
//!
//! - `num_writes`: producers that have not yet executed or been culled;
//! - `num_reads`: consumers that have not yet executed or been culled.
//!
//! A pass is *ready* once every resource it reads has zero outstanding
//! writers, and *dangling* (cullable) once every resource it writes has zero
//! outstanding readers. The backbuffer's read count is pre-seeded with a
//! sentinel so passes producing it can never be culled.
//!
//! # Example
//!
//! ```ignore
//! let mut graph = builder.build(&mut resources, &mut constants, &commands)?;
//! let removed = graph.cull();
//! let ready = graph.query_complete_render_passes();
//! ```

mod builder;
mod executor;
mod pass;

pub use builder::FrameGraphBuilder;
pub use executor::{FrameContext, FrameGraphExecutor};
pub use pass::{PassKind, RenderFn, RenderPass, SetupFn, MAX_PASS_RESOURCES};

use std::collections::{HashMap, HashSet};

use crate::types::ResourceId;

/// Sentinel added to the backbuffer's read count (and to pinned resources)
/// so their producers always observe outstanding readers.
pub const EXTERNAL_READ_SENTINEL: u64 = 1 << 32;

/// Handle to a pass in the frame graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. Handles index the graph's
/// current pass list and are invalidated by
/// [`erase_render_passes`](FrameGraph::erase_render_passes); re-query after
/// every erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    fn new(index: u32) -> Self {
        Self(index)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The frame's pass list with per-resource reference counts.
pub struct FrameGraph {
    passes: Vec<RenderPass>,
    num_reads: HashMap<ResourceId, u64>,
    num_writes: HashMap<ResourceId, u64>,
}

impl FrameGraph {
    /// Seed the graph from a built pass list.
    pub(crate) fn new(passes: Vec<RenderPass>) -> Self {
        let mut num_reads: HashMap<ResourceId, u64> = HashMap::new();
        let mut num_writes: HashMap<ResourceId, u64> = HashMap::new();
        for pass in &passes {
            for &read in pass.reads() {
                *num_reads.entry(read).or_default() += 1;
            }
            for &write in pass.writes() {
                *num_writes.entry(write).or_default() += 1;
            }
        }
        // The backbuffer is consumed outside the graph (by the present), so
        // its producers must never look dangling.
        *num_reads.entry(ResourceId::BACKBUFFER).or_default() += EXTERNAL_READ_SENTINEL;

        Self {
            passes,
            num_reads,
            num_writes,
        }
    }

    /// Pin a resource as externally read, exempting its producers from
    /// culling (the backbuffer is pinned implicitly).
    pub fn preserve_resource(&mut self, id: ResourceId) {
        *self.num_reads.entry(id).or_default() += EXTERNAL_READ_SENTINEL;
    }

    /// Passes whose every written resource has zero outstanding readers.
    ///
    /// Such passes can be removed without ever executing; erasing them may
    /// make further passes dangling, so callers loop until the query comes
    /// back empty.
    pub fn query_dangling_render_passes(&self) -> Vec<PassHandle> {
        self.passes
            .iter()
            .enumerate()
            .filter(|(_, pass)| {
                pass.writes()
                    .iter()
                    .all(|id| self.outstanding_readers(*id) == 0)
            })
            .map(|(index, _)| PassHandle::new(index as u32))
            .collect()
    }

    /// Passes all of whose read resources have zero outstanding writers.
    ///
    /// This is topological readiness through reference counting: a pass with
    /// no reads is ready immediately.
    pub fn query_complete_render_passes(&self) -> Vec<PassHandle> {
        self.passes
            .iter()
            .enumerate()
            .filter(|(_, pass)| {
                pass.reads()
                    .iter()
                    .all(|id| self.outstanding_writers(*id) == 0)
            })
            .map(|(index, _)| PassHandle::new(index as u32))
            .collect()
    }

    /// Remove passes and decrement their resources' counters.
    ///
    /// Used both for culled passes and for passes that just executed: in
    /// either case the pass no longer counts as a pending producer or
    /// consumer. All outstanding handles are invalidated.
    pub fn erase_render_passes(&mut self, handles: &[PassHandle]) {
        if handles.is_empty() {
            return;
        }
        let erased: HashSet<usize> = handles
            .iter()
            .map(|handle| {
                assert!(
                    handle.index() < self.passes.len(),
                    "invalid pass handle {handle:?}"
                );
                handle.index()
            })
            .collect();

        for &index in &erased {
            let pass = &self.passes[index];
            for &read in pass.reads() {
                if let Some(count) = self.num_reads.get_mut(&read) {
                    *count -= 1;
                }
            }
            for &write in pass.writes() {
                if let Some(count) = self.num_writes.get_mut(&write) {
                    *count -= 1;
                }
            }
        }

        let mut index = 0;
        self.passes.retain(|_| {
            let keep = !erased.contains(&index);
            index += 1;
            keep
        });
    }

    /// Cull to a fixed point: repeatedly erase dangling passes until none
    /// remain. Returns the number of passes removed.
    pub fn cull(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let dangling = self.query_dangling_render_passes();
            if dangling.is_empty() {
                break;
            }
            removed += dangling.len();
            log::debug!(
                "frame graph: culling {} pass(es): {:?}",
                dangling.len(),
                dangling
                    .iter()
                    .map(|h| self.pass(*h).name())
                    .collect::<Vec<_>>()
            );
            self.erase_render_passes(&dangling);
        }
        removed
    }

    /// Get a pass by handle.
    pub fn pass(&self, handle: PassHandle) -> &RenderPass {
        &self.passes[handle.index()]
    }

    /// Get a pass mutably by handle.
    pub fn pass_mut(&mut self, handle: PassHandle) -> &mut RenderPass {
        &mut self.passes[handle.index()]
    }

    /// All remaining passes.
    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    /// Number of remaining passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Whether the graph has no passes left.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Whether any remaining pass touches the backbuffer.
    pub fn touches_backbuffer(&self) -> bool {
        self.passes.iter().any(RenderPass::touches_backbuffer)
    }

    /// Pending consumers of `id` (sentinel included for pinned resources).
    pub fn outstanding_readers(&self, id: ResourceId) -> u64 {
        self.num_reads.get(&id).copied().unwrap_or(0)
    }

    /// Pending producers of `id`.
    pub fn outstanding_writers(&self, id: ResourceId) -> u64 {
        self.num_writes.get(&id).copied().unwrap_or(0)
    }
}

impl std::fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraph")
            .field(
                "passes",
                &self.passes.iter().map(RenderPass::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pass(name: &str, kind: PassKind, reads: &[u32], writes: &[u32]) -> RenderPass {
        RenderPass::new(
            name.to_string(),
            kind,
            reads.iter().copied().map(ResourceId).collect(),
            writes.iter().copied().map(ResourceId).collect(),
            Box::new(|_| {}),
        )
    }

    fn names(graph: &FrameGraph, handles: &[PassHandle]) -> Vec<String> {
        handles
            .iter()
            .map(|h| graph.pass(*h).name().to_string())
            .collect()
    }

    #[test]
    fn test_single_backbuffer_pass_is_ready_and_not_dangling() {
        let graph = FrameGraph::new(vec![make_pass("main", PassKind::Graphics, &[], &[0])]);

        assert!(graph.query_dangling_render_passes().is_empty());
        let ready = graph.query_complete_render_passes();
        assert_eq!(names(&graph, &ready), vec!["main"]);
    }

    #[test]
    fn test_readiness_follows_pending_writers() {
        let graph = FrameGraph::new(vec![
            make_pass("producer", PassKind::Compute, &[], &[5]),
            make_pass("consumer", PassKind::Graphics, &[5], &[0]),
        ]);

        let ready = graph.query_complete_render_passes();
        assert_eq!(names(&graph, &ready), vec!["producer"]);
        assert_eq!(graph.outstanding_writers(ResourceId(5)), 1);
    }

    #[test]
    fn test_erase_unblocks_consumers() {
        let mut graph = FrameGraph::new(vec![
            make_pass("producer", PassKind::Compute, &[], &[5]),
            make_pass("consumer", PassKind::Graphics, &[5], &[0]),
        ]);

        let ready = graph.query_complete_render_passes();
        graph.erase_render_passes(&ready);

        assert_eq!(graph.pass_count(), 1);
        assert_eq!(graph.outstanding_writers(ResourceId(5)), 0);
        let ready = graph.query_complete_render_passes();
        assert_eq!(names(&graph, &ready), vec!["consumer"]);
    }

    #[test]
    fn test_unconsumed_pass_is_dangling() {
        let graph = FrameGraph::new(vec![
            make_pass("main", PassKind::Graphics, &[], &[0]),
            make_pass("orphan", PassKind::Compute, &[], &[9]),
        ]);

        let dangling = graph.query_dangling_render_passes();
        assert_eq!(names(&graph, &dangling), vec!["orphan"]);
    }

    #[test]
    fn test_cull_reaches_fixed_point() {
        // orphan_b feeds only orphan_a; neither feeds the backbuffer. The
        // first sweep removes orphan_a, which strands orphan_b for the
        // second sweep.
        let mut graph = FrameGraph::new(vec![
            make_pass("main", PassKind::Graphics, &[7], &[0]),
            make_pass("feeder", PassKind::Compute, &[], &[7]),
            make_pass("orphan_a", PassKind::Compute, &[8], &[9]),
            make_pass("orphan_b", PassKind::Compute, &[], &[8]),
        ]);

        let removed = graph.cull();
        assert_eq!(removed, 2);
        assert_eq!(graph.pass_count(), 2);
        assert!(graph.query_dangling_render_passes().is_empty());
        // The surviving passes are exactly those transitively required for
        // the backbuffer.
        assert!(graph.passes().iter().any(|p| p.name() == "main"));
        assert!(graph.passes().iter().any(|p| p.name() == "feeder"));
    }

    #[test]
    fn test_cull_strictly_decreases_until_empty_without_backbuffer() {
        // No pass touches resource 0, so everything is transitively
        // unconsumed and culling drains the graph completely.
        let mut graph = FrameGraph::new(vec![
            make_pass("a", PassKind::Compute, &[], &[1]),
            make_pass("b", PassKind::Compute, &[1], &[2]),
            make_pass("c", PassKind::Compute, &[2], &[3]),
        ]);

        let removed = graph.cull();
        assert_eq!(removed, 3);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_preserve_resource_exempts_producers() {
        let mut graph = FrameGraph::new(vec![make_pass("export", PassKind::Compute, &[], &[4])]);
        graph.preserve_resource(ResourceId(4));

        assert!(graph.query_dangling_render_passes().is_empty());
        assert_eq!(graph.cull(), 0);
        assert_eq!(graph.pass_count(), 1);
    }

    #[test]
    fn test_multiple_writers_gate_readiness() {
        let mut graph = FrameGraph::new(vec![
            make_pass("writer_a", PassKind::Compute, &[], &[5]),
            make_pass("writer_b", PassKind::Graphics, &[], &[5, 0]),
            make_pass("reader", PassKind::Graphics, &[5], &[0]),
        ]);

        let ready = graph.query_complete_render_passes();
        assert_eq!(names(&graph, &ready), vec!["writer_a", "writer_b"]);

        // Erasing only one writer is not enough.
        graph.erase_render_passes(&[ready[0]]);
        let ready = graph.query_complete_render_passes();
        assert_eq!(names(&graph, &ready), vec!["writer_b"]);

        graph.erase_render_passes(&ready);
        let ready = graph.query_complete_render_passes();
        assert_eq!(names(&graph, &ready), vec!["reader"]);
    }

    #[test]
    fn test_touches_backbuffer() {
        let graph = FrameGraph::new(vec![make_pass("offscreen", PassKind::Compute, &[], &[3])]);
        assert!(!graph.touches_backbuffer());

        let graph = FrameGraph::new(vec![make_pass("present", PassKind::Graphics, &[], &[0])]);
        assert!(graph.touches_backbuffer());
    }

    #[test]
    #[should_panic(expected = "invalid pass handle")]
    fn test_erase_invalid_handle_panics() {
        let mut graph = FrameGraph::new(vec![]);
        graph.erase_render_passes(&[PassHandle::new(3)]);
    }
}
