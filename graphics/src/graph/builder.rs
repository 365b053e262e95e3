//! Frame graph construction.

use crate::command::CommandBufferPool;
use crate::constants::ConstantPool;
use crate::context::ResourceContext;
use crate::error::GraphicsError;
use crate::graph::pass::{PassKind, RenderFn, RenderPass, SetupFn};
use crate::graph::FrameGraph;
use crate::resource::ResourcePool;

/// A pass registered on the builder, setup not yet run.
struct DeclaredPass {
    name: String,
    kind: PassKind,
    setup: SetupFn,
    render: RenderFn,
}

/// Collects render passes and turns them into a [`FrameGraph`].
///
/// [`build`](Self::build) immediately invokes every setup callback against a
/// [`ResourceContext`]; the accumulated read/write declarations seed the
/// graph's reference counts. A builder is consumed per frame; graphs are
/// rebuilt every frame rather than mutated.
///
/// # Example
///
/// ```ignore
/// let mut builder = FrameGraphBuilder::new();
/// builder.create_render_pass(
///     "tonemap",
///     PassKind::Graphics,
///     |ctx| {
///         ctx.reads(HDR_COLOR);
///         ctx.writes(ResourceId::BACKBUFFER);
///         Ok(())
///     },
///     |ctx| { /* record draws */ },
/// );
/// module.run(builder)?;
/// ```
#[derive(Default)]
pub struct FrameGraphBuilder {
    passes: Vec<DeclaredPass>,
}

impl FrameGraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a render pass.
    ///
    /// Pass identity is the name; duplicate names are allowed but make logs
    /// ambiguous.
    pub fn create_render_pass(
        &mut self,
        name: impl Into<String>,
        kind: PassKind,
        setup: impl FnMut(&mut ResourceContext<'_>) -> Result<(), GraphicsError> + 'static,
        render: impl FnMut(&mut crate::context::RenderContext<'_>) + 'static,
    ) {
        self.passes.push(DeclaredPass {
            name: name.into(),
            kind,
            setup: Box::new(setup),
            render: Box::new(render),
        });
    }

    /// Number of registered passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Whether any passes have been registered.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run every setup callback and seed the frame graph.
    ///
    /// Setup callbacks may create resources and constants; errors from those
    /// factories propagate out of the build.
    pub fn build(
        self,
        resources: &mut ResourcePool,
        constants: &mut ConstantPool,
        commands: &CommandBufferPool,
    ) -> Result<FrameGraph, GraphicsError> {
        let mut passes = Vec::with_capacity(self.passes.len());
        for mut declared in self.passes {
            let mut ctx = ResourceContext::new(resources, constants, commands);
            (declared.setup)(&mut ctx)?;
            let (reads, writes) = ctx.into_declarations();
            log::trace!(
                "frame graph: pass '{}' reads {:?} writes {:?}",
                declared.name,
                reads,
                writes
            );
            passes.push(RenderPass::new(
                declared.name,
                declared.kind,
                reads,
                writes,
                declared.render,
            ));
        }
        Ok(FrameGraph::new(passes))
    }
}

impl std::fmt::Debug for FrameGraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraphBuilder")
            .field("passes", &self.passes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::backend::GpuDevice;
    use crate::types::ResourceId;
    use std::sync::Arc;

    fn build_fixture() -> (ResourcePool, ConstantPool, CommandBufferPool) {
        let device = Arc::new(DummyDevice::new());
        let caps = device.capabilities().clone();
        let resources = ResourcePool::new(device.clone()).unwrap();
        let constants = ConstantPool::new(device.clone(), &caps).unwrap();
        let commands = CommandBufferPool::new(device);
        (resources, constants, commands)
    }

    #[test]
    fn test_build_runs_setups() {
        let (mut resources, mut constants, commands) = build_fixture();

        let mut builder = FrameGraphBuilder::new();
        builder.create_render_pass(
            "geometry",
            PassKind::Graphics,
            |ctx| {
                ctx.writes(ResourceId(1));
                ctx.writes(ResourceId::BACKBUFFER);
                Ok(())
            },
            |_| {},
        );
        builder.create_render_pass(
            "lighting",
            PassKind::Compute,
            |ctx| {
                ctx.reads(ResourceId(1));
                ctx.writes(ResourceId(2));
                Ok(())
            },
            |_| {},
        );

        assert_eq!(builder.pass_count(), 2);
        let graph = builder
            .build(&mut resources, &mut constants, &commands)
            .unwrap();
        assert_eq!(graph.pass_count(), 2);
        assert_eq!(graph.outstanding_writers(ResourceId(1)), 1);
        assert_eq!(graph.outstanding_readers(ResourceId(1)), 1);
    }

    #[test]
    fn test_setup_error_propagates() {
        let (mut resources, mut constants, commands) = build_fixture();

        let mut builder = FrameGraphBuilder::new();
        builder.create_render_pass(
            "broken",
            PassKind::Graphics,
            |ctx| {
                // A zero stride is rejected by the resource pool.
                ctx.create_vertex_buffer(&[0u8; 16], 0)?;
                Ok(())
            },
            |_| {},
        );

        assert!(builder
            .build(&mut resources, &mut constants, &commands)
            .is_err());
    }

    #[test]
    fn test_setup_can_create_resources() {
        let (mut resources, mut constants, commands) = build_fixture();

        let mut builder = FrameGraphBuilder::new();
        builder.create_render_pass(
            "upload",
            PassKind::Graphics,
            |ctx| {
                let vb = ctx.create_vertex_buffer(&[0u8; 96], 32)?;
                ctx.set_debug_name(&vb, "triangle_vb");
                let _camera = ctx.copy_constants(&[[0.0f32; 16]])?;
                ctx.writes(ResourceId::BACKBUFFER);
                Ok(())
            },
            |_| {},
        );

        let graph = builder
            .build(&mut resources, &mut constants, &commands)
            .unwrap();
        assert_eq!(graph.pass_count(), 1);
        assert_eq!(constants.allocations_in_flight(), 1);
    }
}
