//! Frame-graph integration tests.
//!
//! These run complete frames through [`GraphicsModule`] against the dummy
//! device and assert on its submission journal: pass ordering, culling,
//! cross-queue fencing, command buffer recycling and per-frame allocator
//! rewinds are all observable there.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rstest::rstest;

use vermilion_graphics::backend::dummy::DummyDevice;
use vermilion_graphics::{
    FrameGraphBuilder, GraphicsModule, PassKind, QueueClass, ResourceFormat, ResourceId,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create_module() -> (Arc<DummyDevice>, GraphicsModule) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let module = GraphicsModule::new_offscreen(device.clone(), 1280, 720, ResourceFormat::Bgra8Unorm)
        .expect("offscreen module");
    (device, module)
}

fn noop_graphics_pass(builder: &mut FrameGraphBuilder, name: &str, reads: Vec<u32>, writes: Vec<u32>) {
    builder.create_render_pass(
        name,
        PassKind::Graphics,
        move |ctx| {
            for &id in &reads {
                ctx.reads(ResourceId(id));
            }
            for &id in &writes {
                ctx.writes(ResourceId(id));
            }
            Ok(())
        },
        |_| {},
    );
}

fn noop_compute_pass(builder: &mut FrameGraphBuilder, name: &str, reads: Vec<u32>, writes: Vec<u32>) {
    builder.create_render_pass(
        name,
        PassKind::Compute,
        move |ctx| {
            for &id in &reads {
                ctx.reads(ResourceId(id));
            }
            for &id in &writes {
                ctx.writes(ResourceId(id));
            }
            Ok(())
        },
        |_| {},
    );
}

#[test]
fn single_backbuffer_pass_submits_one_graphics_batch() {
    let (device, mut module) = create_module();

    let mut builder = FrameGraphBuilder::new();
    noop_graphics_pass(&mut builder, "main", vec![], vec![0]);
    module.run(builder).unwrap();

    let submissions = device.take_submissions();
    // Everything lands in one graphics submission: backbuffer acquire, the
    // pass, and the present transition.
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].queue, QueueClass::Graphics);
    assert_eq!(submissions[0].lists.len(), 3);
    assert_eq!(submissions[0].wait, None);
    assert!(submissions[0].signal.is_some());

    // No cross-queue synchronization for a single-queue frame.
    assert_eq!(device.cross_queue_sync_pairs(), 0);
}

#[test]
fn compute_chain_flushes_once_for_a_single_hazard() {
    let (device, mut module) = create_module();

    // Two same-queue compute passes feed one graphics consumer: the whole
    // compute stack is flushed by the one hazard, in one submission.
    let mut builder = FrameGraphBuilder::new();
    noop_compute_pass(&mut builder, "sim", vec![], vec![7]);
    noop_compute_pass(&mut builder, "post", vec![7], vec![8]);
    noop_graphics_pass(&mut builder, "export", vec![8], vec![0]);
    module.run(builder).unwrap();

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].queue, QueueClass::Compute);
    assert_eq!(submissions[0].lists.len(), 2);
    assert_eq!(submissions[1].queue, QueueClass::Graphics);
    assert_eq!(device.cross_queue_sync_pairs(), 1);
}

#[test]
fn compute_to_graphics_hazard_produces_exactly_one_fence_pair() {
    let (device, mut module) = create_module();

    // Compute pass A writes resource 5; graphics pass B reads 5, writes the
    // backbuffer.
    let mut builder = FrameGraphBuilder::new();
    noop_compute_pass(&mut builder, "a", vec![], vec![5]);
    noop_graphics_pass(&mut builder, "b", vec![5], vec![0]);
    module.run(builder).unwrap();

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 2);

    // A's buffer is submitted on the compute queue, before B's batch.
    assert_eq!(submissions[0].queue, QueueClass::Compute);
    assert_eq!(submissions[0].lists.len(), 1);
    let compute_signal = submissions[0].signal.expect("compute flush signals");

    // B's batch waits exactly that value.
    assert_eq!(submissions[1].queue, QueueClass::Graphics);
    assert_eq!(submissions[1].wait, Some(compute_signal));

    assert_eq!(device.cross_queue_sync_pairs(), 1);
}

#[test]
fn ping_pong_hazards_fence_each_direction() {
    let (device, mut module) = create_module();

    // compute a -> graphics b -> compute c -> graphics d, alternating
    // producers across queues.
    let mut builder = FrameGraphBuilder::new();
    noop_compute_pass(&mut builder, "a", vec![], vec![5]);
    noop_graphics_pass(&mut builder, "b", vec![5], vec![6, 0]);
    noop_compute_pass(&mut builder, "c", vec![6], vec![7]);
    noop_graphics_pass(&mut builder, "d", vec![7], vec![0]);
    module.run(builder).unwrap();

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 4);
    assert_eq!(
        submissions
            .iter()
            .map(|submission| submission.queue)
            .collect::<Vec<_>>(),
        vec![
            QueueClass::Compute,
            QueueClass::Graphics,
            QueueClass::Compute,
            QueueClass::Graphics,
        ]
    );
    assert_eq!(device.cross_queue_sync_pairs(), 3);
}

#[test]
fn dangling_passes_are_culled_before_recording() {
    let (device, mut module) = create_module();

    let mut builder = FrameGraphBuilder::new();
    noop_graphics_pass(&mut builder, "main", vec![], vec![0]);
    // Writes resource 9, which nothing reads: must never be recorded.
    noop_compute_pass(&mut builder, "orphan", vec![10], vec![9]);
    // Feeds only the orphan: stranded once the orphan goes, culled on the
    // second sweep.
    noop_compute_pass(&mut builder, "orphan_feeder", vec![], vec![10]);
    module.run(builder).unwrap();

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].queue, QueueClass::Graphics);
    // acquire + main + present only; no compute submission at all.
    assert_eq!(submissions[0].lists.len(), 3);
}

#[rstest]
#[case::chain_of_two(2)]
#[case::chain_of_four(4)]
#[case::chain_of_eight(8)]
fn same_queue_chains_submit_in_dependency_order(#[case] length: u32) {
    let (device, mut module) = create_module();

    // pass_i writes resource i+1 and reads resource i (except the head);
    // the tail writes the backbuffer. All graphics: no fences needed.
    let mut builder = FrameGraphBuilder::new();
    for i in 0..length {
        let reads = if i == 0 { vec![] } else { vec![i] };
        let writes = if i == length - 1 {
            vec![i + 1, 0]
        } else {
            vec![i + 1]
        };
        noop_graphics_pass(&mut builder, &format!("pass_{i}"), reads, writes);
    }
    module.run(builder).unwrap();

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 1);
    // acquire + chain + present, ordered purely by submission.
    assert_eq!(submissions[0].lists.len(), length as usize + 2);
    assert_eq!(device.cross_queue_sync_pairs(), 0);
}

#[test]
fn command_buffers_recycle_across_frames() {
    let (device, mut module) = create_module();

    let mut builder = FrameGraphBuilder::new();
    noop_graphics_pass(&mut builder, "main", vec![], vec![0]);
    module.run(builder).unwrap();
    let first: Vec<u64> = device.take_submissions().remove(0).lists;

    let mut builder = FrameGraphBuilder::new();
    noop_graphics_pass(&mut builder, "main", vec![], vec![0]);
    module.run(builder).unwrap();
    let second: Vec<u64> = device.take_submissions().remove(0).lists;

    // The previous frame's fence was waited before building, so frame two
    // records into the identical recycled command buffers.
    let mut first_sorted = first.clone();
    first_sorted.sort_unstable();
    let mut second_sorted = second.clone();
    second_sorted.sort_unstable();
    assert_eq!(first_sorted, second_sorted);
}

#[test]
fn constants_rewind_between_frames() {
    let (_device, mut module) = create_module();

    let offsets: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..2 {
        let offsets = Rc::clone(&offsets);
        let mut builder = FrameGraphBuilder::new();
        builder.create_render_pass(
            "main",
            PassKind::Graphics,
            move |ctx| {
                ctx.writes(ResourceId::BACKBUFFER);
                let allocation = ctx.copy_constants(&[[1.0f32; 16]])?;
                offsets.borrow_mut().push(allocation.offset);
                Ok(())
            },
            |_| {},
        );
        module.run(builder).unwrap();
    }

    let offsets = offsets.borrow();
    assert_eq!(offsets.len(), 2);
    // The pool was cleared between frames, so both frames get the same page
    // offset back.
    assert_eq!(offsets[0], offsets[1]);
}

#[test]
fn transient_descriptors_start_after_permanent_region() {
    let (_device, mut module) = create_module();

    let table = module.descriptors_mut().create_permanent_resource(16);
    assert_eq!(table.start, 0);

    let indices: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
    for _ in 0..2 {
        let indices = Rc::clone(&indices);
        let backbuffer = module.backbuffer().clone();
        let mut builder = FrameGraphBuilder::new();
        builder.create_render_pass(
            "main",
            PassKind::Graphics,
            |ctx| {
                ctx.writes(ResourceId::BACKBUFFER);
                Ok(())
            },
            move |ctx| {
                let srv = ctx.descriptors().create_srv(&backbuffer);
                indices.borrow_mut().push(srv.index);
            },
        );
        module.run(builder).unwrap();
    }

    let indices = indices.borrow();
    // Dynamic slots start at the frozen static count in every frame.
    assert_eq!(*indices, vec![16, 16]);
}

#[test]
fn setup_uploads_go_through_the_copy_queue() {
    let (device, mut module) = create_module();

    let mut builder = FrameGraphBuilder::new();
    builder.create_render_pass(
        "geometry",
        PassKind::Graphics,
        |ctx| {
            let vertices = ctx.create_vertex_buffer(&[0u8; 192], 24)?;
            ctx.set_debug_name(&vertices, "quad_vertices");
            ctx.writes(ResourceId::BACKBUFFER);
            Ok(())
        },
        |_| {},
    );
    module.run(builder).unwrap();

    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 2);
    // The synchronous upload is submitted (and host-fenced) during setup,
    // before any frame submission.
    assert_eq!(submissions[0].queue, QueueClass::Copy);
    assert!(submissions[0].signal.is_some());
    assert_eq!(submissions[1].queue, QueueClass::Graphics);
}

#[test]
fn setup_errors_abort_the_frame() {
    let (device, mut module) = create_module();

    let mut builder = FrameGraphBuilder::new();
    builder.create_render_pass(
        "broken",
        PassKind::Graphics,
        |ctx| {
            ctx.create_vertex_buffer(&[], 16)?;
            Ok(())
        },
        |_| {},
    );

    assert!(module.run(builder).is_err());
    // Nothing was submitted.
    assert!(device.take_submissions().is_empty());
}

#[test]
fn render_callbacks_record_into_pooled_buffers() {
    let (device, mut module) = create_module();

    let recorded: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
    let recorded_in_pass = Rc::clone(&recorded);

    let mut builder = FrameGraphBuilder::new();
    builder.create_render_pass(
        "main",
        PassKind::Graphics,
        |ctx| {
            ctx.writes(ResourceId::BACKBUFFER);
            Ok(())
        },
        move |ctx| {
            let gfx = ctx.as_graphics_mut().expect("graphics pass");
            gfx.draw(3, 1);
            *recorded_in_pass.borrow_mut() += 1;
        },
    );
    module.run(builder).unwrap();

    assert_eq!(*recorded.borrow(), 1);
    assert_eq!(device.take_submissions().len(), 1);
}

#[test]
fn frames_wait_for_the_previous_fence() {
    let (device, mut module) = create_module();

    for frame in 0..3 {
        let mut builder = FrameGraphBuilder::new();
        noop_graphics_pass(&mut builder, "main", vec![], vec![0]);
        module.run(builder).unwrap();
        assert_eq!(module.frame_index(), frame + 1);
    }

    // Fence values grow monotonically across frames.
    let signals: Vec<u64> = device
        .take_submissions()
        .iter()
        .filter_map(|submission| submission.signal)
        .collect();
    assert_eq!(signals.len(), 3);
    assert!(signals.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn empty_graph_still_turns_the_frame_over() {
    let (device, mut module) = create_module();

    module.run(FrameGraphBuilder::new()).unwrap();
    module.run(FrameGraphBuilder::new()).unwrap();

    // Each frame ends with a (possibly empty) graphics submission that
    // signals the frame fence, keeping the one-frame-ahead cap intact.
    let submissions = device.take_submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions.iter().all(|s| s.lists.is_empty()));
    assert!(submissions.iter().all(|s| s.signal.is_some()));
}
