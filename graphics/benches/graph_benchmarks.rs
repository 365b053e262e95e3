use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vermilion_graphics::backend::dummy::DummyDevice;
use vermilion_graphics::{
    FrameGraphBuilder, GraphicsModule, PassKind, ResourceFormat, ResourceId,
};

// ---------------------------------------------------------------------------
// Frame graph construction and culling
// ---------------------------------------------------------------------------

fn chain_builder(length: u32) -> FrameGraphBuilder {
    let mut builder = FrameGraphBuilder::new();
    for i in 0..length {
        let reads: Vec<u32> = if i == 0 { vec![] } else { vec![i] };
        let writes: Vec<u32> = if i == length - 1 {
            vec![i + 1, 0]
        } else {
            vec![i + 1]
        };
        builder.create_render_pass(
            format!("pass_{i}"),
            if i % 3 == 0 {
                PassKind::Compute
            } else {
                PassKind::Graphics
            },
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
    builder
}

fn bench_frame_chain_small(c: &mut Criterion) {
    let device = Arc::new(DummyDevice::new());
    let mut module =
        GraphicsModule::new_offscreen(device, 1920, 1080, ResourceFormat::Bgra8Unorm).unwrap();

    c.bench_function("frame_chain_8_passes", |b| {
        b.iter(|| {
            module.run(chain_builder(8)).unwrap();
            black_box(module.frame_index());
        });
    });
}

fn bench_frame_chain_large(c: &mut Criterion) {
    let device = Arc::new(DummyDevice::new());
    let mut module =
        GraphicsModule::new_offscreen(device, 1920, 1080, ResourceFormat::Bgra8Unorm).unwrap();

    c.bench_function("frame_chain_64_passes", |b| {
        b.iter(|| {
            module.run(chain_builder(64)).unwrap();
            black_box(module.frame_index());
        });
    });
}

fn bench_frame_wide_fanout(c: &mut Criterion) {
    let device = Arc::new(DummyDevice::new());
    let mut module =
        GraphicsModule::new_offscreen(device, 1920, 1080, ResourceFormat::Bgra8Unorm).unwrap();

    c.bench_function("frame_fanout_32_producers", |b| {
        b.iter(|| {
            let mut builder = FrameGraphBuilder::new();
            for i in 0..32u32 {
                builder.create_render_pass(
                    format!("producer_{i}"),
                    PassKind::Compute,
                    move |ctx| {
                        ctx.writes(ResourceId(i + 1));
                        Ok(())
                    },
                    |_| {},
                );
            }
            builder.create_render_pass(
                "gather",
                PassKind::Graphics,
                |ctx| {
                    for i in 0..32u32 {
                        ctx.reads(ResourceId(i + 1));
                    }
                    ctx.writes(ResourceId::BACKBUFFER);
                    Ok(())
                },
                |_| {},
            );
            module.run(builder).unwrap();
            black_box(module.frame_index());
        });
    });
}

fn bench_culling_heavy_graph(c: &mut Criterion) {
    let device = Arc::new(DummyDevice::new());
    let mut module =
        GraphicsModule::new_offscreen(device, 1920, 1080, ResourceFormat::Bgra8Unorm).unwrap();

    c.bench_function("frame_with_48_culled_passes", |b| {
        b.iter(|| {
            let mut builder = FrameGraphBuilder::new();
            builder.create_render_pass(
                "main",
                PassKind::Graphics,
                |ctx| {
                    ctx.writes(ResourceId::BACKBUFFER);
                    Ok(())
                },
                |_| {},
            );
            // Long dead chain: every pass feeds the next, nothing feeds the
            // backbuffer, so culling unwinds it sweep by sweep.
            for i in 0..48u32 {
                let read = 100 + i;
                builder.create_render_pass(
                    format!("dead_{i}"),
                    PassKind::Compute,
                    move |ctx| {
                        ctx.reads(ResourceId(read));
                        ctx.writes(ResourceId(read + 1));
                        Ok(())
                    },
                    |_| {},
                );
            }
            module.run(builder).unwrap();
            black_box(module.frame_index());
        });
    });
}

criterion_group!(
    benches,
    bench_frame_chain_small,
    bench_frame_chain_large,
    bench_frame_wide_fanout,
    bench_culling_heavy_graph
);
criterion_main!(benches);
