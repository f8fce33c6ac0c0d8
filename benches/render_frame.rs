//! Frame render benchmarks: host downsample and software compositor.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use glyphcast::atlas::GlyphAtlas;
use glyphcast::frame::{CellGrid, FrameGeometry};
use glyphcast::kernel::{render_cells, CpuBackend, RenderBackend};

fn gradient_frame(geometry: &FrameGeometry) -> Vec<u8> {
    let width = geometry.width as usize;
    let mut frame = vec![0u8; geometry.frame_bytes()];
    for (i, px) in frame.chunks_exact_mut(4).enumerate() {
        let x = i % width;
        let y = i / width;
        px[0] = (x % 256) as u8;
        px[1] = (y % 256) as u8;
        px[2] = ((x + y) % 256) as u8;
        px[3] = 255;
    }
    frame
}

fn bench_downsample(c: &mut Criterion) {
    let geometry = FrameGeometry::new(1280, 720, 8, 12).expect("geometry");
    let frame = gradient_frame(&geometry);
    let mut grid = CellGrid::new(&geometry);

    let mut group = c.benchmark_group("render_frame");
    group.sample_size(50);

    group.bench_function("downsample_720p", |b| {
        b.iter(|| {
            grid.downsample(black_box(&frame), &geometry).expect("downsample");
            black_box(&grid.cells);
        });
    });

    group.finish();
}

fn bench_software_render(c: &mut Criterion) {
    let geometry = FrameGeometry::new(1280, 720, 8, 12).expect("geometry");
    let atlas = GlyphAtlas::build(" .:-=+*#%@", 8, 12, None).expect("atlas");
    let frame = gradient_frame(&geometry);
    let mut grid = CellGrid::new(&geometry);
    grid.downsample(&frame, &geometry).expect("downsample");

    let mut group = c.benchmark_group("render_frame");
    group.sample_size(30);

    group.bench_function("software_720p_frame", |b| {
        b.iter(|| black_box(render_cells(&grid.cells, &atlas, &geometry)));
    });

    group.bench_function("software_720p_batch4", |b| {
        let mut backend = CpuBackend::new(atlas.clone(), geometry);
        let mut batch = Vec::with_capacity(4 * geometry.cell_count());
        for _ in 0..4 {
            batch.extend_from_slice(&grid.cells);
        }
        b.iter(|| {
            let submission = backend.dispatch(black_box(&batch), 4).expect("dispatch");
            black_box(backend.collect(submission).expect("collect"))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_downsample, bench_software_render);
criterion_main!(benches);
