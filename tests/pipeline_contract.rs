//! End-to-end pipeline contracts over a synthetic frame source, a collecting
//! sink, and the software backend.

use glyphcast::atlas::GlyphAtlas;
use glyphcast::decode::FrameSource;
use glyphcast::encode::VideoSink;
use glyphcast::frame::FrameGeometry;
use glyphcast::kernel::{render_cells, CpuBackend, RenderBackend};
use glyphcast::pipeline::{run_pipeline, CacheOptions};

use anyhow::Result;
use std::collections::VecDeque;

struct VecSource {
    frames: VecDeque<Vec<u8>>,
}

impl VecSource {
    fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }
}

#[derive(Default)]
struct VecSink {
    frames: Vec<Vec<u8>>,
    finished: bool,
}

impl VideoSink for VecSink {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<()> {
        assert!(!self.finished, "write after finish");
        self.frames.push(rgba);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

fn geometry_64x48() -> FrameGeometry {
    FrameGeometry::new(64, 48, 8, 12).unwrap()
}

fn atlas_for(geometry: &FrameGeometry) -> GlyphAtlas {
    GlyphAtlas::build("@#%", geometry.char_width, geometry.char_height, None).unwrap()
}

fn solid_frame(geometry: &FrameGeometry, rgb: [u8; 3]) -> Vec<u8> {
    let mut frame = vec![0u8; geometry.frame_bytes()];
    for px in frame.chunks_exact_mut(4) {
        px[..3].copy_from_slice(&rgb);
        px[3] = 255;
    }
    frame
}

/// Solid frames whose luminance steps by 20 per index, far over the default
/// cache threshold of 2.0.
fn distinct_frames(geometry: &FrameGeometry, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let level = (10 + i * 20).min(255) as u8;
            solid_frame(geometry, [level, level, level])
        })
        .collect()
}

#[test]
fn two_identical_gray_frames_render_once_and_reuse_once() {
    let geometry = geometry_64x48();
    let gray = solid_frame(&geometry, [128, 128, 128]);
    let mut source = VecSource::new(vec![gray.clone(), gray]);
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    let stats = run_pipeline(
        &mut source,
        &mut sink,
        &mut backend,
        &geometry,
        1,
        Some(CacheOptions {
            depth: 3,
            threshold: 2.0,
        }),
    )
    .unwrap();

    assert_eq!(stats.frames, 2);
    assert_eq!(stats.rendered, 1);
    assert_eq!(stats.reused, 1);
    assert_eq!(stats.dispatches, 1, "exactly one kernel dispatch");
    assert_eq!(sink.frames.len(), 2);
    assert_eq!(sink.frames[0], sink.frames[1], "byte-for-byte reuse");
    assert_eq!(sink.frames[0].len(), geometry.out_bytes());
}

#[test]
fn first_frame_is_never_a_cache_hit() {
    let geometry = geometry_64x48();
    let mut source = VecSource::new(vec![solid_frame(&geometry, [128, 128, 128])]);
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    let stats = run_pipeline(
        &mut source,
        &mut sink,
        &mut backend,
        &geometry,
        1,
        Some(CacheOptions::default()),
    )
    .unwrap();

    assert_eq!(stats.rendered, 1);
    assert_eq!(stats.reused, 0);
}

#[test]
fn short_final_batch_dispatches_three_times() {
    // 2B+1 frames with B=4: two full batches plus a final batch of one.
    let geometry = geometry_64x48();
    let batch = 4usize;
    let frames = distinct_frames(&geometry, 2 * batch + 1);
    let expected_last = frames.last().unwrap().clone();

    let mut source = VecSource::new(frames);
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    let stats = run_pipeline(
        &mut source,
        &mut sink,
        &mut backend,
        &geometry,
        batch,
        None,
    )
    .unwrap();

    assert_eq!(stats.frames, (2 * batch + 1) as u64);
    assert_eq!(stats.rendered, (2 * batch + 1) as u64);
    assert_eq!(stats.dispatches, 3);
    assert_eq!(sink.frames.len(), 2 * batch + 1);

    // The lone frame in the final short batch still renders correctly.
    let atlas = atlas_for(&geometry);
    let mut grid = glyphcast::frame::CellGrid::new(&geometry);
    grid.downsample(&expected_last, &geometry).unwrap();
    let reference = render_cells(&grid.cells, &atlas, &geometry);
    assert_eq!(*sink.frames.last().unwrap(), reference);
}

#[test]
fn batched_run_matches_single_frame_run() {
    let geometry = geometry_64x48();
    let frames = distinct_frames(&geometry, 3);

    let mut run = |batch_size: usize| -> Vec<Vec<u8>> {
        let mut source = VecSource::new(frames.clone());
        let mut sink = VecSink::default();
        let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);
        run_pipeline(
            &mut source,
            &mut sink,
            &mut backend,
            &geometry,
            batch_size,
            None,
        )
        .unwrap();
        sink.frames
    };

    assert_eq!(run(4), run(1));
}

#[test]
fn cache_hit_mid_batch_preserves_source_order() {
    // miss, miss, hit (same as frame 1), miss with B=4: the hit must flush
    // the half-full batch so the reused frame lands in position 2.
    let geometry = geometry_64x48();
    let a = solid_frame(&geometry, [10, 10, 10]);
    let b = solid_frame(&geometry, [100, 100, 100]);
    let frames = vec![a.clone(), b.clone(), b.clone(), a.clone()];

    let mut source = VecSource::new(frames);
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    let stats = run_pipeline(
        &mut source,
        &mut sink,
        &mut backend,
        &geometry,
        4,
        Some(CacheOptions {
            depth: 3,
            threshold: 2.0,
        }),
    )
    .unwrap();

    assert_eq!(sink.frames.len(), 4);
    assert_eq!(stats.reused, 2, "frame 3 reuses b, frame 4 reuses a");

    let atlas = atlas_for(&geometry);
    let mut grid = glyphcast::frame::CellGrid::new(&geometry);
    grid.downsample(&a, &geometry).unwrap();
    let rendered_a = render_cells(&grid.cells, &atlas, &geometry);
    grid.downsample(&b, &geometry).unwrap();
    let rendered_b = render_cells(&grid.cells, &atlas, &geometry);

    assert_eq!(sink.frames[0], rendered_a);
    assert_eq!(sink.frames[1], rendered_b);
    assert_eq!(sink.frames[2], rendered_b);
    // Depth-3 ring still holds frame 1's grid, so the final frame reuses
    // the stale last-rendered output (the documented heuristic: it matches
    // *any* ring entry, and reuse always serves the last rendered frame).
    assert_eq!(sink.frames[3], rendered_b);
}

#[test]
fn reuse_after_batch_drain_serves_the_batch_final_frame() {
    // a, b fill a batch of two; the following hit on b must be served with
    // the last frame of the drained batch, not the first.
    let geometry = geometry_64x48();
    let a = solid_frame(&geometry, [10, 10, 10]);
    let b = solid_frame(&geometry, [100, 100, 100]);
    let frames = vec![a.clone(), b.clone(), b.clone()];

    let mut source = VecSource::new(frames);
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    let stats = run_pipeline(
        &mut source,
        &mut sink,
        &mut backend,
        &geometry,
        2,
        Some(CacheOptions {
            depth: 3,
            threshold: 2.0,
        }),
    )
    .unwrap();

    assert_eq!(stats.rendered, 2);
    assert_eq!(stats.reused, 1);
    assert_eq!(stats.dispatches, 1);

    let atlas = atlas_for(&geometry);
    let mut grid = glyphcast::frame::CellGrid::new(&geometry);
    grid.downsample(&b, &geometry).unwrap();
    let rendered_b = render_cells(&grid.cells, &atlas, &geometry);
    assert_eq!(sink.frames[1], rendered_b);
    assert_eq!(sink.frames[2], rendered_b);
}

#[test]
fn partial_cells_are_dropped_from_output() {
    // 70x50 with 8x12 cells: output must be 64x48.
    let geometry = FrameGeometry::new(70, 50, 8, 12).unwrap();
    let mut source = VecSource::new(vec![solid_frame(&geometry, [200, 50, 25])]);
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    run_pipeline(&mut source, &mut sink, &mut backend, &geometry, 1, None).unwrap();

    assert_eq!(sink.frames.len(), 1);
    assert_eq!(sink.frames[0].len(), 64 * 48 * 4);
}

#[test]
fn disabled_cache_renders_every_frame() {
    let geometry = geometry_64x48();
    let gray = solid_frame(&geometry, [128, 128, 128]);
    let mut source = VecSource::new(vec![gray.clone(), gray.clone(), gray]);
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    let stats =
        run_pipeline(&mut source, &mut sink, &mut backend, &geometry, 1, None).unwrap();

    assert_eq!(stats.rendered, 3);
    assert_eq!(stats.reused, 0);
    assert_eq!(stats.dispatches, 3);
}

#[test]
fn empty_stream_produces_no_output() {
    let geometry = geometry_64x48();
    let mut source = VecSource::new(Vec::new());
    let mut sink = VecSink::default();
    let mut backend = CpuBackend::new(atlas_for(&geometry), geometry);

    let stats = run_pipeline(
        &mut source,
        &mut sink,
        &mut backend,
        &geometry,
        4,
        Some(CacheOptions::default()),
    )
    .unwrap();

    assert_eq!(stats.frames, 0);
    assert_eq!(stats.dispatches, 0);
    assert!(sink.frames.is_empty());
}
