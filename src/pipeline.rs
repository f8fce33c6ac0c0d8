//! Execution pipeline: batching, temporal-cache skip, and host/device
//! overlap.
//!
//! One run owns all mutable state (scratch grid, cache ring, last rendered
//! frame, batch accumulator); nothing is shared across runs or threads. The
//! pipeline keeps at most one submission in flight and always dispatches the
//! next batch before draining the previous one, so host-side decode and
//! downsampling of upcoming frames overlap device compute. Output frames
//! reach the sink strictly in source order.

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::cache::{CacheDecision, TemporalCache};
use crate::decode::FrameSource;
use crate::encode::VideoSink;
use crate::frame::{CellGrid, FrameGeometry};
use crate::kernel::{RenderBackend, Submission};

#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub depth: usize,
    pub threshold: f32,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            depth: crate::cache::DEFAULT_CACHE_DEPTH,
            threshold: crate::cache::DEFAULT_CACHE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub frames: u64,
    pub rendered: u64,
    pub reused: u64,
    pub dispatches: u64,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn avg_frame_time(&self) -> Duration {
        if self.frames == 0 {
            Duration::ZERO
        } else {
            self.elapsed / self.frames as u32
        }
    }
}

struct Emitter<'a> {
    sink: &'a mut dyn VideoSink,
    last_rendered: Option<Vec<u8>>,
    track_last: bool,
    rendered: u64,
}

impl Emitter<'_> {
    /// Wait for the in-flight submission (if any) and write its frames.
    /// Only the final frame of a drained batch can ever be reused later, so
    /// at most one frame is copied per drain, and none with the cache off.
    fn drain(
        &mut self,
        pending: &mut Option<Submission>,
        backend: &mut dyn RenderBackend,
    ) -> Result<()> {
        if let Some(submission) = pending.take() {
            let frames = backend.collect(submission)?;
            let count = frames.len();
            for (i, frame) in frames.into_iter().enumerate() {
                if self.track_last && i + 1 == count {
                    self.last_rendered = Some(frame.clone());
                }
                self.sink.write_frame(frame)?;
                self.rendered += 1;
            }
        }
        Ok(())
    }
}

/// Convert one whole stream. `batch_size` of 1 degenerates to the
/// double-buffered single-frame mode; `cache` of `None` disables the
/// temporal skip. These are the only two toggles; there is one code path.
pub fn run_pipeline(
    source: &mut dyn FrameSource,
    sink: &mut dyn VideoSink,
    backend: &mut dyn RenderBackend,
    geometry: &FrameGeometry,
    batch_size: usize,
    cache: Option<CacheOptions>,
) -> Result<RunStats> {
    let batch_size = batch_size.max(1);
    let started = Instant::now();

    let mut cache = cache.map(|c| TemporalCache::new(c.depth, c.threshold));
    let mut grid = CellGrid::new(geometry);
    let mut batch_cells: Vec<u32> = Vec::with_capacity(batch_size * geometry.cell_count());
    let mut batch_len = 0usize;
    let mut pending: Option<Submission> = None;
    let mut emitter = Emitter {
        sink,
        last_rendered: None,
        track_last: cache.is_some(),
        rendered: 0,
    };

    let mut frames = 0u64;
    let mut reused = 0u64;

    while let Some(frame) = source.next_frame() {
        frames += 1;
        grid.downsample(&frame, geometry)?;

        let hit = matches!(
            cache.as_mut().map(|c| c.check(&grid.luma)),
            Some(CacheDecision::Hit)
        );
        if hit {
            // Reuse needs the most recent truly rendered frame, which may
            // still be accumulating or in flight; flush to preserve order.
            flush(
                &mut batch_cells,
                &mut batch_len,
                &mut pending,
                backend,
                &mut emitter,
            )?;
            emitter.drain(&mut pending, backend)?;
            if let Some(last) = emitter.last_rendered.clone() {
                emitter.sink.write_frame(last)?;
                reused += 1;
                continue;
            }
            // Cold start: nothing rendered yet, fall through and render.
        }

        batch_cells.extend_from_slice(&grid.cells);
        batch_len += 1;
        if batch_len == batch_size {
            flush(
                &mut batch_cells,
                &mut batch_len,
                &mut pending,
                backend,
                &mut emitter,
            )?;
        }

        if frames % 100 == 0 {
            eprintln!("processed {frames} frames");
        }
    }

    // Short final batch renders with its true size.
    flush(
        &mut batch_cells,
        &mut batch_len,
        &mut pending,
        backend,
        &mut emitter,
    )?;
    emitter.drain(&mut pending, backend)?;

    Ok(RunStats {
        frames,
        rendered: emitter.rendered,
        reused,
        dispatches: backend.dispatch_count(),
        elapsed: started.elapsed(),
    })
}

/// Dispatch the accumulated batch, then drain the previous submission. The
/// new submission stays in flight while the caller gets back to host work.
fn flush(
    batch_cells: &mut Vec<u32>,
    batch_len: &mut usize,
    pending: &mut Option<Submission>,
    backend: &mut dyn RenderBackend,
    emitter: &mut Emitter<'_>,
) -> Result<()> {
    if *batch_len == 0 {
        return Ok(());
    }
    let submission = backend.dispatch(batch_cells, *batch_len)?;
    batch_cells.clear();
    *batch_len = 0;
    emitter.drain(pending, backend)?;
    *pending = Some(submission);
    Ok(())
}
