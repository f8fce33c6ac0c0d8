//! Temporal cache: skips device work for frames that are visually unchanged
//! relative to recent history.
//!
//! A hit means the mean absolute per-cell luminance difference to *any* of
//! the last `depth` inserted grids fell below the threshold. The whole ring
//! is scanned, not just the previous frame: on oscillating content a frame
//! can match a grid several steps back and produce a visibly repeated
//! output. Callers that can't tolerate that run with depth 1 or disable the
//! cache.

pub const DEFAULT_CACHE_DEPTH: usize = 3;
pub const DEFAULT_CACHE_THRESHOLD: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Hit,
    Miss,
}

#[derive(Debug)]
pub struct TemporalCache {
    depth: usize,
    threshold: f32,
    grids: Vec<Vec<u8>>,
    inserts: u64,
}

impl TemporalCache {
    pub fn new(depth: usize, threshold: f32) -> Self {
        Self {
            depth: depth.max(1),
            threshold,
            grids: Vec::new(),
            inserts: 0,
        }
    }

    /// Compare `luma` against the ring. On a miss the grid is inserted,
    /// overwriting the oldest slot, and the caller proceeds to render. State
    /// never persists beyond one run; the first check can never hit.
    pub fn check(&mut self, luma: &[u8]) -> CacheDecision {
        for cached in &self.grids {
            if cached.len() == luma.len() && mean_abs_diff(cached, luma) < self.threshold {
                return CacheDecision::Hit;
            }
        }

        let slot = (self.inserts % self.depth as u64) as usize;
        if slot < self.grids.len() {
            self.grids[slot].clear();
            self.grids[slot].extend_from_slice(luma);
        } else {
            self.grids.push(luma.to_vec());
        }
        self.inserts += 1;
        CacheDecision::Miss
    }
}

pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs() as u64)
        .sum();
    total as f32 / a.len() as f32
}
