//! Render kernel math and the backend seam.
//!
//! The per-pixel rules live in three pure helpers mirrored exactly by the
//! WGSL shader: brightness is the integer mean of R, G, B; the character
//! index is a linear quantization onto the ramp; the glyph mask scales each
//! color channel. `CpuBackend` is a byte-exact software rendition of the
//! device kernel, used by tests, benches and `--software` runs.

use anyhow::{bail, Result};

use crate::atlas::GlyphAtlas;
use crate::frame::FrameGeometry;

pub fn brightness(r: u8, g: u8, b: u8) -> u32 {
    (r as u32 + g as u32 + b as u32) / 3
}

/// `floor(brightness * (N-1) / 255)`; monotonic, 0 -> 0, 255 -> N-1.
pub fn char_index(brightness: u32, ramp_len: u32) -> u32 {
    brightness * (ramp_len - 1) / 255
}

/// The mask acts as a per-pixel intensity multiplier, keeping the cell's hue.
pub fn shade(mask: u8, channel: u8) -> u8 {
    ((mask as u32 * channel as u32) / 255) as u8
}

/// Render one cell grid to an RGBA frame. Reference semantics for the WGSL
/// kernel; the two must stay byte-identical.
pub fn render_cells(cells: &[u32], atlas: &GlyphAtlas, geometry: &FrameGeometry) -> Vec<u8> {
    let cols = geometry.cols();
    let out_w = geometry.out_width();
    let out_h = geometry.out_height();
    let cw = geometry.char_width;
    let ch = geometry.char_height;
    let ramp_len = atlas.ramp_len();

    let mut out = vec![0u8; geometry.out_bytes()];
    for y in 0..out_h {
        for x in 0..out_w {
            let cell = cells[((y / ch) * cols + x / cw) as usize];
            let (r, g, b) = (cell as u8, (cell >> 8) as u8, (cell >> 16) as u8);
            let idx = char_index(brightness(r, g, b), ramp_len);
            let mask = atlas.mask(idx, x % cw, y % ch);

            let px = ((y * out_w + x) * 4) as usize;
            out[px] = shade(mask, r);
            out[px + 1] = shade(mask, g);
            out[px + 2] = shade(mask, b);
            out[px + 3] = 255;
        }
    }
    out
}

/// Opaque handle for an issued batch; redeem with `collect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission(pub(crate) usize);

/// Seam between the execution pipeline and the device. `dispatch` must not
/// block on device completion; `collect` blocks until the submission's
/// readback is available and returns one rendered frame per batch element.
pub trait RenderBackend {
    fn dispatch(&mut self, cells: &[u32], batch: usize) -> Result<Submission>;
    fn collect(&mut self, submission: Submission) -> Result<Vec<Vec<u8>>>;
    fn dispatch_count(&self) -> u64;
}

pub struct CpuBackend {
    atlas: GlyphAtlas,
    geometry: FrameGeometry,
    pending: Vec<Option<Vec<Vec<u8>>>>,
    dispatches: u64,
}

impl CpuBackend {
    pub fn new(atlas: GlyphAtlas, geometry: FrameGeometry) -> Self {
        Self {
            atlas,
            geometry,
            pending: Vec::new(),
            dispatches: 0,
        }
    }
}

impl RenderBackend for CpuBackend {
    fn dispatch(&mut self, cells: &[u32], batch: usize) -> Result<Submission> {
        let cell_count = self.geometry.cell_count();
        if batch == 0 || cells.len() < batch * cell_count {
            bail!(
                "bad batch: {} cells for batch of {batch} ({cell_count} cells/frame)",
                cells.len()
            );
        }

        let frames = cells[..batch * cell_count]
            .chunks_exact(cell_count)
            .map(|grid| render_cells(grid, &self.atlas, &self.geometry))
            .collect();
        self.dispatches += 1;

        let slot = self
            .pending
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| {
                self.pending.push(None);
                self.pending.len() - 1
            });
        self.pending[slot] = Some(frames);
        Ok(Submission(slot))
    }

    fn collect(&mut self, submission: Submission) -> Result<Vec<Vec<u8>>> {
        match self.pending.get_mut(submission.0).and_then(Option::take) {
            Some(frames) => Ok(frames),
            None => bail!("collect of unknown submission {}", submission.0),
        }
    }

    fn dispatch_count(&self) -> u64 {
        self.dispatches
    }
}
