//! Frame geometry and the host-side downsampler.
//!
//! Frames travel through the pipeline as interleaved RGBA8 (the raw format of
//! the ffmpeg pipes and a one-word-per-pixel layout on the device). All
//! brightness and compositing math uses R, G, B only; alpha is fixed at 255.

use anyhow::{bail, Result};

/// Derived dimensions for one open video. Resolution is fixed for the whole
/// run, so this is computed once and shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub char_width: u32,
    pub char_height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, char_width: u32, char_height: u32) -> Result<Self> {
        if char_width == 0 || char_height == 0 {
            bail!("cell size must be non-zero, got {char_width}x{char_height}");
        }
        if width < char_width || height < char_height {
            bail!(
                "frame {width}x{height} is smaller than one {char_width}x{char_height} cell"
            );
        }
        Ok(Self {
            width,
            height,
            char_width,
            char_height,
        })
    }

    /// Trailing partial cells are dropped, not padded.
    pub fn cols(&self) -> u32 {
        self.width / self.char_width
    }

    pub fn rows(&self) -> u32 {
        self.height / self.char_height
    }

    pub fn out_width(&self) -> u32 {
        self.cols() * self.char_width
    }

    pub fn out_height(&self) -> u32 {
        self.rows() * self.char_height
    }

    pub fn cell_count(&self) -> usize {
        (self.cols() * self.rows()) as usize
    }

    /// Byte length of one source frame (RGBA).
    pub fn frame_bytes(&self) -> usize {
        (self.width * self.height * 4) as usize
    }

    /// Byte length of one rendered output frame (RGBA).
    pub fn out_bytes(&self) -> usize {
        (self.out_width() * self.out_height() * 4) as usize
    }
}

pub fn pack_rgba(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | (0xff << 24)
}

/// One cell per output glyph: a packed RGBA word plus the luminance plane the
/// temporal cache compares against.
#[derive(Debug, Clone)]
pub struct CellGrid {
    pub cells: Vec<u32>,
    pub luma: Vec<u8>,
}

impl CellGrid {
    pub fn new(geometry: &FrameGeometry) -> Self {
        let cells = geometry.cell_count();
        Self {
            cells: vec![0; cells],
            luma: vec![0; cells],
        }
    }

    /// Nearest-neighbor resample of a full-resolution RGBA frame into the
    /// cell grid. One representative source pixel per cell; averaging or
    /// bilinear filtering would break the brightness quantization contract.
    pub fn downsample(&mut self, frame: &[u8], geometry: &FrameGeometry) -> Result<()> {
        if frame.len() != geometry.frame_bytes() {
            bail!(
                "frame size mismatch: got {} bytes, expected {}",
                frame.len(),
                geometry.frame_bytes()
            );
        }

        let cols = geometry.cols();
        let rows = geometry.rows();
        for cy in 0..rows {
            let sy = cy * geometry.height / rows;
            for cx in 0..cols {
                let sx = cx * geometry.width / cols;
                let src = ((sy * geometry.width + sx) * 4) as usize;
                let (r, g, b) = (frame[src], frame[src + 1], frame[src + 2]);
                let cell = (cy * cols + cx) as usize;
                self.cells[cell] = pack_rgba(r, g, b);
                self.luma[cell] = ((r as u32 + g as u32 + b as u32) / 3) as u8;
            }
        }
        Ok(())
    }
}
