//! Glyph atlas builder.
//!
//! Rasterizes each symbol of the character ramp (darkest to brightest) into a
//! `char_width x char_height` grayscale mask and packs all masks into one
//! contiguous buffer. The buffer is built once per run, uploaded to the
//! device once, and never re-read from the host.
//!
//! Font resolution order: explicit path, then common monospace system fonts,
//! then the built-in bitmap glyphs. A missing font is recovered locally with
//! a warning; it never fails the run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use fontdue::{Font, FontSettings};

pub const DEFAULT_RAMP: &str = "@#%";

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationMono-Regular.ttf",
    "C:\\Windows\\Fonts\\cour.ttf",
];

/// Immutable once built; shared read-only across every frame and batch.
#[derive(Debug, Clone)]
pub struct GlyphAtlas {
    ramp: Vec<char>,
    char_width: u32,
    char_height: u32,
    data: Vec<u8>,
}

impl GlyphAtlas {
    pub fn build(
        ramp: &str,
        char_width: u32,
        char_height: u32,
        font_path: Option<&Path>,
    ) -> Result<Self> {
        let ramp: Vec<char> = ramp.chars().collect();
        if ramp.len() < 2 {
            bail!(
                "character ramp needs at least 2 symbols, got {:?}",
                ramp.iter().collect::<String>()
            );
        }
        if char_width == 0 || char_height == 0 {
            bail!("glyph cell must be non-zero, got {char_width}x{char_height}");
        }

        let font = resolve_font(font_path);
        if font.is_none() {
            eprintln!("warning: no usable font found, using built-in glyphs");
        }

        let mut data = Vec::with_capacity(ramp.len() * (char_width * char_height) as usize);
        for &ch in &ramp {
            let mask = match &font {
                Some(font) if font.lookup_glyph_index(ch) != 0 => {
                    rasterize_glyph(font, ch, char_width, char_height)
                }
                _ => builtin_mask(ch, char_width, char_height),
            };
            data.extend_from_slice(&mask);
        }

        Ok(Self {
            ramp,
            char_width,
            char_height,
            data,
        })
    }

    pub fn ramp_len(&self) -> u32 {
        self.ramp.len() as u32
    }

    pub fn char_width(&self) -> u32 {
        self.char_width
    }

    pub fn char_height(&self) -> u32 {
        self.char_height
    }

    /// Flattened masks, `ramp_len * char_width * char_height` bytes, indexed
    /// `[char][row][col]`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mask(&self, char_idx: u32, x: u32, y: u32) -> u8 {
        let i = (char_idx * self.char_height + y) * self.char_width + x;
        self.data[i as usize]
    }

    /// Device upload form: 4 mask bytes per word, zero-padded tail.
    pub fn packed_words(&self) -> Vec<u32> {
        self.data
            .chunks(4)
            .map(|chunk| {
                let mut word = 0u32;
                for (i, &byte) in chunk.iter().enumerate() {
                    word |= (byte as u32) << (i * 8);
                }
                word
            })
            .collect()
    }
}

fn resolve_font(explicit: Option<&Path>) -> Option<Font> {
    if let Some(path) = explicit {
        // A preferred font that cannot be loaded degrades like any other
        // missing font; it must never fail the run.
        match fs::read(path) {
            Ok(bytes) => match Font::from_bytes(bytes, FontSettings::default()) {
                Ok(font) => return Some(font),
                Err(error) => eprintln!(
                    "warning: failed to parse font '{}': {error}; trying system fonts",
                    path.display()
                ),
            },
            Err(error) => eprintln!(
                "warning: failed to read font '{}': {error}; trying system fonts",
                path.display()
            ),
        }
    }

    for candidate in SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from) {
        let Ok(bytes) = fs::read(&candidate) else {
            continue;
        };
        if let Ok(font) = Font::from_bytes(bytes, FontSettings::default()) {
            return Some(font);
        }
    }
    None
}

/// Draw one glyph at the top-left of a zero-filled canvas, clipped to the
/// cell. Pixel size follows the cell height, as the original pipeline did.
fn rasterize_glyph(font: &Font, ch: char, char_width: u32, char_height: u32) -> Vec<u8> {
    let px = char_height as f32;
    let (metrics, bitmap) = font.rasterize(ch, px);
    let mut mask = vec![0u8; (char_width * char_height) as usize];

    let ascent = font
        .horizontal_line_metrics(px)
        .map(|lm| lm.ascent.round() as i32)
        .unwrap_or(char_height as i32);
    let x0 = metrics.xmin.max(0);
    let y0 = (ascent - metrics.ymin - metrics.height as i32).max(0);

    for row in 0..metrics.height {
        let dy = y0 + row as i32;
        if dy < 0 || dy >= char_height as i32 {
            continue;
        }
        for col in 0..metrics.width {
            let dx = x0 + col as i32;
            if dx < 0 || dx >= char_width as i32 {
                continue;
            }
            mask[(dy as u32 * char_width + dx as u32) as usize] = bitmap[row * metrics.width + col];
        }
    }
    mask
}

// ---------------------------------------------------------------------------
// Built-in fallback glyphs
// ---------------------------------------------------------------------------

/// 8x12 bitmaps for the symbols common ramps use, bit 7 = leftmost pixel.
/// Coarse shapes are fine here; only relative ink density matters.
const BUILTIN_GLYPHS: &[(char, [u8; 12])] = &[
    (' ', [0x00; 12]),
    (
        '.',
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00],
    ),
    (
        ',',
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x30, 0x00, 0x00],
    ),
    (
        ':',
        [0x00, 0x18, 0x18, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00],
    ),
    (
        ';',
        [0x00, 0x18, 0x18, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x30, 0x00, 0x00],
    ),
    (
        '-',
        [0x00, 0x00, 0x00, 0x00, 0x7e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    ),
    (
        '=',
        [0x00, 0x00, 0x00, 0x7e, 0x00, 0x7e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    ),
    (
        '+',
        [0x00, 0x00, 0x18, 0x18, 0x7e, 0x7e, 0x18, 0x18, 0x00, 0x00, 0x00, 0x00],
    ),
    (
        '*',
        [0x00, 0x10, 0x54, 0x38, 0x7c, 0x38, 0x54, 0x10, 0x00, 0x00, 0x00, 0x00],
    ),
    (
        '#',
        [0x24, 0x24, 0x7e, 0x24, 0x24, 0x24, 0x7e, 0x24, 0x24, 0x00, 0x00, 0x00],
    ),
    (
        '%',
        [0x62, 0x94, 0x94, 0x68, 0x10, 0x16, 0x29, 0x29, 0x46, 0x00, 0x00, 0x00],
    ),
    (
        '@',
        [0x3c, 0x42, 0x99, 0xa5, 0xa5, 0xa5, 0x9e, 0x40, 0x3c, 0x00, 0x00, 0x00],
    ),
];

/// Nearest-scale a built-in 8x12 bitmap to the cell size. Symbols outside
/// the built-in set render as a solid block.
fn builtin_mask(ch: char, char_width: u32, char_height: u32) -> Vec<u8> {
    let Some((_, rows)) = BUILTIN_GLYPHS.iter().find(|(glyph, _)| *glyph == ch) else {
        return vec![255u8; (char_width * char_height) as usize];
    };

    let mut mask = vec![0u8; (char_width * char_height) as usize];
    for y in 0..char_height {
        let sy = (y * 12 / char_height).min(11);
        for x in 0..char_width {
            let sx = (x * 8 / char_width).min(7);
            if (rows[sy as usize] >> (7 - sx)) & 1 == 1 {
                mask[(y * char_width + x) as usize] = 255;
            }
        }
    }
    mask
}
