//! glyphcast: GPU-accelerated video to colorized glyph-art transcoder.
//!
//! A video stream is downsampled to a coarse cell grid on the host, each
//! cell's brightness picks a glyph from a prerendered atlas, and a wgpu
//! compute kernel composites colorized glyphs into full frames — batched,
//! double-buffered, and with a temporal cache that skips near-duplicate
//! frames entirely. ffmpeg handles decode/encode over raw pipes and the
//! final audio re-mux.

pub mod atlas;
pub mod cache;
pub mod decode;
pub mod encode;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod kernel;
pub mod merge;
pub mod pipeline;
