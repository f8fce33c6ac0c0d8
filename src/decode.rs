//! Frame source: ffprobe stream probing and an ffmpeg rawvideo decode pipe.
//!
//! The decoder is a black box that yields native-resolution RGBA frames over
//! a bounded queue from a dedicated reader thread, so source I/O never runs
//! on the compute-submission thread.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use crate::error::{CodedError, SOURCE_UNAVAILABLE};

const DECODE_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Black-box frame iterator; `None` is end-of-stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Probe the first video stream for geometry and frame rate. Failure here is
/// fatal to the run before any output is attempted.
pub fn probe(input: &Path) -> Result<StreamInfo> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,avg_frame_rate")
        .arg("-of")
        .arg("csv=p=0")
        .arg(input)
        .output()
        .map_err(|error| {
            anyhow::Error::new(CodedError::new(
                SOURCE_UNAVAILABLE,
                format!("failed to run ffprobe: {error}"),
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::Error::new(CodedError::new(
            SOURCE_UNAVAILABLE,
            format!(
                "cannot open video '{}': {}",
                input.display(),
                stderr.trim()
            ),
        )));
    }

    parse_probe_line(String::from_utf8_lossy(&output.stdout).trim()).map_err(|error| {
        anyhow::Error::new(CodedError::new(
            SOURCE_UNAVAILABLE,
            format!("cannot read stream info for '{}': {error}", input.display()),
        ))
    })
}

/// Parse one ffprobe csv line, e.g. `1920,1080,30000/1001`.
fn parse_probe_line(line: &str) -> Result<StreamInfo> {
    let mut fields = line.split(',');
    let width: u32 = fields
        .next()
        .ok_or_else(|| anyhow!("missing width"))?
        .trim()
        .parse()
        .context("bad width")?;
    let height: u32 = fields
        .next()
        .ok_or_else(|| anyhow!("missing height"))?
        .trim()
        .parse()
        .context("bad height")?;
    let fps = parse_rate(fields.next().ok_or_else(|| anyhow!("missing frame rate"))?)?;
    Ok(StreamInfo { width, height, fps })
}

/// ffprobe reports rates as a rational (`30000/1001`) or a plain number.
fn parse_rate(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().context("bad frame rate numerator")?;
            let den: f64 = den.parse().context("bad frame rate denominator")?;
            if den == 0.0 {
                anyhow::bail!("zero frame rate denominator in '{raw}'");
            }
            num / den
        }
        None => raw.parse().context("bad frame rate")?,
    };
    if !(rate.is_finite() && rate > 0.0) {
        anyhow::bail!("unusable frame rate '{raw}'");
    }
    Ok(rate)
}

pub struct FfmpegSource {
    receiver: mpsc::Receiver<Vec<u8>>,
    worker: Option<JoinHandle<Result<()>>>,
    child: Child,
}

impl FfmpegSource {
    pub fn spawn(input: &Path, info: &StreamInfo) -> Result<Self> {
        let size = format!("{}x{}", info.width, info.height);
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(DECODE_QUEUE_DEPTH);

        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-s")
            .arg(size)
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| {
                anyhow::Error::new(CodedError::new(
                    SOURCE_UNAVAILABLE,
                    format!("failed to spawn ffmpeg decoder: {error}"),
                ))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg decoder stdout"))?;
        let frame_size = (info.width * info.height * 4) as usize;

        let worker = thread::Builder::new()
            .name("glyphcast-decoder".to_owned())
            .spawn(move || loop {
                let mut buffer = vec![0u8; frame_size];
                match stdout.read_exact(&mut buffer) {
                    Ok(()) => {
                        if sender.send(buffer).is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break Ok(()),
                    Err(e) => break Err(anyhow!("failed to read from ffmpeg decoder: {e}")),
                }
            })
            .context("failed to spawn decoder reader thread")?;

        Ok(Self {
            receiver,
            worker: Some(worker),
            child,
        })
    }

    pub fn finish(self) -> Result<()> {
        let Self {
            receiver,
            worker,
            mut child,
        } = self;
        let _ = child.kill();
        let _ = child.wait();
        // Unblock a reader stuck on a full queue before joining it.
        drop(receiver);

        match worker {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!("decoder reader thread panicked")),
            },
            None => Ok(()),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_rate() {
        let info = parse_probe_line("1920,1080,30").unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.fps, 30.0);
    }

    #[test]
    fn parses_rational_rate() {
        let info = parse_probe_line("1280,720,30000/1001").unwrap();
        assert!((info.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn rejects_zero_denominator() {
        assert!(parse_probe_line("640,480,0/0").is_err());
    }

    #[test]
    fn rejects_truncated_line() {
        assert!(parse_probe_line("640,480").is_err());
        assert!(parse_probe_line("").is_err());
    }

    #[test]
    fn probe_failure_is_source_unavailable() {
        let error = probe(Path::new("/no/such/clip.mp4")).unwrap_err();
        let coded = crate::error::find_coded_error(&error).expect("coded error");
        assert_eq!(coded.code, SOURCE_UNAVAILABLE);
    }
}
