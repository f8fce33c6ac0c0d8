//! Output multiplexer: an ffmpeg rawvideo encode pipe behind a bounded queue.
//!
//! Rendered frames arrive in source order and are written strictly in that
//! order by one dedicated writer thread, so encoder disk I/O never stalls the
//! render pipeline. The queue bound applies backpressure; dropping the sender
//! is the end-of-stream sentinel.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};

use crate::error::{CodedError, SINK_UNAVAILABLE};

const ENCODE_QUEUE_DEPTH: usize = 4;

/// Ordered frame sink. Opened with fixed geometry; every frame must match it.
pub trait VideoSink {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

pub struct FfmpegSink {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl FfmpegSink {
    /// Open the sink. Spawn failure here is `SINK_UNAVAILABLE` and reported
    /// before any compute work; write failures surface later from
    /// `write_frame`/`finish`.
    pub fn spawn(output_path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        let path_str = output_path.to_string_lossy();
        if path_str.len() > 1024 {
            bail!("output path is suspiciously long");
        }
        if path_str.chars().any(|c| c.is_control()) {
            bail!("output path contains invalid control characters");
        }

        let args = ffmpeg_encode_args(width, height, fps, output_path);
        let mut child = Command::new("ffmpeg")
            .args(args.iter().map(String::as_str))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                let message = if error.kind() == ErrorKind::NotFound {
                    "ffmpeg executable not found; install ffmpeg".to_owned()
                } else {
                    format!("failed to spawn ffmpeg encoder: {error}")
                };
                anyhow::Error::new(CodedError::new(SINK_UNAVAILABLE, message))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg encoder stdin"))?;
        let mut stderr_pipe = child.stderr.take();
        let output_path = output_path.to_path_buf();
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(ENCODE_QUEUE_DEPTH);

        let worker = thread::Builder::new()
            .name("glyphcast-encoder".to_owned())
            .spawn(move || -> Result<()> {
                while let Ok(frame) = receiver.recv() {
                    stdin
                        .write_all(&frame)
                        .context("failed to write frame to ffmpeg stdin")?;
                }
                stdin.flush().context("failed to flush ffmpeg stdin")?;
                drop(stdin);

                let status = child.wait().context("failed waiting for ffmpeg encoder")?;
                let stderr_tail = read_stderr_tail(&mut stderr_pipe)?;
                if !status.success() {
                    return Err(anyhow!(
                        "ffmpeg encoder failed with status {status} writing '{}' (stderr_tail='{}')",
                        output_path.display(),
                        stderr_tail
                    ));
                }
                Ok(())
            })
            .context("failed to spawn encoder writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn join_worker(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("encoder writer thread panicked")),
        }
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        if sender.send(rgba).is_err() {
            // Writer went away; its own error explains why.
            self.sender = None;
            self.join_worker()?;
            return Err(anyhow!("encoder writer stopped accepting frames"));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        drop(self.sender.take());
        self.join_worker()
    }
}

fn ffmpeg_encode_args(width: u32, height: u32, fps: f64, output_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        format!("{width}x{height}"),
        "-r".to_owned(),
        format!("{fps}"),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
        // Odd glyph-grid dimensions are legal; pad up for 4:2:0.
        "-vf".to_owned(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_owned(),
        output_path.to_string_lossy().into_owned(),
    ]
}

pub(crate) fn read_stderr_tail(stderr: &mut Option<std::process::ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading ffmpeg stderr")?;
    Ok(last_n_chars(&String::from_utf8_lossy(&buf), 500))
}

pub(crate) fn last_n_chars(s: &str, max_chars: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(max_chars);
    chars[start..].iter().collect::<String>().trim().to_owned()
}

/// Stamp a sibling temp path that keeps the container extension so ffmpeg
/// can infer the output format.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp4");
    path.with_extension(format!("tmp.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_args_carry_geometry_and_rate() {
        let args = ffmpeg_encode_args(640, 480, 29.97, Path::new("out.mp4"));
        assert!(args.contains(&"640x480".to_owned()));
        assert!(args.contains(&"29.97".to_owned()));
        assert!(args.contains(&"rawvideo".to_owned()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn last_n_chars_keeps_tail() {
        assert_eq!(last_n_chars("abcdef", 3), "def");
        assert_eq!(last_n_chars("ab", 10), "ab");
        assert_eq!(last_n_chars("  spaced  ", 10), "spaced");
    }

    #[test]
    fn temp_sibling_keeps_container_extension() {
        assert_eq!(
            temp_sibling(Path::new("/tmp/out.mp4")),
            PathBuf::from("/tmp/out.tmp.mp4")
        );
        assert_eq!(
            temp_sibling(Path::new("clip.avi")),
            PathBuf::from("clip.tmp.avi")
        );
    }

    #[test]
    fn control_characters_in_path_are_rejected() {
        let result = FfmpegSink::spawn(Path::new("bad\npath.mp4"), 64, 48, 30.0);
        assert!(result.is_err());
    }
}
