//! Post-process merge: recombine the silent render with the original input's
//! audio track.
//!
//! The mux lands in a temp sibling first and atomically replaces the silent
//! file only on success, trimmed to the shorter stream. Any failure leaves
//! the silent video on disk and usable; callers downgrade the error to a
//! warning.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use crate::encode::{last_n_chars, temp_sibling};
use crate::error::{CodedError, MERGE_FAILED};

pub fn merge_audio(rendered: &Path, original: &Path) -> Result<()> {
    let temp = temp_sibling(rendered);

    let output = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(rendered)
        .arg("-i")
        .arg(original)
        .arg("-c")
        .arg("copy")
        .arg("-map")
        .arg("0:v:0")
        .arg("-map")
        .arg("1:a:0")
        .arg("-shortest")
        .arg(&temp)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|error| {
            anyhow::Error::new(CodedError::new(
                MERGE_FAILED,
                format!("failed to run ffmpeg muxer: {error}"),
            ))
        })?;

    if !output.status.success() {
        let _ = fs::remove_file(&temp);
        let stderr = last_n_chars(&String::from_utf8_lossy(&output.stderr), 500);
        return Err(anyhow::Error::new(CodedError::new(
            MERGE_FAILED,
            format!("ffmpeg muxer failed with {}: {stderr}", output.status),
        )));
    }

    fs::rename(&temp, rendered).with_context(|| {
        format!(
            "failed to replace '{}' with muxed '{}'",
            rendered.display(),
            temp.display()
        )
    })
}
