//! Difference-signal frame intake (JSON lines).
//!
//! The scanning subsystem is external; it hands the core one precomputed
//! difference value per sensor node. A frame source is any readable stream
//! of JSON lines, one scan cycle per line.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// One scan cycle of per-sensor difference values for one widget. For
/// touchpads the array is flat in the widget's column-major layout.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanFrame {
    pub widget: String,
    pub diff: Vec<u16>,
}

/// Frame-level contract violations surfaced to the pipeline.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame for unknown widget '{0}'")]
    UnknownWidget(String),
    #[error("widget '{widget}': expected {expected} sensor values, got {got}")]
    SizeMismatch {
        widget: String,
        expected: usize,
        got: usize,
    },
}

pub struct FrameReader<R> {
    inner: R,
    line: String,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Next frame, `None` at end of stream. Blank lines are skipped.
    pub fn next_frame(&mut self) -> Result<Option<ScanFrame>> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let frame: ScanFrame = serde_json::from_str(trimmed)
                .with_context(|| format!("bad frame line: {trimmed}"))?;
            return Ok(Some(frame));
        }
    }
}

pub fn open(path: &Path) -> Result<FrameReader<BufReader<File>>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open frame source {}", path.display()))?;
    Ok(FrameReader::new(BufReader::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_frames_and_skips_blank_lines() {
        let text = "\n{\"widget\": \"slider0\", \"diff\": [0, 10, 80, 20]}\n\n\
                    {\"widget\": \"pad0\", \"diff\": [1, 2]}\n";
        let mut reader = FrameReader::new(Cursor::new(text));
        let first = reader.next_frame().unwrap().unwrap();
        assert_eq!(first.widget, "slider0");
        assert_eq!(first.diff, [0, 10, 80, 20]);
        let second = reader.next_frame().unwrap().unwrap();
        assert_eq!(second.widget, "pad0");
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn malformed_lines_surface_as_errors() {
        let mut reader = FrameReader::new(Cursor::new("{\"widget\": 3}\n"));
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn frame_errors_name_the_widget() {
        let err = FrameError::SizeMismatch {
            widget: "pad0".into(),
            expected: 64,
            got: 63,
        };
        assert_eq!(
            err.to_string(),
            "widget 'pad0': expected 64 sensor values, got 63"
        );
    }
}
