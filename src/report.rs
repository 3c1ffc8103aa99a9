//! Touch report emission (JSON lines), the stand-in for a host transport.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::filter::ReportSlot;
use crate::tracker::MAX_TOUCHES;

pub struct ReportSink {
    out: Out,
}

enum Out {
    Stdout,
    File(File),
    Noop,
}

impl ReportSink {
    pub fn stdout() -> Self {
        Self { out: Out::Stdout }
    }

    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open report sink {}", path.display()))?;
        Ok(Self { out: Out::File(file) })
    }

    pub fn noop() -> Self {
        Self { out: Out::Noop }
    }

    pub fn emit_slider(&mut self, widget: &str, positions: &[u16]) -> Result<()> {
        self.write_line(serde_json::json!({
            "widget": widget,
            "positions": positions,
        }))
    }

    /// Occupied slots only; an absent slot is simply missing from the line.
    pub fn emit_pad(&mut self, widget: &str, slots: &[ReportSlot; MAX_TOUCHES]) -> Result<()> {
        let touches: Vec<serde_json::Value> = slots
            .iter()
            .filter(|s| s.occupied())
            .map(|s| serde_json::json!({"id": s.id, "x": s.x, "y": s.y, "z": s.z}))
            .collect();
        self.write_line(serde_json::json!({
            "widget": widget,
            "touches": touches,
        }))
    }

    fn write_line(&mut self, value: serde_json::Value) -> Result<()> {
        match &mut self.out {
            Out::Stdout => {
                let mut handle = io::stdout().lock();
                writeln!(handle, "{value}")?;
            }
            Out::File(f) => writeln!(f, "{value}")?,
            Out::Noop => {}
        }
        Ok(())
    }
}
