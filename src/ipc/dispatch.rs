use anyhow::Result;
use std::collections::HashMap;

use crate::engine::WidgetEngine;
use crate::input::{FrameError, ScanFrame};
use crate::report::ReportSink;

/// Route one frame to its widget engine and emit the resulting report.
pub fn dispatch_frame(
    engines: &mut HashMap<String, WidgetEngine>,
    frame: &ScanFrame,
    sink: &mut ReportSink,
) -> Result<()> {
    let engine = engines
        .get_mut(&frame.widget)
        .ok_or_else(|| FrameError::UnknownWidget(frame.widget.clone()))?;

    let expected = engine.expected_len();
    if frame.diff.len() != expected {
        return Err(FrameError::SizeMismatch {
            widget: frame.widget.clone(),
            expected,
            got: frame.diff.len(),
        }
        .into());
    }

    match engine {
        WidgetEngine::Slider(s) => {
            let positions = s.process(&frame.diff);
            sink.emit_slider(&frame.widget, &positions)?;
        }
        WidgetEngine::Pad(p) => {
            let slots = p.process(&frame.diff);
            sink.emit_pad(&frame.widget, slots)?;
        }
    }
    Ok(())
}
