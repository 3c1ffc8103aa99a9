//! Scan pipeline: frame source in, engines in the middle, reports out.

use anyhow::Result;
use log::{error, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::{thread, time::Duration};

use super::server::DaemonEvent;
use crate::config::{self, Profile};
use crate::engine::WidgetEngine;
use crate::input;
use crate::report::ReportSink;

/// Profile shared with the server thread; the revision bumps on every
/// reload or switch so the pipeline knows when to rebuild its engines.
pub struct SharedProfile {
    pub revision: u64,
    pub profile: Profile,
}

pub fn run_pipeline(
    shared: Arc<Mutex<SharedProfile>>,
    tx_evt: std::sync::mpsc::Sender<DaemonEvent>,
) -> Result<()> {
    let (mut revision, mut profile) = {
        let s = shared.lock().unwrap();
        (s.revision, s.profile.clone())
    };
    let mut engines = build_or_idle(&profile);
    let mut sink = open_sink(&profile);

    loop {
        // pick up profile switches without restarting the daemon
        {
            let s = shared.lock().unwrap();
            if s.revision != revision {
                revision = s.revision;
                profile = s.profile.clone();
                engines = build_or_idle(&profile);
                sink = open_sink(&profile);
                info!("pipeline: engines rebuilt (profile revision {revision})");
            }
        }

        let Some(path) = profile.meta.source.clone() else {
            // no frame source configured; stay alive for IPC and reloads
            thread::sleep(Duration::from_millis(200));
            continue;
        };

        let mut reader = match input::open(Path::new(&path)) {
            Ok(r) => {
                let _ = tx_evt.send(DaemonEvent::Log(format!("streaming frames from {path}")));
                r
            }
            Err(e) => {
                warn!("pipeline: {e}; retrying");
                thread::sleep(Duration::from_millis(500));
                continue;
            }
        };

        loop {
            match reader.next_frame() {
                Ok(Some(frame)) => {
                    if let Err(e) = super::dispatch::dispatch_frame(&mut engines, &frame, &mut sink)
                    {
                        error!("frame dispatch failed: {e}");
                    }
                }
                // end of stream: reopen, frame writers come and go
                Ok(None) => break,
                Err(e) => {
                    error!("frame source error: {e}");
                    break;
                }
            }

            // profile changes must not wait for the stream to drain
            if shared.lock().unwrap().revision != revision {
                break;
            }
        }

        thread::sleep(Duration::from_millis(100));
    }
}

fn build_or_idle(profile: &Profile) -> HashMap<String, WidgetEngine> {
    match config::build_engines(profile) {
        Ok(engines) => engines,
        Err(e) => {
            error!("engine build failed: {e}; pipeline idle");
            HashMap::new()
        }
    }
}

fn open_sink(profile: &Profile) -> ReportSink {
    match profile.meta.report.as_deref() {
        Some(path) => ReportSink::append(Path::new(path)).unwrap_or_else(|e| {
            warn!("report sink unavailable ({e}); running NO-OP");
            ReportSink::noop()
        }),
        None => ReportSink::stdout(),
    }
}
