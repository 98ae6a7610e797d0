#![warn(missing_docs)]
//! Deterministic testing surfaces: event logs, metrics reports and scripted
//! collaborators for worldtests.

mod fixtures;
mod logs;
mod metrics;

use anyhow::Result;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tileworld_core::SimTick;
use tileworld_world::LifecycleReport;

pub use fixtures::*;
pub use logs::*;
pub use metrics::*;

/// Primary event record captured by headless tests.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Lifecycle tick when the event occurred.
    pub tick: SimTick,
    /// Human-readable kind label.
    pub kind: &'a str,
    /// Free-form payload.
    pub payload: &'a str,
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: File,
}

impl JsonlSink {
    /// Create a new sink at `path`, creating parent dirs if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self { file })
    }

    /// Append an event to the log.
    pub fn write(&mut self, event: &EventRecord<'_>) -> Result<()> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(())
    }

    /// Append a lifecycle pass summary as a `lifecycle_pass` event.
    pub fn write_pass(&mut self, report: &LifecycleReport) -> Result<()> {
        let payload = format!(
            "required={} generated={} restored={} loaded={} evicted={} resident={}",
            report.required,
            report.generated,
            report.restored,
            report.loaded,
            report.evicted,
            report.resident
        );
        self.write(&EventRecord {
            tick: SimTick(report.tick),
            kind: "lifecycle_pass",
            payload: &payload,
        })
    }
}
