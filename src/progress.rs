//! Progress output for `erag sync`.
//!
//! Events go to **stderr** so stdout stays parseable. Human output is one
//! line per event; JSON output is one object per line, tagged by `phase`:
//!
//! ```text
//! {"phase":"scanning","bucket":"adk-cbse-education"}
//! {"phase":"importing","bucket":"adk-cbse-education","done":3,"total":12,"uri":"gs://..."}
//! ```

use std::io::Write;

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncProgressEvent {
    /// Listing the bucket and diffing it against the catalog.
    Scanning { bucket: String },
    /// `done` of `total` un-indexed objects handled; `uri` was the last one.
    Importing {
        bucket: String,
        done: u64,
        total: u64,
        uri: String,
    },
}

impl SyncProgressEvent {
    fn human_line(&self) -> String {
        match self {
            SyncProgressEvent::Scanning { bucket } => format!("sync {bucket}  scanning"),
            SyncProgressEvent::Importing {
                bucket,
                done,
                total,
                uri,
            } => {
                let percent = if *total == 0 { 100 } else { done * 100 / total };
                format!("sync {bucket}  [{done}/{total} {percent:>3}%]  {uri}")
            }
        }
    }
}

pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

pub struct HumanProgress;

impl SyncProgressReporter for HumanProgress {
    fn report(&self, event: SyncProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", event.human_line());
    }
}

pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => {
                let mut stderr = std::io::stderr().lock();
                let _ = writeln!(stderr, "{line}");
            }
            Err(e) => tracing::debug!(error = %e, "could not encode progress event"),
        }
    }
}

pub struct Silent;

impl SyncProgressReporter for Silent {
    fn report(&self, _: SyncProgressEvent) {}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress on an interactive stderr, nothing otherwise.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(Silent),
            ProgressMode::Human => Box::new(HumanProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
