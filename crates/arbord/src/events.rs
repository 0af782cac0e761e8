use arbor_core::config::StorageConfig;
use arbor_core::events::{event_name, ArborEvent};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::cache::lock;

/// Receives every event the service publishes. Publishing never fails the caller.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ArborEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, event: ArborEvent) {
        debug!(event = event_name(&event.kind), "event dropped");
    }
}

/// Keeps published events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ArborEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ArborEvent> {
        lock(&self.events).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events)
            .iter()
            .map(|event| event_name(&event.kind))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: ArborEvent) {
        lock(&self.events).push(event);
    }
}

/// Publishes every event to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: ArborEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Appends one JSON document per event to a file.
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        fs::create_dir_all(parent).map_err(|source| EventLogError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })
    }

    pub fn append(&self, event: &ArborEvent) -> Result<(), EventLogError> {
        let mut line =
            serde_json::to_string(event).map_err(|source| EventLogError::Serialize { source })?;
        line.push('\n');
        let _guard = lock(&self.write_lock);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| EventLogError::Append {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| EventLogError::Append {
                path: self.path.clone(),
                source,
            })
    }
}

impl EventSink for JsonlEventLog {
    fn publish(&self, event: ArborEvent) {
        if let Err(err) = self.append(&event) {
            warn!(error = %err, event = event_name(&event.kind), "failed to record event");
        }
    }
}

/// Combines `extra` with the JSONL log named by `[storage] event_log`, when one is set.
pub fn configured_sink(
    storage: &StorageConfig,
    mut extra: Vec<Arc<dyn EventSink>>,
) -> Result<Arc<dyn EventSink>, EventLogError> {
    if let Some(path) = &storage.event_log {
        let log = JsonlEventLog::new(path);
        log.ensure_layout()?;
        extra.push(Arc::new(log));
    }
    Ok(match extra.len() {
        0 => Arc::new(NoopSink),
        1 => extra.remove(0),
        _ => Arc::new(FanoutSink::new(extra)),
    })
}
