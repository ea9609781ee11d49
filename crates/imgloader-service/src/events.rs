//! Progress notifications for the presentation layer.
//!
//! Every loader owns a broadcast channel of [`LoaderEvent`]s that any number of
//! observers can [`subscribe`](crate::loader::ImageLoader::subscribe) to. Individual
//! calls can additionally pass callbacks, which are invoked inline.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{LoadStatus, ResourceKey};

/// Progress of a single key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub key: ResourceKey,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub status: LoadStatus,
}

/// Aggregate progress of a batch bound to display targets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

impl BatchProgress {
    pub fn new(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoaderEvent {
    Progress(ProgressEvent),
    BatchProgress(BatchProgress),
}

/// Callback invoked with progress updates of a single load call.
#[derive(Clone)]
pub struct ProgressCallback(Arc<dyn Fn(&ProgressEvent) + Send + Sync>);

impl ProgressCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, event: &ProgressEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressCallback")
    }
}

/// Sending half of the loader's event channel.
#[derive(Clone, Debug)]
pub(crate) struct EventSink {
    sender: broadcast::Sender<LoaderEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LoaderEvent) {
        // nobody listening is fine
        let _ = self.sender.send(event);
    }
}

/// Reports progress of one key to the event channel and an optional callback.
#[derive(Clone, Debug)]
pub(crate) struct ProgressReporter {
    key: ResourceKey,
    sink: EventSink,
    callback: Option<ProgressCallback>,
    last: u8,
}

impl ProgressReporter {
    pub fn new(key: ResourceKey, sink: EventSink, callback: Option<ProgressCallback>) -> Self {
        Self {
            key,
            sink,
            callback,
            last: 0,
        }
    }

    /// The last reported percentage.
    pub fn progress(&self) -> u8 {
        self.last
    }

    /// Reports `progress`, which is clamped so that reported values never go backwards.
    pub fn report(&mut self, progress: u8, status: LoadStatus) -> u8 {
        let progress = progress.min(100).max(self.last);
        self.last = progress;
        let event = ProgressEvent {
            key: self.key.clone(),
            progress,
            status,
        };
        if let Some(callback) = &self.callback {
            callback.call(&event);
        }
        self.sink.emit(LoaderEvent::Progress(event));
        progress
    }
}
