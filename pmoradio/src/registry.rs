//! Named set of radio streams.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::stream::{RadioStream, StreamStatus};

/// Streams indexed by a normalised name (lower case, spaces removed), so
/// that `"Jazz Club"` and `"jazzclub"` address the same stream.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, RadioStream>>,
}

/// Registry key for a stream name.
pub fn stream_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RadioStream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live stream registered under `name`, creating it with
    /// `factory` when absent or when the registered one has closed.
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> RadioStream
    where
        F: FnOnce() -> RadioStream,
    {
        let key = stream_key(name);
        let mut streams = self.lock();
        if let Some(stream) = streams.get(&key) {
            if !stream.is_closed() {
                return stream.clone();
            }
            info!(stream = %name, "replacing closed stream");
        }
        let stream = factory();
        streams.insert(key, stream.clone());
        stream
    }

    pub fn get(&self, name: &str) -> Option<RadioStream> {
        self.lock().get(&stream_key(name)).cloned()
    }

    /// Status of every registered stream, sorted by name.
    pub fn list(&self) -> Vec<StreamStatus> {
        let streams: Vec<RadioStream> = self.lock().values().cloned().collect();
        let mut statuses: Vec<StreamStatus> = streams.iter().map(RadioStream::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Shuts the stream down and forgets it.
    pub fn remove(&self, name: &str) -> Option<RadioStream> {
        let stream = self.lock().remove(&stream_key(name))?;
        stream.shutdown();
        Some(stream)
    }

    pub fn shutdown_all(&self) {
        let streams: Vec<RadioStream> = self.lock().drain().map(|(_, s)| s).collect();
        info!(streams = streams.len(), "shutting down all streams");
        for stream in streams {
            stream.shutdown();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
