use std::time::Duration;

use bytes::Bytes;

/// One encoded audio unit and its play duration.
///
/// The payload is reference-counted and never mutated, so the same frame can
/// sit in the ring buffer, in several listener queues and in backlog
/// snapshots at once.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    duration: Duration,
}

impl Frame {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("duration", &self.duration)
            .finish()
    }
}
