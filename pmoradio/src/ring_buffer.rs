//! Bounded backlog of recently produced frames.
//!
//! The [`RingBuffer`] keeps the last `capacity` frame payloads so that a
//! listener joining mid-stream can be handed a short catch-up window. A
//! [`BacklogReader`] is a frozen view of the buffer taken at one instant: it
//! replays exactly the frames that were present when it was created, however
//! many frames are pushed or evicted afterwards.
//!
//! Payloads are [`Bytes`], so eviction only drops the buffer's own handle; a
//! reader still walking an older window keeps its frames alive.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

/// Insertion-ordered, item-bounded frame backlog.
///
/// Capacity counts frames, not bytes. With a constant-bitrate encoder frames
/// are roughly uniform, so `capacity * frame_size` approximates the memory
/// ceiling; [`RingBuffer::byte_size`] tracks the exact figure.
#[derive(Debug)]
pub struct RingBuffer {
    frames: VecDeque<Bytes>,
    capacity: usize,
    byte_size: usize,
}

impl RingBuffer {
    /// Creates a buffer holding at most `capacity` frames (`0` = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            byte_size: 0,
        }
    }

    /// Appends a shared payload, evicting from the head while over capacity.
    pub fn push(&mut self, data: Bytes) {
        self.byte_size += data.len();
        self.frames.push_back(data);
        while self.capacity > 0 && self.frames.len() > self.capacity {
            self.shift();
        }
    }

    /// Appends a private copy of `data`.
    pub fn push_slice(&mut self, data: &[u8]) {
        self.push(Bytes::copy_from_slice(data));
    }

    /// Unlinks the oldest frame from the buffer.
    pub fn shift(&mut self) -> Option<Bytes> {
        let head = self.frames.pop_front()?;
        self.byte_size -= head.len();
        Some(head)
    }

    /// Snapshot of the frames currently held.
    ///
    /// Only the payload handles are cloned; no audio bytes are copied.
    pub fn reader(&self) -> BacklogReader {
        BacklogReader::new(self.frames.iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Aggregate payload bytes of the retained frames.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Iterates from the oldest to the newest retained frame.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter()
    }
}

/// Sequential, single-pass reader over a [`RingBuffer`] snapshot.
///
/// Reads never block: once the captured frames are consumed every read
/// returns end-of-stream. Obtain a fresh reader from the buffer for a new
/// snapshot.
#[derive(Debug, Default)]
pub struct BacklogReader {
    frames: VecDeque<Bytes>,
    current: Bytes,
}

impl BacklogReader {
    fn new(frames: VecDeque<Bytes>) -> Self {
        Self {
            frames,
            current: Bytes::new(),
        }
    }

    /// Returns the unread part of the current frame, or the next frame.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        if !self.current.is_empty() {
            return Some(std::mem::take(&mut self.current));
        }
        self.frames.pop_front()
    }

    /// Frames not yet started (the partially read one is not counted).
    pub fn remaining_frames(&self) -> usize {
        self.frames.len()
    }

    /// Bytes left before end-of-stream.
    pub fn remaining_bytes(&self) -> usize {
        self.current.len() + self.frames.iter().map(Bytes::len).sum::<usize>()
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_empty() && self.frames.is_empty()
    }

    /// Releases the snapshot. The ring buffer itself is unaffected.
    pub fn close(&mut self) {
        self.frames.clear();
        self.current = Bytes::new();
    }

    fn fill(&mut self, buf: &mut [u8]) -> usize {
        let mut written = 0;
        while written < buf.len() {
            if self.current.is_empty() {
                match self.frames.pop_front() {
                    Some(next) => self.current = next,
                    None => break,
                }
                continue;
            }
            let n = self.current.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&self.current[..n]);
            let _ = self.current.split_to(n);
            written += n;
        }
        written
    }
}

impl io::Read for BacklogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf))
    }
}

impl AsyncRead for BacklogReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = self.fill(buf.initialize_unfilled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}
