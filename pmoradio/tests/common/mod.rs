//! Fakes shared by the integration tests.
//!
//! `FakeEncoder` never spawns a process: each item becomes an in-memory
//! stream of synthetic MPEG-1 Layer III frames (128 kbit/s, 44.1 kHz, 417
//! bytes, 1152 samples). Frames are generated lazily and stamped with a
//! global sequence number, so a test can tell exactly which frames the
//! pipeline pulled and in which order.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pmoradio::{EncodedStream, Encoder, Listener, TranscodeError};
use tokio::io::{AsyncRead, ReadBuf};

pub const FRAME_LEN: usize = 417;
const HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
/// Junk appended by `Behavior::Garbage`, past the decoder's resync window.
const JUNK_LEN: usize = 80 * 1024;

/// Play time of one synthetic frame.
pub fn frame_duration() -> Duration {
    Duration::from_secs_f64(1152.0 / 44_100.0)
}

/// Sequence number stamped into a synthetic frame.
pub fn seq(frame: &[u8]) -> u32 {
    assert_eq!(frame.len(), FRAME_LEN, "not a whole frame");
    u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]])
}

fn synthetic_frame(seq: u32) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&HEADER);
    frame[4..8].copy_from_slice(&seq.to_be_bytes());
    frame
}

/// What the fake encoder does with a location.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Emits that many frames, then exits cleanly
    Frames(u32),
    /// Fails to start
    FailStart,
    /// Starts, emits nothing and exits with an error
    ExitWithoutAudio,
    /// Emits that many frames followed by more junk than the decoder
    /// resyncs over, then exits cleanly
    Garbage(u32),
}

#[derive(Default)]
pub struct FakeEncoder {
    items: HashMap<String, Behavior>,
    starts: AtomicU32,
    produced: Arc<AtomicU32>,
}

impl FakeEncoder {
    pub fn new<I>(items: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (&'static str, Behavior)>,
    {
        Arc::new(Self {
            items: items
                .into_iter()
                .map(|(location, behavior)| (location.to_string(), behavior))
                .collect(),
            ..Self::default()
        })
    }

    /// Calls to `start`, failed or not.
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Frames generated so far, across all items.
    pub fn produced(&self) -> u32 {
        self.produced.load(Ordering::SeqCst)
    }
}

impl Encoder for FakeEncoder {
    fn start(&self, location: &str, _bitrate: u32) -> Result<Box<dyn EncodedStream>, TranscodeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.items.get(location).copied() {
            Some(Behavior::Frames(count)) => Ok(Box::new(FakeStream {
                remaining: count,
                pending: Bytes::new(),
                junk: 0,
                counter: self.produced.clone(),
                fail_on_close: false,
            })),
            Some(Behavior::Garbage(count)) => Ok(Box::new(FakeStream {
                remaining: count,
                pending: Bytes::new(),
                junk: JUNK_LEN,
                counter: self.produced.clone(),
                fail_on_close: false,
            })),
            Some(Behavior::ExitWithoutAudio) => Ok(Box::new(FakeStream {
                remaining: 0,
                pending: Bytes::new(),
                junk: 0,
                counter: self.produced.clone(),
                fail_on_close: true,
            })),
            Some(Behavior::FailStart) | None => {
                Err(TranscodeError::start(location, "fake encoder refused item"))
            }
        }
    }
}

struct FakeStream {
    remaining: u32,
    pending: Bytes,
    junk: usize,
    counter: Arc<AtomicU32>,
    fail_on_close: bool,
}

impl AsyncRead for FakeStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.is_empty() && self.remaining > 0 {
            self.remaining -= 1;
            let seq = self.counter.fetch_add(1, Ordering::SeqCst);
            self.pending = Bytes::from(synthetic_frame(seq));
        } else if self.pending.is_empty() && self.junk > 0 {
            let len = self.junk.min(4096);
            self.junk -= len;
            self.pending = Bytes::from(vec![0u8; len]);
        }
        let n = self.pending.len().min(buf.remaining());
        let chunk = self.pending.split_to(n);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl EncodedStream for FakeStream {
    async fn close(self: Box<Self>) -> Result<(), TranscodeError> {
        if self.fail_on_close {
            Err(TranscodeError::Io(io::Error::other("fake encoder exited with status 1")))
        } else {
            Ok(())
        }
    }
}

/// Reads `count` whole frames from a listener and returns their sequence numbers.
pub async fn read_seqs(listener: &mut Listener, count: usize) -> Vec<u32> {
    let mut seqs = Vec::with_capacity(count);
    while seqs.len() < count {
        let chunk = listener
            .next_chunk()
            .await
            .expect("listener ended early");
        seqs.push(seq(&chunk));
    }
    seqs
}
