//! Connected consumers of a radio stream.
//!
//! Each [`Listener`] owns the receiving half of a bounded queue; the stream
//! keeps the sending half in a [`ListenerSlot`]. Delivery never blocks the
//! pipeline: a slot whose queue is full is closed as unresponsive and
//! dropped from the live set.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CloseReason;
use crate::stream::Shared;

/// Stream-side half of a listener.
pub(crate) struct ListenerSlot {
    id: u64,
    tx: mpsc::Sender<Bytes>,
    closed: CancellationToken,
    reason: Arc<OnceLock<CloseReason>>,
}

impl ListenerSlot {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking enqueue of one frame payload.
    pub(crate) fn write(&self, data: &Bytes) -> Result<(), CloseReason> {
        match self.tx.try_send(data.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CloseReason::Unresponsive),
            Err(TrySendError::Closed(_)) => Err(CloseReason::Closed),
        }
    }

    /// Records `reason` (first one wins) and wakes anyone awaiting closure.
    ///
    /// The queue itself ends when the slot is dropped.
    pub(crate) fn close(&self, reason: CloseReason) {
        if self.reason.set(reason).is_ok() {
            debug!(listener = self.id, %reason, "listener closed");
        }
        self.closed.cancel();
    }
}

/// One connected consumer of a [`RadioStream`](crate::RadioStream).
///
/// Read it with [`tokio::io::AsyncReadExt`], as a
/// [`futures::Stream`] of payloads, or chunk by chunk with
/// [`Listener::next_chunk`]. Reads end once the listener is closed and its
/// queue drained. Dropping a listener closes it.
pub struct Listener {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    closed: CancellationToken,
    reason: Arc<OnceLock<CloseReason>>,
    stream: Weak<Shared>,
}

impl Listener {
    pub(crate) fn new(id: u64, queue: usize, stream: Weak<Shared>) -> (Self, ListenerSlot) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let closed = CancellationToken::new();
        let reason = Arc::new(OnceLock::new());
        let slot = ListenerSlot {
            id,
            tx,
            closed: closed.clone(),
            reason: reason.clone(),
        };
        let listener = Self {
            id,
            rx,
            pending: Bytes::new(),
            closed,
            reason,
            stream,
        };
        (listener, slot)
    }

    /// Identifier, unique within the stream.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Why the listener was closed, once it has been.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Completes when the listener is closed by either side.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Payloads waiting in the queue.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Next payload (or the unread rest of the current one), `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if !self.pending.is_empty() {
            return Some(std::mem::take(&mut self.pending));
        }
        self.rx.recv().await
    }

    /// Deregisters from the stream. Idempotent.
    ///
    /// Payloads already queued can still be read; further reads then report
    /// end of stream.
    pub fn close(&mut self) {
        if !self.closed.is_cancelled() {
            if let Some(stream) = self.stream.upgrade() {
                stream.remove_listener(self.id);
            }
            if self.reason.set(CloseReason::Closed).is_ok() {
                debug!(listener = self.id, "listener closed by caller");
            }
            self.closed.cancel();
        }
        self.rx.close();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("reason", &self.close_reason())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Listener {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                let chunk = self.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(data)) => self.pending = data,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl futures::Stream for Listener {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Poll::Ready(Some(std::mem::take(&mut self.pending)));
        }
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncReadExt;

    fn detached(queue: usize) -> (Listener, ListenerSlot) {
        Listener::new(1, queue, Weak::new())
    }

    #[tokio::test]
    async fn test_reads_split_payloads_across_calls() {
        let (mut listener, slot) = detached(4);
        slot.write(&Bytes::from_static(b"hello")).unwrap();
        slot.write(&Bytes::from_static(b"world")).unwrap();
        drop(slot);

        let mut buf = [0u8; 3];
        let mut out = Vec::new();
        loop {
            let n = listener.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"helloworld");
    }

    #[tokio::test]
    async fn test_full_queue_reports_unresponsive() {
        let (_listener, slot) = detached(2);
        let data = Bytes::from_static(b"x");
        slot.write(&data).unwrap();
        slot.write(&data).unwrap();
        assert_eq!(slot.write(&data), Err(CloseReason::Unresponsive));
    }

    #[tokio::test]
    async fn test_slot_close_is_observed_once() {
        let (listener, slot) = detached(2);
        slot.close(CloseReason::Shutdown);
        slot.close(CloseReason::Unresponsive);

        listener.closed().await;
        assert!(listener.is_closed());
        assert_eq!(listener.close_reason(), Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (mut listener, slot) = detached(4);
        slot.write(&Bytes::from_static(b"abc")).unwrap();
        listener.close();
        listener.close();

        assert_eq!(listener.close_reason(), Some(CloseReason::Closed));
        assert_eq!(listener.next_chunk().await.unwrap().as_ref(), b"abc");
        assert!(listener.next_chunk().await.is_none());
        assert_eq!(slot.write(&Bytes::from_static(b"late")), Err(CloseReason::Closed));
    }

    #[tokio::test]
    async fn test_stream_interface_yields_payloads() {
        let (mut listener, slot) = detached(4);
        slot.write(&Bytes::from_static(b"one")).unwrap();
        slot.write(&Bytes::from_static(b"two")).unwrap();
        drop(slot);

        let items: Vec<Bytes> = (&mut listener).collect().await;
        assert_eq!(items, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    }
}
