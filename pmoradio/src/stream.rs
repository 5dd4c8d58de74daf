//! The radio stream orchestrator.
//!
//! A [`RadioStream`] owns one background pipeline task that pulls items from
//! its [`Station`], runs each through the [`Encoder`], splits the output into
//! frames, records them in the backlog and fans them out to every connected
//! [`Listener`], pacing itself so that it stays at most `lookahead` ahead of
//! real playback time.
//!
//! ```text
//! Station ─► Encoder ─► FrameDecoder ─► [push + fan-out] ─► pace
//!                                          │      │
//!                                   RingBuffer   Listener queues
//! ```
//!
//! Backlog push, fan-out, `connect` (snapshot + register) and listener
//! removal all happen under one mutex, so a new listener sees every frame
//! exactly once: either in its backlog snapshot or in its live queue.
//!
//! With no listener connected the pipeline parks until the next `connect`;
//! the encoder is simply no longer read, and pipe backpressure stalls it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{CloseReason, Error, Result};
use crate::frame::Frame;
use crate::listener::{Listener, ListenerSlot};
use crate::mp3::FrameDecoder;
use crate::now_playing::NowPlaying;
use crate::ring_buffer::{BacklogReader, RingBuffer};
use crate::station::Station;
use crate::transcoder::{Encoder, FfmpegEncoder};

/// Tuning of a [`RadioStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Encoder output bitrate in bits per second
    pub bitrate: u32,
    /// Frames kept for the catch-up window (`0` = unbounded)
    pub backlog_frames: usize,
    /// How far ahead of real time the pipeline may run
    pub lookahead: Duration,
    /// Per-listener queue length, in frames
    pub listener_queue: usize,
    /// Consecutive failed items after which the stream gives up
    pub max_start_failures: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            bitrate: 128_000,
            backlog_frames: 500,
            lookahead: Duration::from_secs(8),
            listener_queue: 1000,
            max_start_failures: 5,
        }
    }
}

impl StreamOptions {
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_backlog_frames(mut self, frames: usize) -> Self {
        self.backlog_frames = frames;
        self
    }

    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_listener_queue(mut self, queue: usize) -> Self {
        self.listener_queue = queue;
        self
    }

    pub fn with_max_start_failures(mut self, failures: u32) -> Self {
        self.max_start_failures = failures;
        self
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.bitrate < 8_000 {
            return Err(Error::Config(format!(
                "bitrate must be at least 8000 bit/s, got {}",
                self.bitrate
            )));
        }
        if self.listener_queue == 0 {
            return Err(Error::Config("listener queue must hold at least one frame".into()));
        }
        if self.max_start_failures == 0 {
            return Err(Error::Config("max start failures must be at least 1".into()));
        }
        Ok(())
    }
}

/// Lifecycle state reported in [`StreamStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// No listener, pipeline parked
    Idle,
    /// At least one listener, pipeline producing
    Active,
    /// Shut down
    Closed,
    /// Ended because the station produced nothing playable
    Exhausted,
}

/// Snapshot of a stream for monitoring and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub name: String,
    pub description: String,
    pub clients: usize,
    pub state: StreamState,
    pub buffered_frames: usize,
    pub buffered_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<NowPlaying>,
}

struct State {
    buffer: RingBuffer,
    listeners: Vec<ListenerSlot>,
    next_id: u64,
    idle: bool,
    closed: bool,
    exhausted: bool,
    /// Playback time covered by the frames distributed so far.
    clock: Instant,
    current: Option<String>,
}

pub(crate) struct Shared {
    name: String,
    station: Arc<dyn Station>,
    encoder: Arc<dyn Encoder>,
    options: StreamOptions,
    state: Mutex<State>,
    wake: Notify,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops listener `id` from the live set.
    pub(crate) fn remove_listener(&self, id: u64) {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|slot| slot.id() != id);
        if state.listeners.len() < before {
            debug!(stream = %self.name, listener = id, "listener disconnected");
            self.idle_if_empty(&mut state);
        }
    }

    fn idle_if_empty(&self, state: &mut State) {
        if state.listeners.is_empty() && !state.idle {
            state.idle = true;
            info!(stream = %self.name, "no listener left, idling");
        }
    }

    fn set_current(&self, location: Option<&str>) {
        self.lock().current = location.map(str::to_string);
    }

    /// Marks the stream closed and releases every listener with `reason`.
    fn close(&self, reason: CloseReason) {
        let slots = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.exhausted = reason == CloseReason::StationExhausted;
            state.idle = true;
            std::mem::take(&mut state.listeners)
        };
        self.cancel.cancel();
        self.wake.notify_one();
        info!(stream = %self.name, listeners = slots.len(), %reason, "stream closed");
        for slot in slots {
            slot.close(reason);
        }
    }

    /// Records `frame` in the backlog and hands it to every listener.
    fn distribute(&self, frame: &Frame) {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.buffer.push(frame.data().clone());
        state.clock += frame.duration();
        state.listeners.retain(|slot| match slot.write(frame.data()) {
            Ok(()) => true,
            Err(reason) => {
                if reason == CloseReason::Unresponsive {
                    warn!(stream = %self.name, listener = slot.id(), "listener queue full, dropping");
                }
                slot.close(reason);
                false
            }
        });
        trace!(
            stream = %self.name,
            bytes = frame.len(),
            listeners = state.listeners.len(),
            "frame distributed"
        );
        self.idle_if_empty(state);
    }

    /// Waits while the stream is idle. Returns `false` once it is closed.
    async fn wait_until_active(&self) -> bool {
        let mut logged = false;
        loop {
            let notified = self.wake.notified();
            {
                let state = self.lock();
                if state.closed || self.cancel.is_cancelled() {
                    return false;
                }
                if !state.idle {
                    if logged {
                        info!(stream = %self.name, "listener connected, resuming");
                    }
                    return true;
                }
            }
            if !logged {
                debug!(stream = %self.name, "waiting for a listener");
                logged = true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = notified => {}
            }
        }
    }

    /// Sleeps until the distributed audio is no more than `lookahead` ahead
    /// of real time.
    async fn pace(&self) -> bool {
        let ahead = self.lock().clock.saturating_duration_since(Instant::now());
        let lookahead = self.options.lookahead;
        if ahead > lookahead + Duration::from_millis(1) {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(ahead - lookahead) => {}
            }
        }
        true
    }

    /// Plays one item. Returns `false` when the stream was closed meanwhile.
    async fn play(&self, location: &str, failures: &mut u32) -> bool {
        let encoded = match self.encoder.start(location, self.options.bitrate) {
            Ok(encoded) => encoded,
            Err(err) => {
                *failures += 1;
                warn!(stream = %self.name, location, failures = *failures, error = %err, "item failed to start");
                tokio::task::yield_now().await;
                return true;
            }
        };
        self.set_current(Some(location));
        info!(stream = %self.name, location, "now playing");

        let mut decoder = FrameDecoder::new(encoded);
        loop {
            if !self.wait_until_active().await {
                return false;
            }
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                next = decoder.next_frame() => next,
            };
            match next {
                Ok(Some(frame)) => {
                    if decoder.frames() == 1 {
                        *failures = 0;
                    }
                    self.distribute(&frame);
                    if !self.pace().await {
                        return false;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(stream = %self.name, location, error = %err, "decode failed, skipping rest of item");
                    break;
                }
            }
        }

        let produced = decoder.frames();
        match decoder.into_inner().close().await {
            Ok(()) => {
                *failures = 0;
                debug!(stream = %self.name, location, frames = produced, "item finished");
            }
            Err(err) if produced == 0 => {
                *failures += 1;
                warn!(stream = %self.name, location, failures = *failures, error = %err, "item produced no audio");
            }
            Err(err) => warn!(stream = %self.name, location, error = %err, "encoder ended abnormally"),
        }
        self.set_current(None);
        if produced == 0 {
            tokio::task::yield_now().await;
        }
        true
    }

    async fn run(&self) -> Result<()> {
        let threshold = self.options.max_start_failures.max(1);
        let mut failures = 0u32;
        loop {
            if !self.wait_until_active().await {
                return Ok(());
            }
            let location = self.station.next();
            if !self.play(&location, &mut failures).await {
                return Ok(());
            }
            if failures >= threshold {
                self.set_current(None);
                self.close(CloseReason::StationExhausted);
                return Err(Error::StationExhausted { attempts: failures });
            }
        }
    }
}

/// A continuously playing radio stream.
///
/// Cloning yields another handle to the same stream. The pipeline keeps
/// running until [`RadioStream::shutdown`] is called or the station is
/// exhausted; dropping handles does not stop it.
#[derive(Clone)]
pub struct RadioStream {
    shared: Arc<Shared>,
}

impl RadioStream {
    /// Creates the stream and spawns its pipeline on the current Tokio runtime.
    ///
    /// The stream starts idle: nothing is encoded before the first
    /// [`connect`](Self::connect).
    pub fn new(
        name: impl Into<String>,
        station: Arc<dyn Station>,
        encoder: Arc<dyn Encoder>,
        options: StreamOptions,
    ) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                buffer: RingBuffer::new(options.backlog_frames),
                listeners: Vec::new(),
                next_id: 1,
                idle: true,
                closed: false,
                exhausted: false,
                clock: Instant::now(),
                current: None,
            }),
            name,
            station,
            encoder,
            options,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        });

        info!(stream = %shared.name, station = %shared.station.description(), "starting stream");
        let pipeline = shared.clone();
        tokio::spawn(async move {
            match pipeline.run().await {
                Ok(()) => info!(stream = %pipeline.name, "pipeline stopped"),
                Err(err) => error!(stream = %pipeline.name, error = %err, "pipeline stopped"),
            }
            pipeline.set_current(None);
            pipeline.finished.cancel();
        });

        Self { shared }
    }

    /// Stream transcoding through [`FfmpegEncoder::default`].
    pub fn with_ffmpeg(
        name: impl Into<String>,
        station: Arc<dyn Station>,
        options: StreamOptions,
    ) -> Self {
        Self::new(name, station, Arc::new(FfmpegEncoder::default()), options)
    }

    /// Registers a new listener and returns it with its catch-up backlog.
    ///
    /// The backlog must be drained before reading the listener. Returns
    /// `None` once the stream is closed.
    pub fn connect(&self) -> Option<(Listener, BacklogReader)> {
        let mut state = self.shared.lock();
        if state.closed {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;

        let (listener, slot) = Listener::new(
            id,
            self.shared.options.listener_queue,
            Arc::downgrade(&self.shared),
        );
        let backlog = state.buffer.reader();
        state.listeners.push(slot);
        debug!(stream = %self.shared.name, listener = id, backlog = backlog.remaining_frames(), "listener connected");

        if state.idle {
            state.idle = false;
            state.clock = Instant::now();
            self.shared.wake.notify_one();
        }
        Some((listener, backlog))
    }

    /// Stops the pipeline and closes every listener. Idempotent.
    pub fn shutdown(&self) {
        self.shared.close(CloseReason::Shutdown);
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn options(&self) -> &StreamOptions {
        &self.shared.options
    }

    pub fn station(&self) -> &Arc<dyn Station> {
        &self.shared.station
    }

    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    /// Frames currently held in the catch-up window.
    pub fn backlog_len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.lock().idle
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Whether the pipeline task is still alive.
    pub fn is_running(&self) -> bool {
        !self.shared.finished.is_cancelled()
    }

    /// Completes once the pipeline task has exited.
    pub async fn stopped(&self) {
        self.shared.finished.cancelled().await
    }

    /// Location of the item being played.
    pub fn current(&self) -> Option<String> {
        self.shared.lock().current.clone()
    }

    pub fn status(&self) -> StreamStatus {
        let (clients, state, buffered_frames, buffered_bytes, current) = {
            let state = self.shared.lock();
            let label = if state.exhausted {
                StreamState::Exhausted
            } else if state.closed {
                StreamState::Closed
            } else if state.idle {
                StreamState::Idle
            } else {
                StreamState::Active
            };
            (
                state.listeners.len(),
                label,
                state.buffer.len(),
                state.buffer.byte_size(),
                state.current.clone(),
            )
        };
        StreamStatus {
            name: self.shared.name.clone(),
            description: self.shared.station.description(),
            clients,
            state,
            buffered_frames,
            buffered_bytes,
            current: current.as_deref().and_then(NowPlaying::resolve),
        }
    }
}

impl std::fmt::Debug for RadioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioStream")
            .field("name", &self.shared.name)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}
