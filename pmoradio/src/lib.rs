//! # pmoradio
//!
//! Continuous internet-radio streaming core.
//!
//! A [`RadioStream`] pulls items from a [`Station`], transcodes each one to
//! constant-bitrate MP3 with an external encoder, and serves the result live
//! to any number of listeners. A listener joining mid-stream first receives
//! a short catch-up backlog, then the live frames, with nothing missed or
//! repeated in between.
//!
//! ## Features
//!
//! - **Bounded memory**: the backlog holds a fixed number of frames and each
//!   listener has a bounded queue; slow listeners are dropped, never waited on
//! - **Real-time pacing**: the pipeline runs at most a few seconds ahead of
//!   playback time
//! - **Idle when unheard**: with no listener the encoder is not read at all
//! - **Shared payloads**: frames are [`bytes::Bytes`], shared between the
//!   backlog and every listener queue without copies
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmoradio::{PlaylistSource, PlaylistStation, RadioStream, StreamOptions};
//! use tokio::io::AsyncReadExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let station = PlaylistStation::new("jazz", PlaylistSource::from_path("/music/jazz"), true);
//!     let stream = RadioStream::with_ffmpeg("Jazz", Arc::new(station), StreamOptions::default());
//!
//!     let (mut listener, mut backlog) = stream.connect().ok_or("stream closed")?;
//!     let mut head = Vec::new();
//!     backlog.read_to_end(&mut head).await?;
//!
//!     let mut buf = [0u8; 4096];
//!     let n = listener.read(&mut buf).await?;
//!     println!("{} backlog bytes, then {} live bytes", head.len(), n);
//!
//!     stream.shutdown();
//!     Ok(())
//! }
//! ```

pub mod error;
mod frame;
mod listener;
pub mod mp3;
mod now_playing;
mod registry;
mod ring_buffer;
pub mod station;
mod stream;
pub mod transcoder;

#[cfg(feature = "pmoconfig")]
mod config_ext;

pub use error::{CloseReason, DecodeError, Error, Result, TranscodeError};
pub use frame::Frame;
pub use listener::Listener;
pub use mp3::FrameDecoder;
pub use now_playing::NowPlaying;
pub use registry::{stream_key, StreamRegistry};
pub use ring_buffer::{BacklogReader, RingBuffer};
pub use station::{PlaylistSource, PlaylistStation, Station};
pub use stream::{RadioStream, StreamOptions, StreamState, StreamStatus};
pub use transcoder::{EncodedStream, Encoder, FfmpegEncoder, Transcoder};

#[cfg(feature = "pmoconfig")]
pub use config_ext::RadioConfigExt;
