//! Error types for the radio streaming core

use std::io;
use std::process::ExitStatus;

/// Result type alias for radio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the streaming core.
///
/// Per-item and per-listener failures are handled inside the pipeline and
/// only show up in logs; the one variant that ends a stream is
/// [`Error::StationExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Too many consecutive items failed to start
    #[error("station exhausted: {attempts} consecutive items failed to transcode")]
    StationExhausted { attempts: u32 },

    /// Configuration could not be read
    #[error("configuration error: {0}")]
    Config(String),
}

/// Failures of one encoder invocation.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// The encoder process could not be launched or its output attached
    #[error("failed to start encoder for {location}: {source}")]
    Start {
        location: String,
        #[source]
        source: io::Error,
    },

    /// The encoder terminated with a non-zero status
    #[error("encoder for {location} exited with {status}")]
    Exit { location: String, status: ExitStatus },

    /// Waiting for the encoder failed
    #[error("encoder I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TranscodeError {
    /// Builds a start error that did not come from the OS (fakes, empty locations).
    pub fn start(location: impl Into<String>, message: impl Into<String>) -> Self {
        TranscodeError::Start {
            location: location.into(),
            source: io::Error::other(message.into()),
        }
    }
}

/// Failures while splitting an encoded stream into frames.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Reading the encoded stream failed
    #[error("I/O error while decoding: {0}")]
    Io(#[from] io::Error),

    /// A frame header announced more bytes than the stream delivered
    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// No frame sync was found within the resync window
    #[error("lost frame sync after skipping {skipped} bytes")]
    LostSync { skipped: usize },
}

/// Why a listener stopped receiving data.
///
/// Recorded exactly once per listener, whichever side closed it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CloseReason {
    /// The caller closed or dropped the listener
    #[error("listener closed")]
    Closed,

    /// The outbound queue was full and the listener was dropped
    #[error("listener fell behind and was dropped")]
    Unresponsive,

    /// The stream was shut down
    #[error("stream shut down")]
    Shutdown,

    /// The stream ended because its station produced nothing playable
    #[error("station exhausted")]
    StationExhausted,
}
