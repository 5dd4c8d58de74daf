//! External encoder invocation.
//!
//! A [`Transcoder`] owns one encoder child process bound to one source item
//! and one bitrate. Its stdout is read as a continuous MP3 byte stream.
//!
//! The pipeline never pauses the child explicitly: when the stream idles it
//! simply stops reading, the OS pipe fills, and the encoder blocks on write.
//!
//! [`Encoder`] is the seam the stream uses to obtain transcoders, so tests
//! and alternative backends can supply their own byte streams.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

use crate::error::TranscodeError;

/// Program used by [`FfmpegEncoder::default`].
pub const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";

/// Starts one encoded byte stream per item.
pub trait Encoder: Send + Sync {
    /// Launches the encoder for `location` at `bitrate` bits per second.
    fn start(&self, location: &str, bitrate: u32)
        -> Result<Box<dyn EncodedStream>, TranscodeError>;
}

/// A running encoder: readable until the item is exhausted, closed once.
#[async_trait]
pub trait EncodedStream: AsyncRead + Send + Unpin {
    /// Releases the output and waits for the encoder to finish.
    async fn close(self: Box<Self>) -> Result<(), TranscodeError>;
}

/// Encoder backed by an `ffmpeg` (or compatible) executable.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for one invocation.
    pub fn args(location: &str, bitrate: u32) -> Vec<String> {
        vec![
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            location.into(),
            "-vn".into(),
            "-f".into(),
            "mp3".into(),
            "-acodec".into(),
            "libmp3lame".into(),
            "-ab".into(),
            format!("{}k", bitrate / 1000),
            "-".into(),
        ]
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODER_PROGRAM)
    }
}

impl Encoder for FfmpegEncoder {
    fn start(
        &self,
        location: &str,
        bitrate: u32,
    ) -> Result<Box<dyn EncodedStream>, TranscodeError> {
        if location.is_empty() {
            return Err(TranscodeError::start(location, "empty location"));
        }
        let mut command = Command::new(&self.program);
        command.args(Self::args(location, bitrate));
        Ok(Box::new(Transcoder::spawn(location, command)?))
    }
}

/// One encoder child process and its stdout pipe.
#[derive(Debug)]
pub struct Transcoder {
    location: String,
    child: Child,
    stdout: Option<ChildStdout>,
}

impl Transcoder {
    /// Spawns `command` with stdout piped; the child is killed if dropped unclosed.
    pub fn spawn(location: &str, mut command: Command) -> Result<Self, TranscodeError> {
        info!(location, "transcoding");
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| TranscodeError::Start {
            location: location.to_string(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TranscodeError::start(location, "encoder stdout could not be attached")
        })?;

        Ok(Self {
            location: location.to_string(),
            child,
            stdout: Some(stdout),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl AsyncRead for Transcoder {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.stdout.as_mut() {
            Some(stdout) => Pin::new(stdout).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transcoder closed",
            ))),
        }
    }
}

#[async_trait]
impl EncodedStream for Transcoder {
    async fn close(mut self: Box<Self>) -> Result<(), TranscodeError> {
        // Closing our end first unblocks a child stuck on a full pipe.
        drop(self.stdout.take());
        let status = self.child.wait().await?;
        debug!(location = %self.location, %status, "encoder exited");
        if status.success() {
            Ok(())
        } else {
            Err(TranscodeError::Exit {
                location: self.location.clone(),
                status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_ffmpeg_arguments() {
        let args = FfmpegEncoder::args("/music/a.flac", 128_000);
        assert_eq!(
            args,
            vec![
                "-loglevel", "error", "-i", "/music/a.flac", "-vn", "-f", "mp3", "-acodec",
                "libmp3lame", "-ab", "128k", "-"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_a_start_error() {
        let encoder = FfmpegEncoder::new("/nonexistent/pmoradio-encoder");
        let err = encoder.start("song.mp3", 128_000).err().unwrap();
        assert!(matches!(err, TranscodeError::Start { .. }));
    }

    #[tokio::test]
    async fn test_empty_location_is_rejected() {
        let err = FfmpegEncoder::default().start("", 128_000).err().unwrap();
        assert!(matches!(err, TranscodeError::Start { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_child_output_and_waits() {
        let mut command = Command::new("sh");
        command.args(["-c", "printf abc"]);
        let mut transcoder = Box::new(Transcoder::spawn("inline", command).unwrap());

        let mut out = Vec::new();
        transcoder.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
        transcoder.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_reported_on_close() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let transcoder = Box::new(Transcoder::spawn("failing", command).unwrap());

        let err = transcoder.close().await.unwrap_err();
        assert!(matches!(err, TranscodeError::Exit { .. }));
    }
}
