//! MPEG audio frame splitting.
//!
//! The encoder emits a continuous MPEG-1/2/2.5 elementary stream. The
//! pipeline does not decode audio samples; it only needs to cut the byte
//! stream at frame boundaries and know how long each frame plays, which the
//! 4-byte frame header alone provides.
//!
//! Header validation rejects reserved and free-format values so that a stray
//! `0xFF 0xE?` inside tag data is not taken for a frame.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::error::DecodeError;
use crate::frame::Frame;

/// Junk tolerated between two frames before giving up on the item.
const MAX_RESYNC_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

const ID3V2_HEADER_LEN: usize = 10;
const ID3V1_TAG_LEN: usize = 128;

/// Bitrates in kbit/s, indexed by `[row][bitrate_index]`.
/// Rows: V1 L1, V1 L2, V1 L3, V2 L1, V2 L2/L3.
const BITRATES: [[u32; 15]; 5] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44_100, 48_000, 32_000], // MPEG-1
    [22_050, 24_000, 16_000], // MPEG-2
    [11_025, 12_000, 8_000],  // MPEG-2.5
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    I,
    II,
    III,
}

/// Parsed MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    /// Bits per second
    pub bitrate: u32,
    pub sample_rate: u32,
    pub padding: bool,
}

impl FrameHeader {
    /// Parses the 4 header bytes at the start of `data`.
    ///
    /// Returns `None` when the bytes are not a usable frame header: missing
    /// sync, reserved version/layer/sample rate, free-format or bad bitrate.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 || data[0] != 0xFF || (data[1] & 0xE0) != 0xE0 {
            return None;
        }

        let version = match (data[1] >> 3) & 0x03 {
            0 => MpegVersion::V25,
            2 => MpegVersion::V2,
            3 => MpegVersion::V1,
            _ => return None,
        };
        let layer = match (data[1] >> 1) & 0x03 {
            1 => Layer::III,
            2 => Layer::II,
            3 => Layer::I,
            _ => return None,
        };

        let bitrate_index = (data[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let sample_rate_index = ((data[2] >> 2) & 0x03) as usize;
        if sample_rate_index == 3 {
            return None;
        }

        let row = match (version, layer) {
            (MpegVersion::V1, Layer::I) => 0,
            (MpegVersion::V1, Layer::II) => 1,
            (MpegVersion::V1, Layer::III) => 2,
            (_, Layer::I) => 3,
            (_, _) => 4,
        };
        let version_index = match version {
            MpegVersion::V1 => 0,
            MpegVersion::V2 => 1,
            MpegVersion::V25 => 2,
        };

        Some(Self {
            version,
            layer,
            bitrate: BITRATES[row][bitrate_index] * 1000,
            sample_rate: SAMPLE_RATES[version_index][sample_rate_index],
            padding: (data[2] >> 1) & 0x01 == 1,
        })
    }

    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (Layer::I, _) => 384,
            (Layer::II, _) => 1152,
            (Layer::III, MpegVersion::V1) => 1152,
            (Layer::III, _) => 576,
        }
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let bitrate = self.bitrate as u64;
        let rate = self.sample_rate as u64;
        let padding = self.padding as u64;
        let len = match self.layer {
            Layer::I => (12 * bitrate / rate + padding) * 4,
            _ => (self.samples_per_frame() as u64 / 8) * bitrate / rate + padding,
        };
        len as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_frame() as f64 / self.sample_rate as f64)
    }
}

/// Size of an ID3v2 tag starting at `data`, footer included.
///
/// `None` if `data` does not start with a complete ID3v2 header.
fn id3v2_len(data: &[u8]) -> Option<usize> {
    if data.len() < ID3V2_HEADER_LEN || &data[..3] != b"ID3" {
        return None;
    }
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7F) as usize);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    Some(ID3V2_HEADER_LEN + size + footer)
}

/// Splits an encoded byte stream into [`Frame`]s.
pub struct FrameDecoder<R> {
    reader: R,
    buf: BytesMut,
    eof: bool,
    /// Tag bytes still to discard (tags can span several reads)
    skip: usize,
    /// Junk discarded since the last frame
    skipped: usize,
    frames: u64,
}

impl<R> FrameDecoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK * 2),
            eof: false,
            skip: 0,
            skipped: 0,
            frames: 0,
        }
    }

    /// Frames produced so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Returns the next frame, `Ok(None)` at a clean end of stream.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        loop {
            if self.skip > 0 {
                let n = self.skip.min(self.buf.len());
                let _ = self.buf.split_to(n);
                self.skip -= n;
                if self.skip > 0 {
                    if !self.fill().await? {
                        return Ok(None);
                    }
                    continue;
                }
            }

            if self.buf.len() >= 3 && &self.buf[..3] == b"ID3" {
                if self.buf.len() < ID3V2_HEADER_LEN && !self.eof {
                    self.fill().await?;
                    continue;
                }
                if let Some(len) = id3v2_len(&self.buf) {
                    trace!(len, "skipping ID3v2 tag");
                    self.skip = len;
                    continue;
                }
            }

            if self.buf.len() >= 3 && &self.buf[..3] == b"TAG" {
                trace!("skipping ID3v1 tag");
                self.skip = ID3V1_TAG_LEN;
                continue;
            }

            match FrameHeader::parse(&self.buf) {
                Some(header) => {
                    let len = header.frame_len();
                    if self.buf.len() >= len {
                        if self.skipped > 0 {
                            debug!(skipped = self.skipped, "resynchronised on frame header");
                            self.skipped = 0;
                        }
                        let data = self.buf.split_to(len).freeze();
                        self.frames += 1;
                        return Ok(Some(Frame::new(data, header.duration())));
                    }
                    if !self.fill().await? {
                        return Err(DecodeError::Truncated {
                            expected: len,
                            got: self.buf.len(),
                        });
                    }
                }
                None if self.buf.len() < 4 => {
                    if !self.fill().await? {
                        return self.finish();
                    }
                }
                None => {
                    // Drop bytes up to the next candidate sync byte.
                    let next = self.buf[1..]
                        .iter()
                        .position(|b| *b == 0xFF)
                        .map(|p| p + 1)
                        .unwrap_or(self.buf.len());
                    let _ = self.buf.split_to(next);
                    self.skipped += next;
                    if self.skipped > MAX_RESYNC_BYTES {
                        return Err(DecodeError::LostSync {
                            skipped: self.skipped,
                        });
                    }
                }
            }
        }
    }

    /// Reads more input. Returns `false` once the reader is exhausted.
    async fn fill(&mut self) -> Result<bool, DecodeError> {
        if self.eof {
            return Ok(false);
        }
        self.buf.reserve(READ_CHUNK);
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn finish(&mut self) -> Result<Option<Frame>, DecodeError> {
        let trailing = self.buf.len() + self.skipped;
        if trailing > 0 {
            debug!(trailing, frames = self.frames, "discarding trailing bytes");
        }
        self.buf.clear();
        self.skipped = 0;
        Ok(None)
    }
}
