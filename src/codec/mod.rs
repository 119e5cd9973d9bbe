//! Frame codec for the coordinator's serial protocol.
//!
//! The coordinator speaks one of two dialects, fixed per installation:
//!
//! - **Binary**: fixed-size frames starting with `0xAA`, XOR checksummed
//!   (see [`binary`])
//! - **Text**: legacy newline-delimited ASCII records (see [`text`])
//!
//! [`FrameCodec`] owns the only decoder state, a buffer of bytes that have not yet
//! formed a complete frame. Feeding it bytes yields a lazy iterator of [`Frame`]s;
//! whatever is left over is retained for the next call. Malformed input is never
//! an error: bytes are dropped, counted in [`CodecStats`], and framing resumes.
//!
//! Host-to-device commands are always sent in the binary `0xBB` format
//! ([`Command::encode`]), regardless of the inbound dialect.
//!
//! ```rust
//! use buzzwire::codec::{FrameCodec, ProtocolMode};
//! use buzzwire::types::Frame;
//!
//! let mut codec = FrameCodec::new(ProtocolMode::Text);
//! let frames: Vec<Frame> = codec.decode(b"ACK:ARM\nBUZZ").collect();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(codec.pending(), 4);
//!
//! let frames: Vec<Frame> = codec.decode(b"ER:1,10,20,1\n").collect();
//! assert_eq!(frames[0].kind(), "button_press");
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::types::Frame;

pub mod binary;
pub mod command;
pub mod text;

pub use command::{BROADCAST, Command, CommandType};

use binary::Step;

/// Which dialect the coordinator speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    #[default]
    Binary,
    Text,
}

impl ProtocolMode {
    /// Mode selected by the `binary_protocol` configuration flag.
    pub fn from_binary_flag(binary: bool) -> Self {
        if binary { ProtocolMode::Binary } else { ProtocolMode::Text }
    }
}

/// Counters describing what the decoder has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    pub frames_decoded: u64,
    /// Bytes skipped during resynchronization or dropped as garbage
    pub bytes_discarded: u64,
    pub checksum_failures: u64,
    /// Well-formed text lines with an unknown prefix or unparseable body
    pub lines_ignored: u64,
}

/// Stateful decoder for one serial stream.
#[derive(Debug)]
pub struct FrameCodec {
    mode: ProtocolMode,
    buffer: Vec<u8>,
    /// Start of the undecoded region of `buffer`
    cursor: usize,
    stats: CodecStats,
}

impl FrameCodec {
    /// Create an empty codec for the given dialect.
    pub fn new(mode: ProtocolMode) -> Self {
        Self { mode, buffer: Vec::with_capacity(256), cursor: 0, stats: CodecStats::default() }
    }

    /// Dialect this codec decodes.
    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    /// Append `bytes` and return an iterator over every frame now decodable.
    ///
    /// Frames are decoded lazily as the iterator is advanced. Bytes belonging to a
    /// frame that has not fully arrived stay buffered for the next call. Dropping
    /// the iterator early is fine; undecoded bytes are kept.
    pub fn decode(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.compact();
        self.buffer.extend_from_slice(bytes);
        Frames { codec: self }
    }

    /// Number of buffered bytes not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Decoder counters since construction.
    pub fn stats(&self) -> CodecStats {
        self.stats
    }

    /// Wire bytes for an outbound command.
    pub fn encode(&self, command: &Command) -> Vec<u8> {
        command.encode().to_vec()
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }

    fn discard(&mut self, count: usize) {
        self.cursor += count;
        self.stats.bytes_discarded += count as u64;
    }

    fn next_binary(&mut self) -> Option<Frame> {
        loop {
            match binary::step(&self.buffer[self.cursor..]) {
                Step::Frame { frame, consumed } => {
                    self.cursor += consumed;
                    self.stats.frames_decoded += 1;
                    trace!(kind = frame.kind(), "Decoded binary frame");
                    return Some(frame);
                }
                Step::BadChecksum { consumed } => {
                    debug!("Dropping {} byte frame with bad checksum", consumed);
                    self.stats.checksum_failures += 1;
                    self.discard(consumed);
                }
                Step::Resync => {
                    trace!("Resync: skipping byte {:#04x}", self.buffer[self.cursor]);
                    self.discard(1);
                }
                Step::Incomplete => return None,
            }
        }
    }

    fn next_text(&mut self) -> Option<Frame> {
        loop {
            let rest = &self.buffer[self.cursor..];
            let Some(end) = rest.iter().position(|&b| b == b'\n') else {
                if rest.len() > text::MAX_LINE_LEN {
                    debug!("Dropping {} bytes of unterminated line noise", rest.len());
                    let len = rest.len();
                    self.discard(len);
                }
                return None;
            };

            let parsed = std::str::from_utf8(&rest[..end])
                .map(|line| text::parse_line(line.trim_end_matches('\r')));
            let consumed = end + 1;

            match parsed {
                Ok(Some(frame)) => {
                    self.cursor += consumed;
                    self.stats.frames_decoded += 1;
                    trace!(kind = frame.kind(), "Decoded text frame");
                    return Some(frame);
                }
                Ok(None) => {
                    self.cursor += consumed;
                    self.stats.lines_ignored += 1;
                }
                Err(_) => {
                    debug!("Dropping non-UTF-8 line of {} bytes", end);
                    self.discard(consumed);
                }
            }
        }
    }
}

/// Lazy iterator returned by [`FrameCodec::decode`].
#[derive(Debug)]
pub struct Frames<'a> {
    codec: &'a mut FrameCodec,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self.codec.mode {
            ProtocolMode::Binary => self.codec.next_binary(),
            ProtocolMode::Text => self.codec.next_text(),
        }
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        self.codec.compact();
    }
}
