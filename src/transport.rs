//! Transport traits for the coordinator link

use crate::Result;

/// Inbound half of a coordinator link.
///
/// Sources deliver raw bytes exactly as received. Framing is the codec's job, so a
/// chunk may hold half a frame or several frames.
#[async_trait::async_trait]
pub trait ByteSource: Send + 'static {
    /// Wait for the next chunk of bytes
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - Bytes available (never empty)
    /// - `Ok(None)` - Link closed (normal termination)
    /// - `Err(e)` - Read failed; the caller may retry
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Outbound half of a coordinator link.
#[async_trait::async_trait]
pub trait ByteSink: Send + 'static {
    /// Write one encoded command frame
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// A link that can be split into independently owned halves.
///
/// The reader task owns the source and the writer task owns the sink. Writing a
/// command therefore never waits on a pending read, and the engine never waits on
/// either.
pub trait Transport: Send + 'static {
    type Source: ByteSource;
    type Sink: ByteSink;

    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Whether real hardware sits behind this link
    fn is_hardware(&self) -> bool;

    fn into_split(self) -> (Self::Source, Self::Sink);
}
