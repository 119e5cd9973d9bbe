//! Serial link to the buzzer coordinator
//!
//! The coordinator enumerates as a USB CDC or UART character device. Line settings
//! (baud rate, raw mode) are expected to be configured on the device node before
//! the engine opens it, e.g. with `stty -F /dev/ttyUSB0 115200 raw -echo`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace};

use crate::transport::{ByteSink, ByteSource, Transport};
use crate::{BuzzerError, Result};

const READ_CHUNK: usize = 256;

/// A tty waiting for carrier detect can block `open` indefinitely.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport backed by a serial device node.
///
/// Reads and writes go through separate handles on the same node so a command
/// never queues behind a blocked read.
pub struct SerialTransport {
    path: PathBuf,
    reader: File,
    writer: File,
}

impl SerialTransport {
    /// Open the device node read-write, giving up after [`OPEN_TIMEOUT`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        let opening = options.open(&path);
        let file = tokio::time::timeout(OPEN_TIMEOUT, opening)
            .await
            .map_err(|_| BuzzerError::Timeout { duration: OPEN_TIMEOUT })?
            .map_err(|e| {
                BuzzerError::transport_unavailable_with_source(format!("cannot open {}", path.display()), Box::new(e))
            })?;

        let writer = file.try_clone().await.map_err(|e| BuzzerError::io(path.display().to_string(), e))?;

        info!(path = %path.display(), "Opened serial transport");
        Ok(Self { path, reader: file, writer })
    }
}

impl Transport for SerialTransport {
    type Source = SerialSource;
    type Sink = SerialSink;

    fn describe(&self) -> String {
        format!("serial {}", self.path.display())
    }

    fn is_hardware(&self) -> bool {
        true
    }

    fn into_split(self) -> (SerialSource, SerialSink) {
        let context = self.path.display().to_string();
        let source = SerialSource { reader: self.reader, buf: vec![0; READ_CHUNK], context: context.clone() };
        (source, SerialSink { writer: self.writer, context })
    }
}

/// Read half of a [`SerialTransport`].
pub struct SerialSource {
    reader: File,
    buf: Vec<u8>,
    context: String,
}

#[async_trait::async_trait]
impl ByteSource for SerialSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let read = self.reader.read(&mut self.buf).await.map_err(|e| BuzzerError::io(self.context.clone(), e))?;
        if read == 0 {
            debug!(port = %self.context, "Serial link reached end of stream");
            return Ok(None);
        }
        trace!(port = %self.context, bytes = read, "Serial read");
        Ok(Some(self.buf[..read].to_vec()))
    }
}

/// Write half of a [`SerialTransport`].
pub struct SerialSink {
    writer: File,
    context: String,
}

#[async_trait::async_trait]
impl ByteSink for SerialSink {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await.map_err(|e| BuzzerError::io(self.context.clone(), e))?;
        self.writer.flush().await.map_err(|e| BuzzerError::io(self.context.clone(), e))?;
        trace!(port = %self.context, bytes = bytes.len(), "Serial write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_device_is_transport_unavailable() {
        let Err(error) = SerialTransport::open("/nonexistent/buzzwire-tty").await else {
            panic!("opening a missing device should fail");
        };
        assert!(matches!(error, BuzzerError::Transport { .. }));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn reads_bytes_from_a_regular_file() {
        let path = std::env::temp_dir().join(format!("buzzwire-serial-{}", std::process::id()));
        tokio::fs::write(&path, crate::test_utils::press_bytes(3, 120, 1)).await.unwrap();

        let transport = SerialTransport::open(&path).await.unwrap();
        assert!(transport.describe().starts_with("serial "));
        let (mut source, _sink) = transport.into_split();

        let mut collected = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            collected.extend(chunk);
        }
        assert_eq!(collected.len(), 12);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
