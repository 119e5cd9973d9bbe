//! Driver spawns the transport reader and writer tasks

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::engine::Input;
use crate::transport::{ByteSink, ByteSource};

/// Consecutive read failures tolerated before the link is declared lost
pub(crate) const MAX_ERRORS: u32 = 10;

/// Driver owns both halves of the transport
///
/// The reader task forwards every chunk to the engine's input queue unmodified and
/// reports exactly once when the link closes or fails for good. The writer task
/// drains encoded commands in order, so a slow link never stalls the engine.
pub(crate) struct Driver;

impl Driver {
    /// Spawn the reader task for `source`
    pub(crate) fn spawn<S>(source: S, inputs: mpsc::UnboundedSender<Input>, cancel: CancellationToken) -> JoinHandle<()>
    where
        S: ByteSource,
    {
        tokio::spawn(async move {
            Self::reader_task(source, inputs, cancel).await;
        })
    }

    async fn reader_task<S>(mut source: S, inputs: mpsc::UnboundedSender<Input>, cancel: CancellationToken)
    where
        S: ByteSource,
    {
        info!("Transport reader task started");
        let mut chunk_count = 0u64;
        let mut byte_count = 0u64;
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Transport reader cancelled");
                    break;
                }
                result = source.next_chunk() => result,
            };

            match result {
                Ok(Some(bytes)) => {
                    chunk_count += 1;
                    byte_count += bytes.len() as u64;
                    error_count = 0;
                    trace!(chunk = chunk_count, bytes = bytes.len(), "Forwarding chunk");

                    if inputs.send(Input::Bytes(bytes)).is_err() {
                        debug!("Engine input closed, reader shutting down");
                        break;
                    }
                }
                Ok(None) => {
                    info!(chunks = chunk_count, bytes = byte_count, "Transport closed");
                    let _ = inputs.send(Input::SourceClosed { failed: false });
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    error!("Transport read error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many transport errors, giving up on the link");
                        let _ = inputs.send(Input::SourceClosed { failed: true });
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ... capped at 3.2s
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(6)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(chunks = chunk_count, bytes = byte_count, "Transport reader task ended");
    }

    /// Spawn the writer task for `sink`
    pub(crate) fn spawn_writer<K>(
        sink: K,
        outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        K: ByteSink,
    {
        tokio::spawn(async move {
            Self::writer_task(sink, outbound, cancel).await;
        })
    }

    async fn writer_task<K>(mut sink: K, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>, cancel: CancellationToken)
    where
        K: ByteSink,
    {
        let mut written = 0u64;
        let mut failed = 0u64;

        loop {
            let bytes = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Transport writer cancelled");
                    break;
                }
                next = outbound.recv() => match next {
                    Some(bytes) => bytes,
                    None => break,
                },
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Transport writer cancelled mid-write");
                    break;
                }
                result = sink.send(&bytes) => result,
            };

            // A failed write drops that frame only; the next command gets a fresh try.
            match result {
                Ok(()) => {
                    written += 1;
                    trace!(bytes = bytes.len(), "Frame written");
                }
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "Failed to write command");
                }
            }
        }

        info!(written, failed, "Transport writer task ended");
    }
}
