//! Streams the re-encoded dump out through a single writer task.
//!
//! Producers (the caller driving `Repos::encode`) push chunks onto a bounded
//! channel; one background task drains it and writes to the underlying sink.
//! The bound (an 8-slot queue) is load-bearing — it applies
//! backpressure so the producer never outruns the writer and buffers the
//! whole dump in memory.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{DumpError, Result};

const QUEUE_CAPACITY: usize = 8;
const BUFFER_TARGET: usize = 4096;

enum Chunk {
    Write(Bytes),
    Close(oneshot::Sender<Result<()>>),
}

/// A writer mode: `Buffered` coalesces small chunks before flushing;
/// `Raw` writes every chunk straight through (used for content blobs large
/// enough that coalescing would just copy bytes twice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Buffered,
    Raw,
}

pub struct Encoder {
    tx: mpsc::Sender<Chunk>,
    worker: JoinHandle<()>,
}

impl Encoder {
    /// Spawns the single consumer task that owns `sink` for the lifetime of
    /// the encoder.
    pub fn spawn<W>(sink: W, mode: Mode) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(Self::run(sink, rx, mode));
        Self { tx, worker }
    }

    async fn run<W>(mut sink: W, mut rx: mpsc::Receiver<Chunk>, mode: Mode)
    where
        W: AsyncWrite + Unpin,
    {
        let mut buffer = Vec::with_capacity(BUFFER_TARGET);
        // The first write failure is latched and reported to `close()`;
        // an IO error is never silently swallowed (spec §7). Once latched,
        // further chunks are drained (to honor close-protocol ordering) but
        // not written, since the sink is already known bad.
        let mut failure: Option<DumpError> = None;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Write(bytes) => {
                    if failure.is_some() {
                        continue;
                    }
                    match mode {
                        Mode::Raw => {
                            if let Err(e) = sink.write_all(&bytes).await {
                                warn!(error = %e, "encoder write failed");
                                failure = Some(DumpError::from(e));
                            }
                        }
                        Mode::Buffered => {
                            buffer.extend_from_slice(&bytes);
                            if buffer.len() >= BUFFER_TARGET {
                                if let Err(e) = sink.write_all(&buffer).await {
                                    warn!(error = %e, "encoder flush failed");
                                    failure = Some(DumpError::from(e));
                                }
                                buffer.clear();
                            }
                        }
                    }
                }
                Chunk::Close(done) => {
                    let result = match failure {
                        Some(e) => Err(e),
                        None => async {
                            if !buffer.is_empty() {
                                sink.write_all(&buffer).await?;
                                buffer.clear();
                            }
                            sink.flush().await?;
                            Ok::<(), std::io::Error>(())
                        }
                        .await
                        .map_err(DumpError::from),
                    };
                    debug!("encoder drained and closed");
                    let _ = done.send(result);
                    return;
                }
            }
        }
    }

    /// Queues a chunk for writing, awaiting a free queue slot if all 8 are
    /// occupied — the backpressure point a bounded channel exists for.
    pub async fn write(&self, bytes: impl Into<Bytes>) {
        // The only way this fails is if the worker task already exited,
        // which only happens after `close()` has consumed `self`.
        let _ = self.tx.send(Chunk::Write(bytes.into())).await;
    }

    /// Closes the producer side and awaits the consumer's completion signal.
    /// Drains whatever is still queued before the signal fires.
    pub async fn close(self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Chunk::Close(done_tx)).await.is_err() {
            return Err(DumpError::Io(std::io::Error::other(
                "encoder worker already gone",
            )));
        }
        let result = done_rx
            .await
            .map_err(|_| DumpError::Io(std::io::Error::other("encoder worker dropped")))?;
        let _ = self.worker.await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ArcSink {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl tokio::io::AsyncWrite for ArcSink {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::result::Result<usize, std::io::Error>> {
            self.buf.lock().unwrap().extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writes_chunks_in_order_raw() {
        let sink = ArcSink::default();
        let encoder = Encoder::spawn(sink.clone(), Mode::Raw);
        encoder.write(Bytes::from_static(b"hello ")).await;
        encoder.write(Bytes::from_static(b"world")).await;
        encoder.close().await.unwrap();
        assert_eq!(&sink.buf.lock().unwrap()[..], b"hello world");
    }

    #[tokio::test]
    async fn close_flushes_buffered_remainder() {
        let sink = ArcSink::default();
        let encoder = Encoder::spawn(sink.clone(), Mode::Buffered);
        encoder.write(Bytes::from_static(b"abc")).await;
        encoder.close().await.unwrap();
        assert_eq!(&sink.buf.lock().unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn buffered_mode_flushes_once_target_is_reached() {
        let sink = ArcSink::default();
        let encoder = Encoder::spawn(sink.clone(), Mode::Buffered);
        let chunk = Bytes::from(vec![b'x'; BUFFER_TARGET]);
        encoder.write(chunk).await;
        // Give the worker a beat to drain the flush before checking.
        tokio::task::yield_now().await;
        encoder.close().await.unwrap();
        assert_eq!(sink.buf.lock().unwrap().len(), BUFFER_TARGET);
    }
}
