//! Stream fanout: one upstream byte stream feeding two sinks through
//! bounded buffers.
//!
//! The producer awaits each open sink in turn, so the slower sink slows
//! the faster one and neither skips bytes. A sink whose receiver is
//! dropped (client disconnect, store failure) is detached and the
//! remaining sink keeps receiving to end-of-stream.

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::storage::ByteStream;

/// Buffered chunks per sink. Upstream chunks are typically no larger than
/// 64 KiB, so this bounds each buffer to a few MiB.
pub const SINK_BUFFER_CHUNKS: usize = 64;

/// The two reader halves produced by [`tee`].
pub struct TeeHandles {
    /// Byte stream for the client response
    pub client: ByteStream,
    /// Byte stream for cache population
    pub store: ByteStream,
}

fn receiver_stream(mut rx: mpsc::Receiver<std::io::Result<Bytes>>) -> ByteStream {
    Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

fn replicate_error(e: &std::io::Error) -> std::io::Error {
    std::io::Error::new(e.kind(), e.to_string())
}

/// Split `upstream` into two identical byte streams.
///
/// Both sinks observe the same byte sequence and the same end-of-stream.
/// An upstream error is replicated to every still-attached sink and ends
/// the stream.
pub fn tee(mut upstream: ByteStream) -> TeeHandles {
    let (client_tx, client_rx) = mpsc::channel::<std::io::Result<Bytes>>(SINK_BUFFER_CHUNKS);
    let (store_tx, store_rx) = mpsc::channel::<std::io::Result<Bytes>>(SINK_BUFFER_CHUNKS);

    tokio::spawn(async move {
        let mut client_tx = Some(client_tx);
        let mut store_tx = Some(store_tx);

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    if let Some(tx) = client_tx.take() {
                        if tx.send(Ok(chunk.clone())).await.is_ok() {
                            client_tx = Some(tx);
                        } else {
                            tracing::debug!("client sink detached, store continues");
                        }
                    }
                    if let Some(tx) = store_tx.take() {
                        if tx.send(Ok(chunk)).await.is_ok() {
                            store_tx = Some(tx);
                        } else {
                            tracing::debug!("store sink detached, client continues");
                        }
                    }
                    if client_tx.is_none() && store_tx.is_none() {
                        return;
                    }
                }
                Err(e) => {
                    if let Some(tx) = &client_tx {
                        let _ = tx.send(Err(replicate_error(&e))).await;
                    }
                    if let Some(tx) = &store_tx {
                        let _ = tx.send(Err(replicate_error(&e))).await;
                    }
                    return;
                }
            }
        }
        // Dropping the senders closes both sinks at the same EOF.
    });

    TeeHandles {
        client: receiver_stream(client_rx),
        store: receiver_stream(store_rx),
    }
}
