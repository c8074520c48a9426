//! Adapts an `Arc<dyn Endpoint>` into a plain `AsyncRead + AsyncWrite` pipe so
//! that `tokio-rustls` can drive the handshake and record layer exactly as it
//! would over a raw `TcpStream` — even though the wrapped endpoint is itself
//! event-driven and may be any stackable substrate (TCP, a mux channel, …).
use std::sync::Arc;

use bytes::Bytes;
use spark_core::{Endpoint, EndpointEvent, EventSink};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

const BRIDGE_BUF: usize = 64 * 1024;

/// The plaintext-shaped side of the bridge, handed to `tokio-rustls`.
///
/// Dropping it (e.g. when `FdLowerLayer::close` drops the `Io` value) closes
/// the duplex pair, which unblocks and terminates the background shuttle task
/// on its own — no explicit cancellation needed.
pub(crate) type BridgeIo = DuplexStream;

pub(crate) fn spawn(inner: Arc<dyn Endpoint>) -> BridgeIo {
    let (plain_side, bridge_side) = tokio::io::duplex(BRIDGE_BUF);
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    inner.clone().set_event_sink(Arc::new(BridgeSink { tx, inner: inner.clone() }));
    tokio::spawn(shuttle(inner, bridge_side, rx));
    plain_side
}

/// Installed on `inner` in place of [`BridgeSink`] at close time, so the last
/// strong reference to the real sink (and its channel sender) is dropped and
/// the shuttle task's `rx.recv()` unblocks with `None`.
pub(crate) struct NoopSink;

impl EventSink for NoopSink {
    fn on_event(&self, _event: EndpointEvent) {}
}

struct BridgeSink {
    tx: mpsc::UnboundedSender<Bytes>,
    inner: Arc<dyn Endpoint>,
}

impl EventSink for BridgeSink {
    fn on_event(&self, event: EndpointEvent) {
        if let EndpointEvent::Read { data, aux } = event {
            if aux.iter().any(|a| a == "eof") {
                let _ = self.tx.send(Bytes::new());
            } else {
                let _ = self.tx.send(data);
                self.inner.set_read_callback_enable(true);
            }
        }
    }
}

/// Drains inbound ciphertext from `inner`'s events into `bridge_side`, and
/// forwards whatever `tokio-rustls` writes into `bridge_side` out to `inner`.
async fn shuttle(
    inner: Arc<dyn Endpoint>,
    bridge_side: DuplexStream,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let (mut read_half, mut write_half) = tokio::io::split(bridge_side);
    let outbound = tokio::spawn(async move {
        let mut buf = [0u8; BRIDGE_BUF];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if inner.write(&buf[..n], &[]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    while let Some(data) = rx.recv().await {
        if data.is_empty() || write_half.write_all(&data).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
    outbound.abort();
}
