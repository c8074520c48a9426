//! The `ssl` filter's `Endpoint` façade: wraps an inner endpoint with a
//! [`spark_core::FdLowerLayer`] driven by a TLS role-specific operation
//! vector (see `ops.rs`), the same way `spark-transport-tcp`'s `BaseEndpoint`
//! wraps `TcpConnectOps` — plus the handshake-completion announcement and
//! the `CERT`/`CERT_FINGERPRINT` control surface that a plain transport
//! doesn't need.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use spark_core::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use spark_core::{Endpoint, EndpointEvent, EventSink, FdLowerLayer, LowerLayerOps, OpenState, SparkError};

use crate::ops::PeerCertSource;

fn state_to_u8(s: OpenState) -> u8 {
    match s {
        OpenState::Closed => 0,
        OpenState::Opening => 1,
        OpenState::Open => 2,
        OpenState::Closing => 3,
    }
}

fn u8_to_state(v: u8) -> OpenState {
    match v {
        0 => OpenState::Closed,
        1 => OpenState::Opening,
        2 => OpenState::Open,
        _ => OpenState::Closing,
    }
}

pub struct TlsEndpoint<V: LowerLayerOps + PeerCertSource> {
    ll: FdLowerLayer<V>,
    inner: Arc<dyn Endpoint>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    state: AtomicU8,
}

impl<V: LowerLayerOps + PeerCertSource> TlsEndpoint<V> {
    pub(crate) fn new(inner: Arc<dyn Endpoint>, ops: V) -> Arc<Self> {
        Arc::new(Self {
            ll: FdLowerLayer::new(ops),
            inner,
            sink: RwLock::new(None),
            state: AtomicU8::new(state_to_u8(OpenState::Closed)),
        })
    }

    fn set_state(&self, s: OpenState) {
        self.state.store(state_to_u8(s), Ordering::Release);
    }

    fn emit(&self, event: EndpointEvent) {
        if let Some(sink) = self.sink.read().unwrap().as_ref() {
            sink.on_event(event);
        }
    }
}

#[async_trait]
impl<V: LowerLayerOps + PeerCertSource> Endpoint for TlsEndpoint<V> {
    fn endpoint_type(&self) -> &'static str {
        "ssl"
    }

    fn state(&self) -> OpenState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap() = Some(sink.clone());
        self.ll.set_event_sink(sink);
    }

    async fn open(self: Arc<Self>) -> spark_core::Result<()> {
        if self.state() != OpenState::Closed {
            return Err(SparkError::Busy("ssl open() called while not closed"));
        }
        self.set_state(OpenState::Opening);
        match self.ll.open().await {
            Ok(()) => {
                self.set_state(OpenState::Open);
                self.emit(EndpointEvent::PostCertVerify {
                    err: None,
                    reason: "handshake complete, trust decision deferred upward".into(),
                });
                Ok(())
            }
            Err(e) => {
                self.set_state(OpenState::Closed);
                Err(e)
            }
        }
    }

    async fn close(self: Arc<Self>) -> spark_core::Result<()> {
        if self.state() == OpenState::Closed {
            return Ok(());
        }
        self.set_state(OpenState::Closing);
        self.ll.close().await;
        self.inner.set_event_sink(Arc::new(crate::bridge::NoopSink));
        self.inner.clone().close().await?;
        self.set_state(OpenState::Closed);
        Ok(())
    }

    async fn write(&self, buf: &[u8], aux: &[&str]) -> spark_core::Result<usize> {
        if !aux.is_empty() {
            return Err(SparkError::Invalid(
                "ssl carries no out-of-band channel; unwrap a stacked filter for aux tags".into(),
            ));
        }
        self.ll.write(buf).await
    }

    fn set_read_callback_enable(&self, enable: bool) {
        self.ll.set_read_enable(enable);
    }

    fn set_write_callback_enable(&self, enable: bool) {
        self.ll.set_write_enable(enable);
    }

    async fn control(
        &self,
        depth: ControlDepth,
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        match depth {
            ControlDepth::SelfOnly => self.ll.control(op, option, value).await,
            ControlDepth::Child(0) => self.inner.control(ControlDepth::SelfOnly, op, option, value).await,
            ControlDepth::Child(n) => self.inner.control(ControlDepth::Child(n - 1), op, option, value).await,
            ControlDepth::All => match self.ll.control(op, option, value.clone()).await {
                Err(SparkError::NotSup(_)) => self.inner.control(ControlDepth::All, op, option, value).await,
                other => other,
            },
        }
    }

    fn get_child(&self, depth: u32) -> Option<Arc<dyn Endpoint>> {
        if depth == 0 {
            Some(self.inner.clone())
        } else {
            self.inner.get_child(depth - 1)
        }
    }

    fn raddr_to_str(&self, depth: u32) -> Option<String> {
        if depth == 0 {
            self.inner.raddr_to_str(0)
        } else {
            self.inner.raddr_to_str(depth - 1)
        }
    }
}
