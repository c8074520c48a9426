//! The `mux` filter itself: the top-level `Endpoint` a user opens, whose
//! `open_channel` and `NEW_CHANNEL` events are the two faces of the
//! multiplexing contract.
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use spark_core::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use spark_core::{Endpoint, EventSink, FilterOpts, OpenState, SparkError};
use spark_endpoint_parser::ParseError;

use crate::channel::MuxChannel;
use crate::frame::{encode_frame, FrameType, CONTROL_CHANNEL_ID};
use crate::state::{state_to_u8, u8_to_state, InnerSink, MuxState};

/// A multiplexer filter wrapping an inner byte-stream endpoint.
pub struct MuxEndpoint {
    state: Arc<MuxState>,
}

impl MuxEndpoint {
    pub fn new(inner: Arc<dyn Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            state: MuxState::new(inner),
        })
    }

    /// Initiates a new sub-channel addressed by `service`, optimistically
    /// returning a usable endpoint before the peer has acknowledged it —
    /// port forwarding relies on this: the local side starts shuttling
    /// bytes as soon as the mux `OPEN` frame is sent.
    pub async fn open_channel(&self, service: &str) -> spark_core::Result<Arc<dyn Endpoint>> {
        if self.state() != OpenState::Open {
            return Err(SparkError::Busy("open_channel() before the mux endpoint is open"));
        }
        let id = self.state.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = MuxChannel::new_open(id, service.to_string(), Arc::downgrade(&self.state));
        self.state.channels.lock().unwrap().insert(id, channel.clone());
        let frame = encode_frame(FrameType::Open, id, service.as_bytes());
        if let Err(e) = self.state.inner.write(&frame, &[]).await {
            self.state.channels.lock().unwrap().remove(&id);
            return Err(e);
        }
        Ok(channel as Arc<dyn Endpoint>)
    }

    fn set_state(&self, s: OpenState) {
        self.state.open_state.store(state_to_u8(s), Ordering::Release);
    }
}

#[async_trait]
impl Endpoint for MuxEndpoint {
    fn endpoint_type(&self) -> &'static str {
        "mux"
    }

    fn state(&self) -> OpenState {
        u8_to_state(self.state.open_state.load(Ordering::Acquire))
    }

    fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.state.sink.write().unwrap() = Some(sink);
    }

    async fn open(self: Arc<Self>) -> spark_core::Result<()> {
        if self.state() != OpenState::Closed {
            return Err(SparkError::Busy("mux open() called while not closed"));
        }
        self.set_state(OpenState::Opening);
        self.state.inner.clone().set_event_sink(Arc::new(InnerSink {
            state: self.state.clone(),
        }));
        match self.state.inner.clone().open().await {
            Ok(()) => {
                self.set_state(OpenState::Open);
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
        let channels: Vec<Arc<MuxChannel>> =
            self.state.channels.lock().unwrap().drain().map(|(_, c)| c).collect();
        for channel in channels {
            let _ = channel.close().await;
        }
        self.state.inner.clone().close().await?;
        self.set_state(OpenState::Closed);
        Ok(())
    }

    async fn write(&self, buf: &[u8], aux: &[&str]) -> spark_core::Result<usize> {
        if aux.iter().any(|a| *a == "oob") {
            let frame = encode_frame(FrameType::Oob, CONTROL_CHANNEL_ID, buf);
            self.state.inner.write(&frame, &[]).await?;
            Ok(buf.len())
        } else {
            Err(SparkError::Invalid(
                "write() on the mux endpoint itself requires aux=[\"oob\"]; open a channel for in-band data".into(),
            ))
        }
    }

    fn set_read_callback_enable(&self, enable: bool) {
        self.state.inner.set_read_callback_enable(enable);
    }

    fn set_write_callback_enable(&self, enable: bool) {
        self.state.inner.set_write_callback_enable(enable);
    }

    async fn control(
        &self,
        depth: ControlDepth,
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        match depth {
            ControlDepth::SelfOnly => Err(SparkError::NotSup("mux exposes no control options of its own")),
            ControlDepth::Child(0) => self.state.inner.control(ControlDepth::SelfOnly, op, option, value).await,
            ControlDepth::Child(n) => self.state.inner.control(ControlDepth::Child(n - 1), op, option, value).await,
            ControlDepth::All => self.state.inner.control(ControlDepth::All, op, option, value).await,
        }
    }

    fn get_child(&self, depth: u32) -> Option<Arc<dyn Endpoint>> {
        if depth == 0 {
            Some(self.state.inner.clone())
        } else {
            self.state.inner.get_child(depth - 1)
        }
    }

    fn raddr_to_str(&self, depth: u32) -> Option<String> {
        if depth == 0 {
            self.state.inner.raddr_to_str(0)
        } else {
            self.state.inner.raddr_to_str(depth - 1)
        }
    }
}

/// Registers `mux` with a [`spark_endpoint_parser::Registry`].
pub struct MuxFilterFactory;

impl spark_endpoint_parser::FilterFactory for MuxFilterFactory {
    fn create(&self, _opts: &FilterOpts, inner: Arc<dyn Endpoint>) -> Result<Arc<dyn Endpoint>, ParseError> {
        Ok(MuxEndpoint::new(inner) as Arc<dyn Endpoint>)
    }
}
