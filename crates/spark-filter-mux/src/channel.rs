//! A single demultiplexed sub-channel: an `Endpoint` in its own right,
//! surfaced to the user via `NEW_CHANNEL(sub_endpoint, service)`.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use spark_core::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use spark_core::{Endpoint, EndpointEvent, EventSink, OpenState, SparkError};

use crate::frame::{encode_frame, FrameType};
use crate::state::MuxState;

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

/// One multiplexed sub-channel. Always constructed already `Open` — both
/// the initiating side (optimistic open on `open_channel`) and the
/// receiving side (the peer already committed to it by sending `OPEN`)
/// know the channel exists before any `Endpoint::open` call could occur.
pub struct MuxChannel {
    pub(crate) id: u32,
    pub(crate) service: String,
    pub(crate) mux: Weak<MuxState>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    state: AtomicU8,
    read_enabled: AtomicBool,
    pending: Mutex<VecDeque<Bytes>>,
}

impl MuxChannel {
    pub(crate) fn new_open(id: u32, service: String, mux: Weak<MuxState>) -> Arc<Self> {
        Arc::new(Self {
            id,
            service,
            mux,
            sink: RwLock::new(None),
            state: AtomicU8::new(state_to_u8(OpenState::Open)),
            read_enabled: AtomicBool::new(true),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn channel_id(&self) -> u32 {
        self.id
    }

    /// Called by the demultiplexer when a `DATA` frame for this channel
    /// arrives. One-shot-then-disable backpressure, mirroring
    /// `FdLowerLayer`'s read path.
    pub(crate) fn deliver_data(&self, payload: Bytes) {
        if self.read_enabled.swap(false, Ordering::AcqRel) {
            if let Some(sink) = self.sink.read().unwrap().as_ref() {
                sink.on_event(EndpointEvent::Read {
                    data: payload,
                    aux: Vec::new(),
                });
            }
        } else {
            self.pending.lock().unwrap().push_back(payload);
        }
    }

    /// Called by the demultiplexer when a `CLOSE` frame for this channel
    /// arrives (peer-initiated close).
    pub(crate) fn deliver_peer_close(&self) {
        self.state
            .store(state_to_u8(OpenState::Closed), Ordering::Release);
        if let Some(sink) = self.sink.read().unwrap().as_ref() {
            sink.on_event(EndpointEvent::Read {
                data: Bytes::new(),
                aux: vec!["eof".into()],
            });
        }
    }
}

#[async_trait]
impl Endpoint for MuxChannel {
    fn endpoint_type(&self) -> &'static str {
        "mux-channel"
    }

    fn state(&self) -> OpenState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap() = Some(sink);
    }

    async fn open(self: Arc<Self>) -> spark_core::Result<()> {
        // Channels surface already-open; a second `open()` is meaningless.
        if self.state() != OpenState::Open {
            return Err(SparkError::Busy("mux channel is not in the open state"));
        }
        Ok(())
    }

    async fn close(self: Arc<Self>) -> spark_core::Result<()> {
        if self.state() == OpenState::Closed {
            return Ok(());
        }
        self.state
            .store(state_to_u8(OpenState::Closed), Ordering::Release);
        if let Some(mux) = self.mux.upgrade() {
            mux.forget_channel(self.id);
            let frame = encode_frame(FrameType::Close, self.id, &[]);
            let _ = mux.inner.write(&frame, &[]).await;
        }
        Ok(())
    }

    async fn write(&self, buf: &[u8], aux: &[&str]) -> spark_core::Result<usize> {
        if !aux.is_empty() {
            return Err(SparkError::NotSup("mux channel does not support aux tags"));
        }
        if self.state() != OpenState::Open {
            return Err(SparkError::Busy("write() on a closed mux channel"));
        }
        let mux = self.mux.upgrade().ok_or(SparkError::Pipe)?;
        let frame = encode_frame(FrameType::Data, self.id, buf);
        mux.inner.write(&frame, &[]).await?;
        Ok(buf.len())
    }

    fn set_read_callback_enable(&self, enable: bool) {
        self.read_enabled.store(enable, Ordering::Release);
        if enable {
            let next = self.pending.lock().unwrap().pop_front();
            if let Some(data) = next {
                self.read_enabled.store(false, Ordering::Release);
                if let Some(sink) = self.sink.read().unwrap().as_ref() {
                    sink.on_event(EndpointEvent::Read { data, aux: Vec::new() });
                }
            }
        }
    }

    fn set_write_callback_enable(&self, _enable: bool) {
        // Channel writes are forwarded synchronously through the parent
        // mux endpoint's own write path; there is no per-channel
        // write-ready signal to gate.
    }

    async fn control(
        &self,
        _depth: ControlDepth,
        _op: ControlOp,
        option: ControlOptionId,
        _value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        Err(SparkError::NotSup(match option {
            ControlOptionId::NoDelay => "NODELAY",
            ControlOptionId::Cert => "CERT",
            ControlOptionId::CertFingerprint => "CERT_FINGERPRINT",
            ControlOptionId::Service => "SERVICE",
        }))
    }

    fn get_child(&self, _depth: u32) -> Option<Arc<dyn Endpoint>> {
        None
    }

    fn raddr_to_str(&self, _depth: u32) -> Option<String> {
        self.mux.upgrade().and_then(|m| m.inner.raddr_to_str(0))
    }
}
