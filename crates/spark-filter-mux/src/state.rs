//! Shared demultiplexer state: owns the inner transport, the live channel
//! table, and the partial-frame reassembly buffer.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::{Bytes, BytesMut};
use spark_core::{Endpoint, EndpointEvent, EventSink, OpenState};
use tracing::warn;

use crate::channel::MuxChannel;
use crate::frame::{try_decode_frame, FrameType, CONTROL_CHANNEL_ID};

pub(crate) fn state_to_u8(s: OpenState) -> u8 {
    match s {
        OpenState::Closed => 0,
        OpenState::Opening => 1,
        OpenState::Open => 2,
        OpenState::Closing => 3,
    }
}

pub(crate) fn u8_to_state(v: u8) -> OpenState {
    match v {
        0 => OpenState::Closed,
        1 => OpenState::Opening,
        2 => OpenState::Open,
        _ => OpenState::Closing,
    }
}

pub(crate) struct MuxState {
    pub(crate) inner: Arc<dyn Endpoint>,
    pub(crate) channels: Mutex<HashMap<u32, Arc<MuxChannel>>>,
    pub(crate) next_channel_id: AtomicU32,
    pub(crate) sink: RwLock<Option<Arc<dyn EventSink>>>,
    parse_buf: Mutex<BytesMut>,
    pub(crate) open_state: AtomicU8,
}

impl MuxState {
    pub(crate) fn new(inner: Arc<dyn Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            channels: Mutex::new(HashMap::new()),
            next_channel_id: AtomicU32::new(1),
            sink: RwLock::new(None),
            parse_buf: Mutex::new(BytesMut::new()),
            open_state: AtomicU8::new(state_to_u8(OpenState::Closed)),
        })
    }

    pub(crate) fn forget_channel(&self, id: u32) {
        self.channels.lock().unwrap().remove(&id);
    }

    fn emit(&self, event: EndpointEvent) {
        if let Some(sink) = self.sink.read().unwrap().as_ref() {
            sink.on_event(event);
        }
    }

    /// Feeds newly read bytes from the inner endpoint into the frame
    /// reassembly buffer, dispatching every complete frame found.
    pub(crate) fn feed(state: &Arc<MuxState>, data: Bytes) {
        let mut buf = state.parse_buf.lock().unwrap();
        buf.extend_from_slice(&data);
        loop {
            match try_decode_frame(&mut buf) {
                Ok(Some((frame_type, channel_id, payload))) => {
                    MuxState::dispatch_frame(state, frame_type, channel_id, payload);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "malformed mux frame, dropping remaining buffered bytes");
                    buf.clear();
                    break;
                }
            }
        }
    }

    fn dispatch_frame(state: &Arc<MuxState>, frame_type: FrameType, channel_id: u32, payload: Bytes) {
        match frame_type {
            FrameType::Open => {
                let service = String::from_utf8_lossy(&payload).into_owned();
                let channel = MuxChannel::new_open(channel_id, service.clone(), Arc::downgrade(state));
                state.channels.lock().unwrap().insert(channel_id, channel.clone());
                state.emit(EndpointEvent::NewChannel {
                    endpoint: channel as Arc<dyn Endpoint>,
                    service,
                });
            }
            FrameType::Data => {
                let channel = state.channels.lock().unwrap().get(&channel_id).cloned();
                match channel {
                    Some(channel) => channel.deliver_data(payload),
                    None => warn!(channel_id, "DATA frame for unknown mux channel, dropping"),
                }
            }
            FrameType::Close => {
                let channel = state.channels.lock().unwrap().remove(&channel_id);
                if let Some(channel) = channel {
                    channel.deliver_peer_close();
                } else {
                    warn!(channel_id, "CLOSE frame for unknown mux channel, ignoring");
                }
            }
            FrameType::Oob => {
                if channel_id != CONTROL_CHANNEL_ID {
                    warn!(channel_id, "OOB frame addressed to a non-control channel, delivering anyway");
                }
                state.emit(EndpointEvent::Read {
                    data: payload,
                    aux: vec!["oob".into()],
                });
            }
        }
    }
}

/// Bridges the inner endpoint's events into the demultiplexer; events other
/// than `Read` pass straight through to the mux endpoint's own sink.
pub(crate) struct InnerSink {
    pub(crate) state: Arc<MuxState>,
}

impl EventSink for InnerSink {
    fn on_event(&self, event: EndpointEvent) {
        match event {
            EndpointEvent::Read { data, aux } if aux.iter().any(|a| a == "eof") => {
                // The underlying transport closed; there is no per-channel
                // CLOSE frame coming, so make every live channel observe EOF.
                let channels: Vec<Arc<MuxChannel>> =
                    self.state.channels.lock().unwrap().drain().map(|(_, c)| c).collect();
                for channel in channels {
                    channel.deliver_peer_close();
                }
                if let Some(sink) = self.state.sink.read().unwrap().as_ref() {
                    sink.on_event(EndpointEvent::Read { data, aux });
                }
            }
            EndpointEvent::Read { data, .. } => MuxState::feed(&self.state, data),
            other => {
                if let Some(sink) = self.state.sink.read().unwrap().as_ref() {
                    sink.on_event(other);
                }
            }
        }
    }
}
