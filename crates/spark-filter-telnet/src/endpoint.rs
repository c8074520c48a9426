//! The `telnet(rfc2217)` filter endpoint: wraps an inner endpoint and speaks
//! just enough telnet to carry RFC 2217 COM-PORT-OPTION line control over
//! it — IAC byte-stuffing of in-band data, WILL/DO negotiation of the
//! option, and BREAK signalling in both directions.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::BytesMut;
use spark_core::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use spark_core::{Endpoint, EndpointEvent, EventSink, OpenState, SparkError};
use tracing::debug;

use crate::frame::{self, TelnetEvent, COM_PORT_OPTION};

// RFC 2217 COM-PORT-OPTION subcommand and SET-CONTROL value codes.
const SET_CONTROL: u8 = 5;
const SET_CONTROL_BREAK_ON: u8 = 5;
const SET_CONTROL_BREAK_OFF: u8 = 6;

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

pub struct TelnetEndpoint {
    inner: Arc<dyn Endpoint>,
    rfc2217: bool,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    state: AtomicU8,
    prologue: Mutex<BytesMut>,
}

impl TelnetEndpoint {
    pub fn new(inner: Arc<dyn Endpoint>, rfc2217: bool) -> Arc<Self> {
        Arc::new(Self {
            inner,
            rfc2217,
            sink: RwLock::new(None),
            state: AtomicU8::new(state_to_u8(OpenState::Closed)),
            prologue: Mutex::new(BytesMut::new()),
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

    /// Asks the peer to assert a BREAK condition, the outbound counterpart
    /// of a received `EndpointEvent::SendBreak`. Fires a BREAK-ON
    /// subnegotiation immediately followed by BREAK-OFF, since nothing
    /// above this filter models a held break duration.
    pub fn send_break(self: &Arc<Self>) {
        let ep = self.clone();
        tokio::spawn(async move {
            let on = frame::encode_subneg(COM_PORT_OPTION, &[SET_CONTROL, SET_CONTROL_BREAK_ON]);
            let off = frame::encode_subneg(COM_PORT_OPTION, &[SET_CONTROL, SET_CONTROL_BREAK_OFF]);
            if ep.inner.write(&on, &[]).await.is_ok() {
                let _ = ep.inner.write(&off, &[]).await;
            }
        });
    }
}

#[async_trait]
impl Endpoint for TelnetEndpoint {
    fn endpoint_type(&self) -> &'static str {
        "telnet"
    }

    fn state(&self) -> OpenState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap() = Some(sink);
    }

    async fn open(self: Arc<Self>) -> spark_core::Result<()> {
        if self.state() != OpenState::Closed {
            return Err(SparkError::Busy("telnet open() called while not closed"));
        }
        self.set_state(OpenState::Opening);
        self.inner.clone().set_event_sink(Arc::new(InnerSink { endpoint: self.clone() }));
        if let Err(e) = self.inner.clone().open().await {
            self.set_state(OpenState::Closed);
            return Err(e);
        }
        self.set_state(OpenState::Open);
        if self.rfc2217 {
            let negotiation = frame::encode_negotiation(frame::WILL, COM_PORT_OPTION);
            let _ = self.inner.write(&negotiation, &[]).await;
        }
        Ok(())
    }

    async fn close(self: Arc<Self>) -> spark_core::Result<()> {
        if self.state() == OpenState::Closed {
            return Ok(());
        }
        self.set_state(OpenState::Closing);
        self.inner.clone().close().await?;
        self.set_state(OpenState::Closed);
        Ok(())
    }

    async fn write(&self, buf: &[u8], aux: &[&str]) -> spark_core::Result<usize> {
        if self.state() != OpenState::Open {
            return Err(SparkError::Busy("telnet write() before open"));
        }
        let escaped = frame::escape_data(buf);
        self.inner.write(&escaped, aux).await?;
        Ok(buf.len())
    }

    fn set_read_callback_enable(&self, enable: bool) {
        self.inner.set_read_callback_enable(enable);
    }

    fn set_write_callback_enable(&self, enable: bool) {
        self.inner.set_write_callback_enable(enable);
    }

    async fn control(
        &self,
        depth: ControlDepth,
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        match depth {
            ControlDepth::SelfOnly => Err(SparkError::NotSup("telnet exposes no control options of its own")),
            ControlDepth::Child(0) => self.inner.control(ControlDepth::SelfOnly, op, option, value).await,
            ControlDepth::Child(n) => self.inner.control(ControlDepth::Child(n - 1), op, option, value).await,
            ControlDepth::All => self.inner.control(ControlDepth::All, op, option, value).await,
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

struct InnerSink {
    endpoint: Arc<TelnetEndpoint>,
}

impl InnerSink {
    fn reply(&self, cmd: u8, option: u8) {
        let ep = self.endpoint.clone();
        tokio::spawn(async move {
            let frame = frame::encode_negotiation(cmd, option);
            let _ = ep.inner.write(&frame, &[]).await;
        });
    }
}

impl EventSink for InnerSink {
    fn on_event(&self, event: EndpointEvent) {
        let ep = &self.endpoint;
        match event {
            EndpointEvent::Read { data, aux } => {
                let mut buf = ep.prologue.lock().unwrap();
                buf.extend_from_slice(&data);
                let events = frame::scan(&mut buf);
                drop(buf);
                for telnet_event in events {
                    match telnet_event {
                        TelnetEvent::Data(bytes) => {
                            if !bytes.is_empty() {
                                ep.emit(EndpointEvent::Read { data: bytes, aux: aux.clone() });
                            }
                        }
                        TelnetEvent::Will(opt) if opt == COM_PORT_OPTION => self.reply(frame::DO, opt),
                        TelnetEvent::Will(opt) => self.reply(frame::DONT, opt),
                        TelnetEvent::Do(opt) if opt == COM_PORT_OPTION => self.reply(frame::WILL, opt),
                        TelnetEvent::Do(opt) => self.reply(frame::WONT, opt),
                        TelnetEvent::Wont(_) | TelnetEvent::Dont(_) => {}
                        TelnetEvent::Subneg(opt, payload) if opt == COM_PORT_OPTION => {
                            if payload.len() == 2 && payload[0] == SET_CONTROL && payload[1] == SET_CONTROL_BREAK_ON {
                                ep.emit(EndpointEvent::SendBreak);
                            } else {
                                // TODO: SET-BAUDRATE/SET-PARITY/SET-DATASIZE and the other
                                // COM-PORT-OPTION subcommands besides SET-CONTROL/BREAK are not
                                // implemented; gtlssh never negotiates serial line parameters.
                                debug!(?payload, "unhandled COM-PORT-OPTION subnegotiation");
                            }
                        }
                        TelnetEvent::Subneg(opt, _) => {
                            debug!(option = opt, "subnegotiation for an option this filter does not speak");
                        }
                    }
                }
            }
            other => ep.emit(other),
        }
    }
}
