//! Connect-side identity handshake: sends a username (and, if asked for and
//! supplied, a password) once the inner endpoint is open, and only
//! surfaces as `Open` to its own user once the peer has acknowledged it.
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::BytesMut;
use spark_core::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use spark_core::{Endpoint, EndpointEvent, EventSink, OpenState, SparkError};
use tokio::sync::oneshot;
use tracing::warn;

use crate::frame::{self, AuthFrame};

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

pub struct CertAuthClientEndpoint {
    inner: Arc<dyn Endpoint>,
    username: String,
    preloaded_password: Option<String>,
    enable_password: bool,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    state: AtomicU8,
    handshake_done: AtomicBool,
    prologue: Mutex<BytesMut>,
    password_request: Mutex<Option<oneshot::Sender<String>>>,
    auth_result: Mutex<Option<oneshot::Sender<spark_core::Result<()>>>>,
}

impl CertAuthClientEndpoint {
    /// Direct construction for callers that already know the runtime
    /// identity values (username, optionally a preloaded password) rather
    /// than parsing them out of an endpoint string — the same role
    /// `TlsConnector::wrap` plays for the `sni` value the grammar can't
    /// carry dynamically.
    pub fn new(
        inner: Arc<dyn Endpoint>,
        username: String,
        preloaded_password: Option<String>,
        enable_password: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            username,
            preloaded_password,
            enable_password,
            sink: RwLock::new(None),
            state: AtomicU8::new(state_to_u8(OpenState::Closed)),
            handshake_done: AtomicBool::new(false),
            prologue: Mutex::new(BytesMut::new()),
            password_request: Mutex::new(None),
            auth_result: Mutex::new(None),
        })
    }

    /// Answers a `RequestPassword` event raised during `open()`. Calling
    /// this before `open()` has raised the event, or more than once, is a
    /// no-op (the waiting half of the channel is already gone).
    pub fn supply_password(&self, password: String) {
        if let Some(tx) = self.password_request.lock().unwrap().take() {
            let _ = tx.send(password);
        }
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
impl Endpoint for CertAuthClientEndpoint {
    fn endpoint_type(&self) -> &'static str {
        "certauth"
    }

    fn state(&self) -> OpenState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap() = Some(sink);
    }

    async fn open(self: Arc<Self>) -> spark_core::Result<()> {
        if self.state() != OpenState::Closed {
            return Err(SparkError::Busy("certauth open() called while not closed"));
        }
        self.set_state(OpenState::Opening);

        let (auth_tx, auth_rx) = oneshot::channel();
        *self.auth_result.lock().unwrap() = Some(auth_tx);
        self.inner.clone().set_event_sink(Arc::new(InnerSink { endpoint: self.clone() }));

        if let Err(e) = self.inner.clone().open().await {
            self.set_state(OpenState::Closed);
            return Err(e);
        }

        let mut password = self.preloaded_password.clone();
        if self.enable_password && password.is_none() {
            let (pw_tx, pw_rx) = oneshot::channel();
            *self.password_request.lock().unwrap() = Some(pw_tx);
            self.emit(EndpointEvent::RequestPassword { max_len: 256 });
            password = pw_rx.await.ok();
        }

        let frame = frame::encode_request(&self.username, password.as_deref());
        if let Err(e) = self.inner.write(&frame, &[]).await {
            self.set_state(OpenState::Closed);
            return Err(e);
        }

        match auth_rx.await {
            Ok(Ok(())) => {
                self.set_state(OpenState::Open);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(OpenState::Closed);
                Err(e)
            }
            Err(_) => {
                self.set_state(OpenState::Closed);
                Err(SparkError::Pipe)
            }
        }
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
            return Err(SparkError::Busy("certauth write() before handshake completed"));
        }
        self.inner.write(buf, aux).await
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
            ControlDepth::SelfOnly => Err(SparkError::NotSup("certauth exposes no control options of its own")),
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
    endpoint: Arc<CertAuthClientEndpoint>,
}

impl EventSink for InnerSink {
    fn on_event(&self, event: EndpointEvent) {
        let ep = &self.endpoint;
        if ep.handshake_done.load(Ordering::Acquire) {
            ep.emit(event);
            return;
        }
        match event {
            EndpointEvent::Read { aux, .. } if aux.iter().any(|a| a == "eof") => {
                if let Some(tx) = ep.auth_result.lock().unwrap().take() {
                    let _ = tx.send(Err(SparkError::Pipe));
                }
            }
            EndpointEvent::Read { data, .. } => {
                let mut buf = ep.prologue.lock().unwrap();
                buf.extend_from_slice(&data);
                match frame::try_decode(&mut buf) {
                    Ok(Some(AuthFrame::Response { ok })) => {
                        ep.handshake_done.store(true, Ordering::Release);
                        let leftover = buf.split().freeze();
                        drop(buf);
                        if let Some(tx) = ep.auth_result.lock().unwrap().take() {
                            let _ = tx.send(if ok { Ok(()) } else { Err(SparkError::AuthReject) });
                        }
                        if !leftover.is_empty() {
                            ep.emit(EndpointEvent::Read { data: leftover, aux: Vec::new() });
                        }
                    }
                    Ok(Some(AuthFrame::Request { .. })) => {
                        warn!("certauth client received a Request frame from its peer, ignoring");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "malformed certauth handshake frame, dropping"),
                }
            }
            other => ep.emit(other),
        }
    }
}
