//! FD-backed lower layer: a reusable open/read/write/close lifecycle driver.
//!
//! Every leaf transport (TCP, and in the future SCTP/Unix) would otherwise
//! reimplement the same lifecycle: register write-readiness on open,
//! callback on read, and make sure the callback has fully quiesced before
//! the descriptor is actually released on close. `FdLowerLayer` builds that
//! engine once; a transport only supplies a small [`LowerLayerOps`]
//! operation vector.
//!
//! This workspace uses `tokio` as the external OS reactor, so "register
//! read/write readiness" takes the shape of a long-lived reader task plus a
//! `Notify` rather than manual `epoll` registration; the coroutine-style
//! flow is semantically equivalent to the callback contract, just expressed
//! with a different way of yielding control.
//!
//! - `sub_open` establishes the underlying IO resource; address-list
//!   fallback and retry logic live entirely inside the concrete
//!   `LowerLayerOps` implementation.
//! - Read path: reads only while `read_enabled`; zero bytes read is treated
//!   as a clean peer close (mapped to [`SparkError::Pipe`]); data is
//!   delivered via [`EventSink::on_event`] as a `Read` event, then reads are
//!   **immediately suspended** until the user re-enables them (backpressure).
//! - Write path: forwarded directly to IO; `WouldBlock` maps to `Ok(0)`,
//!   `Interrupted` retries automatically, and a successful zero-byte write maps to `SparkError::Pipe`.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::control::{ControlOp, ControlOption, ControlOptionId};
use crate::endpoint::{EndpointEvent, EventSink};
use crate::error::SparkError;

/// Result of an open attempt. Keeps the "completed synchronously / still in
/// progress" distinction to match the asynchronous connect's two-phase
/// model, even though on `tokio` this is usually absorbed by `await`.
#[derive(Debug)]
pub enum OpenOutcome {
    Ready,
    InProgress,
}

/// The operation vector a transport supplies to [`FdLowerLayer`].
#[async_trait]
pub trait LowerLayerOps: Send + Sync + 'static {
    /// The underlying IO resource type (`tokio::net::TcpStream`, etc.).
    type Io: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static;

    /// Establishes (or receives an already-open) IO resource. Address-list
    /// fallback and retries happen entirely inside this method.
    async fn sub_open(&self) -> crate::Result<Self::Io>;

    /// Handles an except-ready event (TCP's `MSG_OOB`, etc.); no OOB support by default.
    async fn except_read(&self, _io: &mut Self::Io) -> crate::Result<Option<Bytes>> {
        Ok(None)
    }

    /// Whether this transport recognizes a given `write()` `aux` tag (e.g. `"oob"`).
    fn supports_aux(&self, _tag: &str) -> bool {
        false
    }

    /// Transport-specific `control()` handling; returns `NotSup` for every option by default.
    ///
    /// `io` is the currently open underlying resource (`None` if the
    /// endpoint isn't open yet), for implementations that need to touch
    /// socket options directly (e.g. `TCP_NODELAY`).
    async fn control(
        &self,
        _io: Option<&Self::Io>,
        _op: ControlOp,
        option: ControlOptionId,
        _value: ControlOption,
    ) -> crate::Result<ControlOption> {
        Err(SparkError::NotSup(match option {
            ControlOptionId::NoDelay => "NODELAY",
            ControlOptionId::Cert => "CERT",
            ControlOptionId::CertFingerprint => "CERT_FINGERPRINT",
            ControlOptionId::Service => "SERVICE",
        }))
    }

    /// Human-readable form of the captured peer address; leaf transports
    /// should return `Some` once open/accept has succeeded.
    fn raddr_to_str(&self) -> Option<String> {
        None
    }
}

struct LowerLayerState<V: LowerLayerOps> {
    ops: V,
    io: Mutex<Option<V::Io>>,
    read_enabled: AtomicBool,
    write_enabled: AtomicBool,
    readbuf: usize,
    sink: std::sync::RwLock<Option<Arc<dyn EventSink>>>,
    resume_reads: Notify,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Descriptor-level engine: owns one underlying IO resource, drives
/// nonblocking read/write and its lifecycle.
pub struct FdLowerLayer<V: LowerLayerOps> {
    state: Arc<LowerLayerState<V>>,
}

impl<V: LowerLayerOps> Clone for FdLowerLayer<V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<V: LowerLayerOps> FdLowerLayer<V> {
    /// Default read buffer size (may be overridden via `EndpointOptions` in the future).
    pub const DEFAULT_READBUF: usize = 64 * 1024;

    pub fn new(ops: V) -> Self {
        Self::with_readbuf(ops, Self::DEFAULT_READBUF)
    }

    pub fn with_readbuf(ops: V, readbuf: usize) -> Self {
        Self {
            state: Arc::new(LowerLayerState {
                ops,
                io: Mutex::new(None),
                read_enabled: AtomicBool::new(true),
                write_enabled: AtomicBool::new(true),
                readbuf,
                sink: std::sync::RwLock::new(None),
                resume_reads: Notify::new(),
                reader_task: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Accepts an already-open IO resource (accept-side: the listening fd
    /// has already `accept()`ed a new connection).
    pub async fn seed(&self, io: V::Io) {
        *self.state.io.lock().await = Some(io);
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.state.sink.write().unwrap() = Some(sink);
    }

    #[allow(dead_code)]
    fn emit(&self, event: EndpointEvent) {
        if let Some(sink) = self.state.sink.read().unwrap().as_ref() {
            sink.on_event(event);
        }
    }

    /// Opens the underlying IO (unless already provided via `seed`), starts the reader task.
    pub async fn open(&self) -> crate::Result<()> {
        {
            let mut guard = self.state.io.lock().await;
            if guard.is_none() {
                let io = self.state.ops.sub_open().await?;
                *guard = Some(io);
            }
        }
        self.spawn_reader();
        Ok(())
    }

    fn spawn_reader(&self) {
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            loop {
                if !state.read_enabled.load(Ordering::Acquire) {
                    state.resume_reads.notified().await;
                    continue;
                }
                let mut buf = BytesMut::with_capacity(state.readbuf);
                buf.resize(state.readbuf, 0);
                let n = {
                    let mut guard = state.io.lock().await;
                    match guard.as_mut() {
                        Some(io) => io.read(&mut buf).await,
                        None => return,
                    }
                };
                match n {
                    Ok(0) => {
                        tracing::debug!("lower layer observed EOF, delivering Pipe and stopping reader");
                        if let Some(sink) = state.sink.read().unwrap().as_ref() {
                            sink.on_event(EndpointEvent::Read {
                                data: Bytes::new(),
                                aux: vec!["eof".into()],
                            });
                        }
                        return;
                    }
                    Ok(n) => {
                        buf.truncate(n);
                        // Backpressure: suspend reads after one delivery until the user re-enables them.
                        state.read_enabled.store(false, Ordering::Release);
                        if let Some(sink) = state.sink.read().unwrap().as_ref() {
                            sink.on_event(EndpointEvent::Read {
                                data: buf.freeze(),
                                aux: Vec::new(),
                            });
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "lower layer read failed, stopping reader");
                        return;
                    }
                }
            }
        });
        // Keep the join handle so close() can await quiescence (fd_cleared).
        *self.state.reader_task.lock().unwrap() = Some(handle);
    }

    /// Nonblocking write; `WouldBlock` maps to `Ok(0)`, a sustained zero-byte success maps to `Pipe`.
    pub async fn write(&self, buf: &[u8]) -> crate::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = self.state.io.lock().await;
        let io = guard.as_mut().ok_or(SparkError::Busy("not open"))?;
        loop {
            match io.write(buf).await {
                Ok(0) => return Err(SparkError::Pipe),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Err(SparkError::Pipe),
                Err(e) => return Err(SparkError::Io(e)),
            }
        }
    }

    pub fn set_read_enable(&self, enable: bool) {
        self.state.read_enabled.store(enable, Ordering::Release);
        if enable {
            self.state.resume_reads.notify_one();
        }
    }

    pub fn set_write_enable(&self, enable: bool) {
        self.state.write_enabled.store(enable, Ordering::Release);
    }

    /// Closes: terminates the long-lived reader task (the `fd_cleared` equivalent), then drops the IO.
    pub async fn close(&self) {
        let handle = self.state.reader_task.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        *self.state.io.lock().await = None;
    }

    pub fn ops(&self) -> &V {
        &self.state.ops
    }

    /// Sideband control: holds the IO lock so implementations can touch socket options directly.
    pub async fn control(
        &self,
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> crate::Result<ControlOption> {
        let guard = self.state.io.lock().await;
        self.state.ops.control(guard.as_ref(), op, option, value).await
    }

    pub async fn with_io<R>(&self, f: impl FnOnce(Option<&mut V::Io>) -> R) -> R {
        let mut guard = self.state.io.lock().await;
        f(guard.as_mut())
    }
}
