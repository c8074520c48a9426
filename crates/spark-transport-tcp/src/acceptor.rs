//! Accept-side TCP transport: the Rust shape of a reference-counted lifecycle.
//!
//! A listening socket's lifecycle is more involved than a connection
//! endpoint's: each address family gets its own listening fd, the `enable`
//! toggle must be mutually exclusive with `startup`/`shutdown`, and
//! `shutdown` must wait for every listening fd's callback to confirm exit
//! before firing its completion callback, or the refcount can never reach zero.
//!
//! - State machine: `Closed -> (startup) -> Setup∧Enabled -> (set_enable(false)) ->
//!   Setup∧¬Enabled -> (shutdown) -> InShutdown -> Closed`;
//! - `refcount` gets one reference for the "setup" hold during `startup`, released when `shutdown` completes;
//! - flipping the enable toggle and checking `setup` state share the same
//!   `Mutex`, closing the race window between a concurrent `shutdown` and `set_accept_callback_enable`.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spark_core::{AddressList, BaseEndpoint, Endpoint, EndpointEvent, EventSink, FdLowerLayer, SparkError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connector::TcpConnectOps;
use crate::socket_setup::apply_connect_socket_setup;

/// Host/address-based access-check hook, analogous to classic TCP
/// wrappers: returning `Some(reason)` rejects the connection, writing
/// `reason` back to the peer before closing it.
pub trait HostAccessCheck: Send + Sync {
    fn check(&self, peer: SocketAddr) -> Option<String>;
}

struct AllowAll;
impl HostAccessCheck for AllowAll {
    fn check(&self, _peer: SocketAddr) -> Option<String> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AccepterState {
    Closed,
    Setup,
    InShutdown,
}

struct ListenerSlot {
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

struct AccepterInner {
    state: AsyncMutex<AccepterState>,
    enabled: std::sync::atomic::AtomicBool,
    refcount: AtomicUsize,
    listeners: AsyncMutex<Vec<ListenerSlot>>,
    sink: std::sync::RwLock<Option<Arc<dyn EventSink>>>,
    access_check: Arc<dyn HostAccessCheck>,
}

/// TCP listener/accepter: manages a set of listening sockets and delivers
/// `EndpointEvent::NewConnection` on each accepted connection.
pub struct TcpAccepter {
    inner: Arc<AccepterInner>,
}

impl TcpAccepter {
    pub fn new() -> Self {
        Self::with_access_check(Arc::new(AllowAll))
    }

    pub fn with_access_check(access_check: Arc<dyn HostAccessCheck>) -> Self {
        Self {
            inner: Arc::new(AccepterInner {
                state: AsyncMutex::new(AccepterState::Closed),
                enabled: std::sync::atomic::AtomicBool::new(false),
                refcount: AtomicUsize::new(0),
                listeners: AsyncMutex::new(Vec::new()),
                sink: std::sync::RwLock::new(None),
                access_check,
            }),
        }
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write().unwrap() = Some(sink);
    }

    pub fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::Acquire)
    }

    /// Binds one listening socket per resolvable candidate address and starts accepting connections.
    ///
    /// `startup` creates the sockets, flips reactor interest on,
    /// and increments the refcount for the "setup" hold.
    pub async fn startup(&self, addresses: &AddressList) -> spark_core::Result<()> {
        let mut state = self.inner.state.lock().await;
        if *state != AccepterState::Closed {
            return Err(SparkError::Busy("accepter startup() called while not closed"));
        }

        let mut listeners = Vec::new();
        for entry in addresses.iter() {
            let Some(addr) = entry.addr else { continue };
            let listener = TcpListener::bind(addr).await.map_err(SparkError::Io)?;
            let local_addr = listener.local_addr().map_err(SparkError::Io)?;
            info!(%local_addr, "tcp accepter listening");
            listeners.push((listener, local_addr));
        }
        if listeners.is_empty() {
            return Err(SparkError::Invalid(
                "no resolvable addresses to listen on".into(),
            ));
        }

        self.inner.enabled.store(true, Ordering::Release);
        let mut slots = Vec::with_capacity(listeners.len());
        for (listener, local_addr) in listeners {
            let task = self.spawn_accept_loop(listener, local_addr);
            slots.push(ListenerSlot {
                local_addr,
                task: Some(task),
            });
        }
        *self.inner.listeners.lock().await = slots;
        self.inner.refcount.fetch_add(1, Ordering::AcqRel);
        *state = AccepterState::Setup;
        Ok(())
    }

    fn spawn_accept_loop(&self, listener: TcpListener, local_addr: SocketAddr) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        warn!(%local_addr, error = %e, "accept() failed");
                        continue;
                    }
                };
                if !inner.enabled.load(Ordering::Acquire) {
                    // Disabled between the wakeup and the accept() call; drop silently.
                    continue;
                }
                if let Some(reason) = inner.access_check.check(peer) {
                    let mut stream = stream;
                    let _ = stream.write_all(reason.as_bytes()).await;
                    debug!(%peer, %reason, "rejected inbound tcp connection by host access check");
                    continue;
                }
                if let Err(e) = apply_connect_socket_setup(&stream) {
                    warn!(%peer, error = %e, "failed to apply keepalive to accepted connection");
                }
                let ops = TcpConnectOps::new_accepted(peer);
                let ll = FdLowerLayer::new(ops);
                ll.seed(stream).await;
                let endpoint = match BaseEndpoint::from_seeded("tcp", ll).await {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        warn!(%peer, error = %e, "failed to start reader for accepted connection");
                        continue;
                    }
                };
                info!(%peer, "accepted new tcp connection");
                if let Some(sink) = inner.sink.read().unwrap().as_ref() {
                    sink.on_event(EndpointEvent::NewConnection {
                        endpoint: endpoint as Arc<dyn Endpoint>,
                    });
                }
            }
        })
    }

    /// Toggles whether new connections are accepted; the whole flip holds the state lock, avoiding a race with a concurrent `shutdown`.
    pub async fn set_enable(&self, enable: bool) -> spark_core::Result<()> {
        let state = self.inner.state.lock().await;
        if *state != AccepterState::Setup {
            return Err(SparkError::Busy("set_enable() requires a set-up accepter"));
        }
        self.inner.enabled.store(enable, Ordering::Release);
        Ok(())
    }

    /// Stops accepting new connections and releases every listening socket;
    /// equivalent to only considering shutdown complete after
    /// `clear_fd_handlers` + `fd_cleared` for each listening fd.
    pub async fn shutdown(&self) -> spark_core::Result<()> {
        let mut state = self.inner.state.lock().await;
        if *state != AccepterState::Setup {
            return Ok(());
        }
        *state = AccepterState::InShutdown;
        self.inner.enabled.store(false, Ordering::Release);

        let mut slots = self.inner.listeners.lock().await;
        for slot in slots.iter_mut() {
            if let Some(task) = slot.task.take() {
                task.abort();
                let _ = task.await;
            }
        }
        slots.clear();
        drop(slots);

        self.inner.refcount.fetch_sub(1, Ordering::AcqRel);
        *state = AccepterState::Closed;
        Ok(())
    }
}

impl Default for TcpAccepter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpAccepter {
    fn drop(&mut self) {
        // The `free` equivalent: if the caller forgot to shut down
        // explicitly, at least terminate the listening tasks to avoid
        // leaking descriptors (equivalent to a shutdown with a null completion callback).
        let mut slots = match self.inner.listeners.try_lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        for slot in slots.iter_mut() {
            if let Some(task) = slot.task.take() {
                task.abort();
            }
        }
    }
}
