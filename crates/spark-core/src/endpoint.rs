//! The unifying endpoint contract: every byte-stream endpoint — TCP socket,
//! telnet filter, TLS filter, mux sub-channel — is driven through the same
//! polymorphic surface so filter stacks can be composed as opaque
//! `Arc<dyn Endpoint>` chains.
//!
//! The trait is object-safe on purpose: the endpoint-string parser decides
//! stack depth and filter kinds at runtime, so nothing here can be
//! monomorphized at compile time. `async_trait` stands in for a GAT-based
//! Future for that reason.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use crate::error::SparkError;

/// Endpoint lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Events delivered to the endpoint's user.
#[derive(Debug)]
pub enum EndpointEvent {
    /// Data arrived; `aux` carries sideband tags such as `"oob"`.
    Read { data: Bytes, aux: Vec<String> },
    /// Write readiness returned after being suppressed by backpressure.
    WriteReady,
    /// A new sub-channel arrived (typically from mux); `service` names it.
    NewChannel {
        endpoint: Arc<dyn Endpoint>,
        service: String,
    },
    /// A new inbound connection from an accepter, not yet wrapped in a filter stack.
    NewConnection { endpoint: Arc<dyn Endpoint> },
    /// A filter is asking the user to supply a password; `max_len` bounds the reply.
    RequestPassword { max_len: usize },
    /// Fired once the TLS layer has run its own certificate check; `err`
    /// absent means the library itself accepted the certificate.
    PostCertVerify {
        err: Option<SparkError>,
        reason: String,
    },
    /// Request to send a telnet BREAK signal.
    SendBreak,
}

/// Event receiver. Callers register one implementation via
/// [`Endpoint::set_event_sink`].
///
/// Events on a single endpoint are delivered serially and never
/// re-entrantly; no ordering is guaranteed across endpoints.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: EndpointEvent);
}

/// One-shot completion callback for `open`/`close`, for callers that prefer
/// callback style over `await`.
pub type OpenDoneCallback = Box<dyn FnOnce(Arc<dyn Endpoint>, Option<SparkError>) + Send>;

/// Key/value options bound to a filter/transport at construction time,
/// mirroring the endpoint address grammar's `name(k=v,k=v)` syntax.
#[derive(Clone, Debug, Default)]
pub struct FilterOpts {
    pub values: std::collections::BTreeMap<String, String>,
    pub flags: Vec<String>,
}

impl FilterOpts {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f == name)
    }
}

/// The uniform endpoint contract. Every transport and filter implements it.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Type tag, e.g. `"tcp"`, `"ssl"`, `"mux"`.
    fn endpoint_type(&self) -> &'static str;

    /// Reliability bit: `true` for stream transports. Filters refuse to
    /// stack over an unreliable child.
    fn reliable(&self) -> bool {
        true
    }

    /// Current lifecycle state.
    fn state(&self) -> OpenState;

    /// Registers an event sink, replacing any previous registration.
    fn set_event_sink(&self, sink: Arc<dyn EventSink>);

    /// Begins asynchronous establishment. Legal only from `Closed`;
    /// otherwise returns `Busy`.
    async fn open(self: Arc<Self>) -> crate::Result<()>;

    /// Begins asynchronous teardown; no further events arrive once it completes.
    async fn close(self: Arc<Self>) -> crate::Result<()>;

    /// Nonblocking write, returns the number of bytes actually written.
    /// `EAGAIN`/`EWOULDBLOCK` maps to `Ok(0)`, not an error.
    async fn write(&self, buf: &[u8], aux: &[&str]) -> crate::Result<usize>;

    /// Toggles read-callback interest; idempotent.
    fn set_read_callback_enable(&self, enable: bool);

    /// Toggles write-callback interest; idempotent.
    fn set_write_callback_enable(&self, enable: bool);

    /// Sideband getter/setter, routed to the stack layer named by `depth`.
    async fn control(
        &self,
        depth: ControlDepth,
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> crate::Result<ControlOption>;

    /// Type tag at `depth`; `depth == 0` is this endpoint.
    fn get_type(&self, depth: u32) -> Option<&'static str> {
        if depth == 0 {
            Some(self.endpoint_type())
        } else {
            self.get_child(0).and_then(|c| c.get_type(depth - 1))
        }
    }

    /// Child endpoint at `depth`; leaves (e.g. TCP transports) return `None`.
    fn get_child(&self, depth: u32) -> Option<Arc<dyn Endpoint>>;

    /// Formats the peer address at `depth`; meaningful only while `open` or `closing`.
    fn raddr_to_str(&self, depth: u32) -> Option<String>;
}

/// Builds a new endpoint from an optional inner endpoint plus filter options.
///
/// Transport (leaf) factories always receive `inner = None`; filter
/// factories always receive `Some(inner)`.
pub trait EndpointFactory: Send + Sync {
    fn create(
        &self,
        opts: &FilterOpts,
        inner: Option<Arc<dyn Endpoint>>,
    ) -> crate::Result<Arc<dyn Endpoint>>;
}
