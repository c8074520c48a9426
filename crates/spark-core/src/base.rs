//! The uniform polymorphic façade: wraps an [`FdLowerLayer`] into an [`Endpoint`].
//!
//! Leaf transports (TCP, etc.) don't need to reimplement [`Endpoint`]'s
//! open/close/read/write boilerplate — they supply one [`LowerLayerOps`]
//! implementation and wrap it with `BaseEndpoint::new`.
//!
//! - `BaseEndpoint` has no children (`get_child` always `None`) — only
//!   filters hold a child endpoint;
//! - `open`/`close` called from the wrong state return `SparkError::Busy`:
//!   repeated calls are only idempotent from `Closed`.
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use crate::endpoint::{Endpoint, EventSink, OpenState};
use crate::error::SparkError;
use crate::ll::{FdLowerLayer, LowerLayerOps};

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

/// The generic façade for leaf transports: owns one `FdLowerLayer<V>`, has no children.
pub struct BaseEndpoint<V: LowerLayerOps> {
    ll: FdLowerLayer<V>,
    type_tag: &'static str,
    reliable: bool,
    state: AtomicU8,
}

impl<V: LowerLayerOps> BaseEndpoint<V> {
    pub fn new(type_tag: &'static str, ll: FdLowerLayer<V>) -> Arc<Self> {
        Arc::new(Self {
            ll,
            type_tag,
            reliable: true,
            state: AtomicU8::new(state_to_u8(OpenState::Closed)),
        })
    }

    /// Constructed by an accepter once it already owns a ready IO (after accepting a new connection).
    ///
    /// `ll` must already have been seeded via [`FdLowerLayer::seed`]; calling
    /// `ll.open()` here starts the long-lived reader task — since the IO
    /// already exists, `sub_open` is skipped.
    pub async fn from_seeded(type_tag: &'static str, ll: FdLowerLayer<V>) -> crate::Result<Arc<Self>> {
        let endpoint = Self::new(type_tag, ll);
        endpoint.ll.open().await?;
        endpoint
            .state
            .store(state_to_u8(OpenState::Open), Ordering::Release);
        Ok(endpoint)
    }

    pub fn lower_layer(&self) -> &FdLowerLayer<V> {
        &self.ll
    }
}

#[async_trait]
impl<V: LowerLayerOps> Endpoint for BaseEndpoint<V> {
    fn endpoint_type(&self) -> &'static str {
        self.type_tag
    }

    fn reliable(&self) -> bool {
        self.reliable
    }

    fn state(&self) -> OpenState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.ll.set_event_sink(sink);
    }

    async fn open(self: Arc<Self>) -> crate::Result<()> {
        let current = self.state();
        if current != OpenState::Closed {
            return Err(SparkError::Busy("open() called while not closed"));
        }
        self.state
            .store(state_to_u8(OpenState::Opening), Ordering::Release);
        match self.ll.open().await {
            Ok(()) => {
                self.state
                    .store(state_to_u8(OpenState::Open), Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.state
                    .store(state_to_u8(OpenState::Closed), Ordering::Release);
                Err(e)
            }
        }
    }

    async fn close(self: Arc<Self>) -> crate::Result<()> {
        if self.state() == OpenState::Closed {
            return Ok(());
        }
        self.state
            .store(state_to_u8(OpenState::Closing), Ordering::Release);
        self.ll.close().await;
        self.state
            .store(state_to_u8(OpenState::Closed), Ordering::Release);
        Ok(())
    }

    async fn write(&self, buf: &[u8], aux: &[&str]) -> crate::Result<usize> {
        for tag in aux {
            if *tag != "oob" && !self.ll.ops().supports_aux(tag) {
                return Err(SparkError::Invalid(format!("unknown write aux tag {tag}")));
            }
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
    ) -> crate::Result<ControlOption> {
        match depth {
            ControlDepth::SelfOnly | ControlDepth::Child(0) | ControlDepth::All => {
                self.ll.control(op, option, value).await
            }
            ControlDepth::Child(_) => Err(SparkError::Invalid(
                "leaf endpoint has no children to route control() to".into(),
            )),
        }
    }

    fn get_child(&self, _depth: u32) -> Option<Arc<dyn Endpoint>> {
        None
    }

    fn raddr_to_str(&self, depth: u32) -> Option<String> {
        if depth == 0 {
            self.ll.ops().raddr_to_str()
        } else {
            None
        }
    }
}
