//! A one-shot wait primitive, for wrapping callback-style APIs into a
//! blocking/awaitable synchronous variant.
//!
//! `Endpoint::open` is asynchronous: its result arrives via a `done_cb`
//! callback. `open_sync` needs to block the caller until that result is
//! available, without holding the reactor thread. [`Waiter`] is built on
//! `tokio::sync::oneshot` to carry "single event" semantics: a `Waiter` can
//! only be `signal`ed once, and the `wait` caller then gets the result.
//!
//! `Waiter::new` returns a `(Waiter, WaiterHandle)` pair; `WaiterHandle::signal`
//! is for the callback side, `Waiter::wait` for the waiting side. Calling
//! `signal` more than once is safe but only the first call has any effect —
//! the rest are silently dropped, `oneshot`'s native behavior — matching
//! `close`'s idempotence expectation: exactly one completion callback per call.
use tokio::sync::oneshot;

/// The waiting side: blocking variants like `open_sync` suspend here.
pub struct Waiter<T> {
    rx: oneshot::Receiver<T>,
}

/// The signalling side: the async completion callback fires its one-shot event here.
pub struct WaiterHandle<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Waiter<T> {
    /// Creates a matched pair of wait primitives.
    pub fn new() -> (Waiter<T>, WaiterHandle<T>) {
        let (tx, rx) = oneshot::channel();
        (Waiter { rx }, WaiterHandle { tx })
    }

    /// Suspends the current async task until `signal` is called.
    ///
    /// Callers must not hold the reactor thread while waiting, or this
    /// deadlocks — this type can't enforce that at the type level, only document it.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

impl<T> WaiterHandle<T> {
    /// Fires the one-shot event. Only the first call has any effect.
    pub fn signal(self, value: T) {
        // An Err return means the receiver was already dropped (the caller
        // gave up waiting); that's a legal path, nothing to report.
        let _ = self.tx.send(value);
    }
}
