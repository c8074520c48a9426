//! Propagates local terminal resizes to the remote side over the mux
//! control channel. `tokio::signal::unix` plays the role of the classic
//! self-pipe: the signal is delivered as a stream item on the event loop
//! rather than doing any real work inside a signal handler, but the
//! re-entrancy shape is the same — only one OOB send is ever in flight.
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::ioctl_read_bad;
use spark_core::Endpoint;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

use crate::oob;

ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);

fn query_winsize(fd: BorrowedFd<'_>) -> Option<libc::winsize> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    unsafe { tiocgwinsz(fd.as_raw_fd(), &mut ws) }.ok()?;
    Some(ws)
}

struct WinchState {
    sending: AtomicBool,
    pending: AtomicBool,
}

/// Spawns a task that listens for `SIGWINCH` and forwards the new window
/// size as an OOB frame on `mux`, for as long as the returned handle is kept
/// alive (dropping it aborts the task).
pub fn spawn(mux: Arc<dyn Endpoint>) -> tokio::task::JoinHandle<()> {
    let state = Arc::new(WinchState {
        sending: AtomicBool::new(false),
        pending: AtomicBool::new(false),
    });
    tokio::spawn(async move {
        let mut stream = match signal(SignalKind::window_change()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "unable to install SIGWINCH handler");
                return;
            }
        };
        // Send the initial size up front so the remote pty starts correctly
        // sized instead of waiting for the first resize.
        send_current_size(&mux, &state).await;
        while stream.recv().await.is_some() {
            send_current_size(&mux, &state).await;
        }
    })
}

async fn send_current_size(mux: &Arc<dyn Endpoint>, state: &Arc<WinchState>) {
    if state.sending.swap(true, Ordering::AcqRel) {
        state.pending.store(true, Ordering::Release);
        return;
    }
    let stdin = std::io::stdin();
    let Some(ws) = query_winsize(stdin.as_fd()) else {
        state.sending.store(false, Ordering::Release);
        return;
    };
    let frame = oob::encode_winch(ws.ws_row, ws.ws_col, ws.ws_xpixel, ws.ws_ypixel);
    let _ = mux.write(&frame, &["oob"]).await;
    state.sending.store(false, Ordering::Release);
    if state.pending.swap(false, Ordering::Release) {
        Box::pin(send_current_size(mux, state)).await;
    }
}
