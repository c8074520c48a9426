//! Shared post-establishment socket setup: `O_NONBLOCK` + `SO_KEEPALIVE`.
//!
//! Both the connect side and the accept side need the same
//! "nonblocking + keepalive" initialization; pulled into one shared function
//! so the two implementations don't drift.
//!
//! `tokio::net::TcpStream` is already nonblocking on creation, so only
//! `SO_KEEPALIVE` needs setting here; done via `socket2::SockRef` without
//! taking ownership of the descriptor.
use socket2::SockRef;
use tokio::net::TcpStream;

/// Applies the shared socket options to a newly connected or accepted TCP stream.
pub fn apply_connect_socket_setup(stream: &TcpStream) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_keepalive(true)
}
