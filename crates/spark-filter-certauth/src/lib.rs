#![doc = "spark-filter-certauth: the `certauth(...)` identity handshake filter."]
#![doc = ""]
#![doc = "Wraps an inner endpoint (typically `ssl`) and, on open, exchanges a single"]
#![doc = "username/password frame before surfacing as open to its own user; once the"]
#![doc = "peer has acknowledged it the filter is a transparent pass-through. See"]
#![doc = "`frame.rs` for the one-shot wire format and `client.rs`/`server.rs` for the"]
#![doc = "two roles' handshake logic."]

mod client;
mod factory;
mod frame;
mod server;

pub use client::CertAuthClientEndpoint;
pub use factory::{CertAuthAcceptor, CertAuthFilterFactory};
pub use server::{CertAuthServerEndpoint, ExpectedCredentials};
