#![deny(unsafe_code)]
#![doc = "spark-filter-tls: the `ssl(CA=…)` filter over the spark-core endpoint contract."]
#![doc = ""]
#![doc = "Drives `rustls` in custom-I/O mode: the inner endpoint may be any stackable"]
#![doc = "substrate (TCP, a mux channel, …), not necessarily a raw socket, so ciphertext"]
#![doc = "is pumped through its write()/read-callback interface via a duplex bridge"]
#![doc = "(see `bridge.rs`) instead of requiring `AsyncRead`/`AsyncWrite` directly."]
#![doc = ""]
#![doc = "Certificate trust is deferred: this filter always accepts what rustls hands"]
#![doc = "it and reports the peer certificate upward via `control(CERT)` /"]
#![doc = "`control(CERT_FINGERPRINT)` plus a `PostCertVerify` event; the TOFU pin"]
#![doc = "comparison happens one layer up, in the client."]

mod acceptor;
mod bridge;
mod connector;
mod endpoint;
mod ops;
mod verify;

pub use acceptor::{TlsAcceptor, TlsServerEndpoint};
pub use connector::{TlsClientEndpoint, TlsConnector, TlsFilterFactory};
pub use endpoint::TlsEndpoint;
pub use ops::{PeerCertSource, TlsAcceptOps, TlsConnectOps};
