#![deny(unsafe_code)]
#![doc = "spark-transport-tcp: the connect-side and accept-side realizations of the spark-core endpoint contract over TCP."]
#![doc = ""]
#![doc = "The connect side walks an address-list fallback; the accept side runs a reference-counted lifecycle."]

mod connector;
mod socket_setup;

pub mod acceptor;

pub use acceptor::{HostAccessCheck, TcpAccepter};
pub use connector::{TcpConnectOps, TcpConnector, TcpTransportFactory};
pub use socket_setup::apply_connect_socket_setup;

use spark_core::{BaseEndpoint, FdLowerLayer};

/// A TCP endpoint: a [`BaseEndpoint`] wrapping an [`FdLowerLayer`] whose
/// operation vector is [`TcpConnectOps`].
pub type TcpEndpoint = BaseEndpoint<TcpConnectOps>;
pub type TcpLowerLayer = FdLowerLayer<TcpConnectOps>;
