#![deny(unsafe_code)]
#![doc = "spark-core: the polymorphic, stackable byte-stream endpoint contract."]
#![doc = ""]
#![doc = "Heterogeneous endpoints — TCP sockets, TTYs, pipes, encrypted channels,"]
#![doc = "multiplexed sub-streams, line-oriented protocols — traditionally carry"]
#![doc = "incompatible read/write/close APIs, so every new transport means"]
#![doc = "rewriting the composition logic above it. `spark-core` unifies them"]
#![doc = "behind one object-safe [`Endpoint`] trait so callers can stack a chain"]
#![doc = "like `telnet(...), mux, certauth(...), ssl(...), tcp, host, port`"]
#![doc = "without caring how any one layer is implemented."]
#![doc = ""]
#![doc = "Contract overview:"]
#![doc = "- [`Endpoint`]: the unified open/close/read/write/control contract, see the `endpoint` module;"]
#![doc = "- [`ll::LowerLayerOps`] + [`ll::FdLowerLayer`]: the reusable descriptor-level engine — a"]
#![doc = "  transport only has to supply a small operation vector to get a full nonblocking lifecycle;"]
#![doc = "- [`base::BaseEndpoint`]: wraps an `FdLowerLayer` into an `Endpoint`, the uniform façade"]
#![doc = "  every concrete transport (TCP, etc.) exposes;"]
#![doc = "- [`address::AddressList`]: the immutable, deep-copyable ordered result of address resolution."]

pub mod address;
pub mod base;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod ll;
pub mod waiter;

pub use address::{AddressCursor, AddressList, Protocol, SocketAddrEntry};
pub use base::BaseEndpoint;
pub use control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
pub use endpoint::{
    Endpoint, EndpointEvent, EndpointFactory, EventSink, FilterOpts, OpenDoneCallback, OpenState,
};
pub use error::SparkError;
pub use ll::{FdLowerLayer, LowerLayerOps, OpenOutcome};
pub use waiter::{Waiter, WaiterHandle};

/// The framework's shared `Result` alias, always erroring to [`SparkError`].
pub type Result<T> = core::result::Result<T, SparkError>;
