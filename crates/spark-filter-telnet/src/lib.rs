#![doc = "spark-filter-telnet: the `telnet(rfc2217)` filter."]
#![doc = ""]
#![doc = "Wraps an inner endpoint and speaks just enough telnet to carry RFC 2217"]
#![doc = "COM-PORT-OPTION line control over it: IAC byte-stuffing of in-band data,"]
#![doc = "WILL/DO negotiation of the option, and BREAK subnegotiation in both"]
#![doc = "directions. See `frame.rs` for the wire-level scanner and `endpoint.rs`"]
#![doc = "for the filter itself."]

mod endpoint;
mod factory;
mod frame;

pub use endpoint::TelnetEndpoint;
pub use factory::TelnetFilterFactory;
