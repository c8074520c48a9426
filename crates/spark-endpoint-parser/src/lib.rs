#![doc = "spark-endpoint-parser: endpoint-string grammar and pluggable filter-stack construction."]
#![doc = ""]
#![doc = "Grammar: `filter-chain \",\" transport`, constructed right-to-left."]

mod error;
mod grammar;
mod registry;

pub use error::ParseError;
pub use grammar::{parse_endpoint_string, ParsedEndpoint, ParsedFilter, TransportSpec};
pub use registry::{parse_and_build, FilterFactory, Registry, TransportFactory};
