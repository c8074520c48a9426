//! Shared error type for the parse and stack-construction phases.
use thiserror::Error;

/// Why an endpoint string failed to parse/build: grammar-level error categories plus the construction phase.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),
    #[error("unknown or unsupported transport `{0}`")]
    UnknownTransport(String),
    #[error("malformed option: {0}")]
    MalformedOption(String),
    #[error("endpoint string is missing a terminating transport")]
    MissingTransport,
    #[error(transparent)]
    Endpoint(#[from] spark_core::SparkError),
}
