//! Client-level error domain: wraps [`spark_core::SparkError`] and the
//! endpoint-string/address-grammar parse errors with the setup-time
//! failures that only make sense at this layer (credential discovery,
//! TOFU refusal, CLI/address parsing).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Spark(#[from] spark_core::SparkError),

    #[error(transparent)]
    Parse(#[from] spark_endpoint_parser::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),

    #[error("server certificate verification refused: {0}")]
    Tofu(String),

    #[error("{path}: private key must be mode 0600 and owned by the current user")]
    KeyPermissions { path: std::path::PathBuf },

    #[error("no usable credentials found under {0}")]
    NoCredentials(std::path::PathBuf),

    #[error("malformed port-forward address `{0}`")]
    BadForwardAddress(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
