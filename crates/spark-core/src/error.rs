//! The framework's shared error domain.
//!
//! Internal framework operations (open, close, read/write, control options)
//! share one error vocabulary with the client's trust/forwarding flows, so
//! callers don't `match` across several enums. The error type must be
//! `Send + Sync + 'static` to cross the boxed `Future` boundary `async_trait`
//! introduces, and to carry cleanly into a `tracing` event's `%err` field.
//!
//! - Each variant names a semantic category, not a specific syscall errno;
//! - `Io` wraps the underlying `std::io::Error`, keeping its `source()` chain;
//! - certificate variants (`CertNotFound`, etc.) are shared between the TLS filter and the client's TOFU flow.
use thiserror::Error;

/// The framework's shared error enum.
#[derive(Debug, Error)]
pub enum SparkError {
    /// Malformed argument, unknown control-option value, unparseable endpoint address string.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Allocation failure (generally only triggered manually under a
    /// budget/connection-count limit, for backpressure testing).
    #[error("allocation failed")]
    NoMem,

    /// An operation was called from the wrong lifecycle state (e.g. `open`
    /// again while an endpoint is still opening).
    #[error("endpoint busy: {0}")]
    Busy(&'static str),

    /// Underlying syscall / IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `control()` was asked for an unknown option id.
    #[error("control option not supported: {0}")]
    NotSup(&'static str),

    /// In the TOFU flow, neither a by-name nor a by-address pin exists locally.
    #[error("server certificate not pinned yet")]
    CertNotFound,

    /// The presented certificate doesn't match the local pin.
    #[error("server certificate does not match pinned value")]
    CertInvalid,

    /// The certificate has been revoked.
    #[error("server certificate revoked")]
    CertRevoked,

    /// The certificate has expired.
    #[error("server certificate expired")]
    CertExpired,

    /// The peer rejected the authentication request (username/password/client cert).
    #[error("authentication rejected by peer")]
    AuthReject,

    /// The private key file's permissions or ownership fail the checkout rules.
    #[error("private key invalid or insecurely stored: {0}")]
    KeyInvalid(String),

    /// An address or buffer exceeded its storage limit.
    #[error("value too large to store")]
    E2Big,

    /// The peer closed the connection.
    #[error("peer closed the connection")]
    Pipe,
}

impl SparkError {
    /// Lets a caller quickly log whether this was a "retryable" transient failure.
    ///
    /// Only `WouldBlock`/`Interrupted`/`TimedOut` inside `Io` are considered
    /// retryable; every other category (especially certificate and auth
    /// errors) is treated as terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SparkError::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                        | std::io::ErrorKind::TimedOut
                )
        )
    }
}
