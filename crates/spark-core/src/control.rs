//! The `control()` sideband: a getter/setter that reaches across any stack depth.
//!
//! In a filter stack (`telnet,mux,certauth,ssl,tcp`), callers often need to
//! reach a specific layer directly — set `TCP_NODELAY` on the bottom TCP
//! layer, or ask the TLS layer for the peer's certificate fingerprint —
//! without every layer exposing a dedicated method. `control(depth, ...)`
//! unifies that into one call.
//!
//! - `depth == 0` means the endpoint itself; `N` drills N layers into the
//!   child chain; [`ControlDepth::All`] broadcasts to every layer in the
//!   chain (a layer that doesn't recognize the option returns `NotSup` but
//!   doesn't stop the broadcast).
//! - An unknown option id always returns `SparkError::NotSup`.
use std::fmt;

/// Stack depth a control operation should reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlDepth {
    /// The endpoint itself (depth 0).
    SelfOnly,
    /// The Nth child endpoint, drilling down from self.
    Child(u32),
    /// Broadcast to the whole chain.
    All,
}

/// The set of recognized control options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlOptionId {
    /// `TCP_NODELAY` toggle, value is `"0"`/`"1"`.
    NoDelay,
    /// Fetches the peer certificate (DER/PEM, encoding is implementation-defined).
    Cert,
    /// Fetches the peer certificate fingerprint (hex sha256).
    CertFingerprint,
    /// Gets/sets the mux service string associated with the current connection.
    Service,
}

impl fmt::Display for ControlOptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlOptionId::NoDelay => "NODELAY",
            ControlOptionId::Cert => "CERT",
            ControlOptionId::CertFingerprint => "CERT_FINGERPRINT",
            ControlOptionId::Service => "SERVICE",
        };
        f.write_str(s)
    }
}

/// Direction of one `control()` call: read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlOp {
    Get,
    Set,
}

/// The value payload carried by `control()`; its meaning is decided by [`ControlOptionId`].
#[derive(Clone, Debug, Default)]
pub struct ControlOption {
    pub value: Vec<u8>,
}

impl ControlOption {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            value: s.into().into_bytes(),
        }
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}
