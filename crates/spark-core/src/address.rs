//! Address resolution result: an ordered, immutable, deep-copyable sequence of candidates.
//!
//! A connector needs to transparently try the next candidate address
//! (IPv4/IPv6/multi-homed host) on failure; the caller resolves once, and
//! every retry after that walks the same [`AddressList`] from the transport
//! layer. Immutable-plus-deep-copy semantics let one `AddressList` be shared
//! safely across concurrent accept/connect attempts without extra
//! synchronization.
//!
//! - `AddressList::resolve` is the only construction entry point, fulfilling
//!   the "address resolver" external collaborator's role;
//! - [`SocketAddrEntry`] carries both the socket address and a protocol tag
//!   so callers (e.g. an accepter building one listening socket per family) can branch on it;
//! - the sequence is immutable once built; [`AddressList::clone`] performs a deep copy.
use std::fmt;
use std::net::SocketAddr;

use crate::error::SparkError;

/// Transport protocol tag, decides the type/protocol argument passed to `socket()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Sctp,
    Unix,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Sctp => write!(f, "sctp"),
            Protocol::Unix => write!(f, "unix"),
        }
    }
}

/// One candidate address record: a concrete socket address plus a protocol tag.
///
/// Unix domain sockets have no `SocketAddr` representation, so `path` carries
/// those; `addr` and `path` are mutually exclusive, `protocol` decides which to read.
#[derive(Clone, Debug)]
pub struct SocketAddrEntry {
    pub protocol: Protocol,
    pub addr: Option<SocketAddr>,
    pub path: Option<std::path::PathBuf>,
}

impl SocketAddrEntry {
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            protocol: Protocol::Tcp,
            addr: Some(addr),
            path: None,
        }
    }

    pub fn sctp(addr: SocketAddr) -> Self {
        Self {
            protocol: Protocol::Sctp,
            addr: Some(addr),
            path: None,
        }
    }

    pub fn unix(path: std::path::PathBuf) -> Self {
        Self {
            protocol: Protocol::Unix,
            addr: None,
            path: Some(path),
        }
    }
}

impl fmt::Display for SocketAddrEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.addr, &self.path) {
            (Some(a), _) => write!(f, "{},{}", self.protocol, a),
            (_, Some(p)) => write!(f, "unix,{}", p.display()),
            _ => write!(f, "<empty>"),
        }
    }
}

/// An immutable candidate address sequence, shareable via deep copy.
#[derive(Clone, Debug)]
pub struct AddressList {
    entries: std::sync::Arc<Vec<SocketAddrEntry>>,
}

impl AddressList {
    /// Builds directly from known entries (e.g. the accept side wraps a captured peer address in a single-element list).
    pub fn from_entries(entries: Vec<SocketAddrEntry>) -> Self {
        Self {
            entries: std::sync::Arc::new(entries),
        }
    }

    /// Resolves a textual `host:port` address into a candidate address list.
    ///
    /// Uses `tokio::net::lookup_host`, so both DNS names and literal IPs work;
    /// results keep the order the system returns (usually address-family preference order).
    pub async fn resolve(host: &str, port: u16, protocol: Protocol) -> crate::Result<Self> {
        let target = format!("{host}:{port}");
        let resolved = tokio::net::lookup_host(&target)
            .await
            .map_err(SparkError::Io)?;
        let entries: Vec<SocketAddrEntry> = resolved
            .map(|addr| match protocol {
                Protocol::Tcp => SocketAddrEntry::tcp(addr),
                Protocol::Sctp => SocketAddrEntry::sctp(addr),
                Protocol::Unix => unreachable!("unix sockets are not resolved by host:port"),
            })
            .collect();
        if entries.is_empty() {
            return Err(SparkError::Invalid(format!(
                "address {target} resolved to no candidates"
            )));
        }
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SocketAddrEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketAddrEntry> {
        self.entries.iter()
    }
}

/// Cursor: points at the current candidate in an [`AddressList`], used by
/// the connect-side address-fallback algorithm.
///
/// Corresponds to the `curr` field in the TCP endpoint state: `None` means
/// the whole list has been walked (fallback exhausted).
#[derive(Clone, Debug)]
pub struct AddressCursor {
    list: AddressList,
    index: Option<usize>,
}

impl AddressCursor {
    pub fn new(list: AddressList) -> Self {
        let index = if list.is_empty() { None } else { Some(0) };
        Self { list, index }
    }

    pub fn current(&self) -> Option<&SocketAddrEntry> {
        self.index.and_then(|i| self.list.get(i))
    }

    /// Advances to the next candidate address; past the end, becomes `None`.
    pub fn advance(&mut self) {
        self.index = match self.index {
            Some(i) if i + 1 < self.list.len() => Some(i + 1),
            _ => None,
        };
    }

    pub fn exhausted(&self) -> bool {
        self.index.is_none()
    }
}
