//! `spark-endpoint-parser` registration and the server-role construction
//! helper used by this crate's own tests.
use std::sync::Arc;

use spark_core::{Endpoint, FilterOpts};
use spark_endpoint_parser::{FilterFactory, ParseError};

use crate::client::CertAuthClientEndpoint;
use crate::server::{CertAuthServerEndpoint, ExpectedCredentials};

/// Registers `certauth` with a [`spark_endpoint_parser::Registry`].
///
/// Grammar: `certauth(enable-password,username=…,cert=…,key=…)`.
/// `cert=`/`key=` name the client's own TLS identity, which is presented by
/// the `ssl` filter it wraps rather than by this filter itself — accepted
/// here and ignored, the same way `ssl(CA=…)`'s `CA=` is accepted and
/// ignored by [`spark_filter_tls`]'s factory (trust is decided elsewhere).
/// A password, if required, is never read from the endpoint string; it is
/// always solicited interactively via `RequestPassword`.
pub struct CertAuthFilterFactory;

impl FilterFactory for CertAuthFilterFactory {
    fn create(&self, opts: &FilterOpts, inner: Arc<dyn Endpoint>) -> Result<Arc<dyn Endpoint>, ParseError> {
        let username = opts
            .get("username")
            .ok_or_else(|| ParseError::MalformedOption("certauth filter requires username=<name>".into()))?
            .to_string();
        let enable_password = opts.flag("enable-password");
        Ok(CertAuthClientEndpoint::new(inner, username, None, enable_password) as Arc<dyn Endpoint>)
    }
}

/// Constructs the accept-side counterpart directly (no endpoint-string
/// grammar covers it, since gtlssh never runs this role).
pub struct CertAuthAcceptor;

impl CertAuthAcceptor {
    pub fn wrap(inner: Arc<dyn Endpoint>, expected: ExpectedCredentials) -> Arc<CertAuthServerEndpoint> {
        CertAuthServerEndpoint::new(inner, expected)
    }
}
