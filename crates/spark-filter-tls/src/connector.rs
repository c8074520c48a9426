//! Client-role construction: `ssl(...)` wrapping an inner transport, plus the
//! `spark-endpoint-parser` registration so `ssl` can appear in an endpoint
//! string as the `ssl(CA=…)` filter.
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use spark_core::{Endpoint, FilterOpts};
use spark_endpoint_parser::{FilterFactory, ParseError};

use crate::endpoint::TlsEndpoint;
use crate::ops::TlsConnectOps;
use crate::verify::AcceptAnyServerCert;

pub type TlsClientEndpoint = TlsEndpoint<TlsConnectOps>;

/// Builds the `rustls::ClientConfig` shared by every `ssl` filter instance;
/// TOFU means there is exactly one meaningful client configuration (accept
/// anything, let the layer above judge), so this is cheap to share.
fn client_config() -> Arc<ClientConfig> {
    Arc::new(
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
            .with_no_client_auth(),
    )
}

pub struct TlsConnector;

impl TlsConnector {
    /// Wraps `inner` in a TLS client filter that will present `server_name`
    /// as SNI once opened.
    pub fn wrap(inner: Arc<dyn Endpoint>, server_name: ServerName<'static>) -> Arc<TlsClientEndpoint> {
        let ops = TlsConnectOps::new(inner.clone(), server_name, client_config());
        TlsEndpoint::new(inner, ops)
    }
}

/// Registers `ssl` with a [`spark_endpoint_parser::Registry`].
///
/// The endpoint-string grammar only names `ssl(CA=…)`; since
/// filter factories never see the transport's host, the SNI name must be
/// supplied explicitly as `ssl(sni=<name>)` by whoever builds the string
/// (gtlssh constructs its endpoint strings programmatically, so this is
/// just an extra key it always fills in). `CA=` is accepted and ignored:
/// trust is TOFU, decided above this filter, not by a CA bundle.
pub struct TlsFilterFactory;

impl FilterFactory for TlsFilterFactory {
    fn create(&self, opts: &FilterOpts, inner: Arc<dyn Endpoint>) -> Result<Arc<dyn Endpoint>, ParseError> {
        let name = opts
            .get("sni")
            .ok_or_else(|| ParseError::MalformedOption("ssl filter requires sni=<name>".into()))?;
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| ParseError::MalformedOption(format!("invalid SNI name `{name}`")))?;
        Ok(TlsConnector::wrap(inner, server_name) as Arc<dyn Endpoint>)
    }
}
