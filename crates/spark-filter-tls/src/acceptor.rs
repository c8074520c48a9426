//! Server-role construction. gtlssh itself never terminates TLS as a server,
//! but the filter is otherwise symmetric and the test harness needs a
//! counterpart to handshake against.
use std::sync::Arc;

use rustls::ServerConfig;
use spark_core::Endpoint;

use crate::endpoint::TlsEndpoint;
use crate::ops::TlsAcceptOps;
use crate::verify::AcceptAnyClientCert;

pub type TlsServerEndpoint = TlsEndpoint<TlsAcceptOps>;

pub struct TlsAcceptor;

impl TlsAcceptor {
    /// Wraps `inner` in a TLS server filter using `cert_chain`/`key` (DER) as
    /// the presented identity; client certificates are never required.
    pub fn wrap(
        inner: Arc<dyn Endpoint>,
        cert_chain: Vec<rustls::pki_types::CertificateDer<'static>>,
        key: rustls::pki_types::PrivateKeyDer<'static>,
    ) -> spark_core::Result<Arc<TlsServerEndpoint>> {
        let config = ServerConfig::builder()
            .with_client_cert_verifier(Arc::new(AcceptAnyClientCert::new()))
            .with_single_cert(cert_chain, key)
            .map_err(|e| spark_core::SparkError::Invalid(format!("invalid tls server identity: {e}")))?;
        let ops = TlsAcceptOps::new(inner.clone(), Arc::new(config));
        Ok(TlsEndpoint::new(inner, ops))
    }
}
