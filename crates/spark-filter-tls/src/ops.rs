//! The two operation vectors plugged into [`spark_core::FdLowerLayer`]: one
//! per TLS role. Both drive the handshake inside `sub_open` over the duplex
//! bridge from [`crate::bridge`], exactly the way `spark-transport-tcp`'s
//! `TcpConnectOps::sub_open` drives the address-list connect loop.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use spark_core::control::{ControlOp, ControlOption, ControlOptionId};
use spark_core::{Endpoint, SparkError};
use tokio_rustls::{client, server, TlsAcceptor as RustlsAcceptor, TlsConnector as RustlsConnector};

use crate::bridge;

/// Gives [`crate::endpoint::TlsEndpoint`] a uniform way to read back the
/// peer's leaf certificate regardless of which role produced it.
pub trait PeerCertSource {
    fn peer_certificate_der(&self) -> Option<Vec<u8>>;
}

pub struct TlsConnectOps {
    inner: Arc<dyn Endpoint>,
    server_name: ServerName<'static>,
    config: Arc<ClientConfig>,
    peer_cert: Mutex<Option<Vec<u8>>>,
}

impl TlsConnectOps {
    pub(crate) fn new(inner: Arc<dyn Endpoint>, server_name: ServerName<'static>, config: Arc<ClientConfig>) -> Self {
        Self {
            inner,
            server_name,
            config,
            peer_cert: Mutex::new(None),
        }
    }
}

#[async_trait]
impl spark_core::LowerLayerOps for TlsConnectOps {
    type Io = client::TlsStream<bridge::BridgeIo>;

    async fn sub_open(&self) -> spark_core::Result<Self::Io> {
        self.inner
            .clone()
            .open()
            .await
            .map_err(|e| SparkError::Invalid(format!("tls: inner endpoint failed to open: {e}")))?;
        let io = bridge::spawn(self.inner.clone());
        let connector = RustlsConnector::from(self.config.clone());
        let stream = connector
            .connect(self.server_name.clone(), io)
            .await
            .map_err(SparkError::Io)?;
        let (_, conn) = stream.get_ref();
        if let Some(chain) = conn.peer_certificates() {
            if let Some(leaf) = chain.first() {
                *self.peer_cert.lock().unwrap() = Some(leaf.as_ref().to_vec());
            }
        }
        Ok(stream)
    }

    async fn control(
        &self,
        _io: Option<&Self::Io>,
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        control_common(&self.peer_cert, op, option, value)
    }

    fn raddr_to_str(&self) -> Option<String> {
        self.inner.raddr_to_str(0)
    }
}

impl PeerCertSource for TlsConnectOps {
    fn peer_certificate_der(&self) -> Option<Vec<u8>> {
        self.peer_cert.lock().unwrap().clone()
    }
}

pub struct TlsAcceptOps {
    inner: Arc<dyn Endpoint>,
    config: Arc<ServerConfig>,
    peer_cert: Mutex<Option<Vec<u8>>>,
}

impl TlsAcceptOps {
    pub(crate) fn new(inner: Arc<dyn Endpoint>, config: Arc<ServerConfig>) -> Self {
        Self {
            inner,
            config,
            peer_cert: Mutex::new(None),
        }
    }
}

#[async_trait]
impl spark_core::LowerLayerOps for TlsAcceptOps {
    type Io = server::TlsStream<bridge::BridgeIo>;

    async fn sub_open(&self) -> spark_core::Result<Self::Io> {
        self.inner
            .clone()
            .open()
            .await
            .map_err(|e| SparkError::Invalid(format!("tls: inner endpoint failed to open: {e}")))?;
        let io = bridge::spawn(self.inner.clone());
        let acceptor = RustlsAcceptor::from(self.config.clone());
        let stream = acceptor.accept(io).await.map_err(SparkError::Io)?;
        let (_, conn) = stream.get_ref();
        if let Some(chain) = conn.peer_certificates() {
            if let Some(leaf) = chain.first() {
                *self.peer_cert.lock().unwrap() = Some(leaf.as_ref().to_vec());
            }
        }
        Ok(stream)
    }

    async fn control(
        &self,
        _io: Option<&Self::Io>,
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        control_common(&self.peer_cert, op, option, value)
    }

    fn raddr_to_str(&self) -> Option<String> {
        self.inner.raddr_to_str(0)
    }
}

impl PeerCertSource for TlsAcceptOps {
    fn peer_certificate_der(&self) -> Option<Vec<u8>> {
        self.peer_cert.lock().unwrap().clone()
    }
}

fn control_common(
    peer_cert: &Mutex<Option<Vec<u8>>>,
    op: ControlOp,
    option: ControlOptionId,
    _value: ControlOption,
) -> spark_core::Result<ControlOption> {
    if op == ControlOp::Set {
        return Err(SparkError::NotSup(match option {
            ControlOptionId::NoDelay => "NODELAY",
            ControlOptionId::Cert => "CERT",
            ControlOptionId::CertFingerprint => "CERT_FINGERPRINT",
            ControlOptionId::Service => "SERVICE",
        }));
    }
    match option {
        ControlOptionId::Cert => {
            let der = peer_cert.lock().unwrap().clone().ok_or(SparkError::CertNotFound)?;
            Ok(ControlOption { value: der })
        }
        ControlOptionId::CertFingerprint => {
            use sha2::{Digest, Sha256};
            let der = peer_cert.lock().unwrap().clone().ok_or(SparkError::CertNotFound)?;
            let digest = Sha256::digest(&der);
            Ok(ControlOption::text(hex::encode(digest)))
        }
        other => Err(SparkError::NotSup(match other {
            ControlOptionId::NoDelay => "NODELAY",
            ControlOptionId::Cert => "CERT",
            ControlOptionId::CertFingerprint => "CERT_FINGERPRINT",
            ControlOptionId::Service => "SERVICE",
        })),
    }
}
