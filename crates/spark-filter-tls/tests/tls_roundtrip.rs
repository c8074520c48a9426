//! End-to-end test: a client `ssl` endpoint and a server `ssl` endpoint
//! handshaking over an in-memory duplex pipe, exercising the
//! `PostCertVerify` announcement, the `CERT_FINGERPRINT` control surface,
//! and plaintext data flow in both directions after the handshake.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rcgen::CertifiedKey;
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use sha2::{Digest, Sha256};
use spark_core::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use spark_core::{BaseEndpoint, Endpoint, EndpointEvent, EventSink, FdLowerLayer, LowerLayerOps, SparkError};
use spark_filter_tls::{TlsAcceptor, TlsConnector};
use tokio::io::DuplexStream;

struct DuplexOps {
    io: Mutex<Option<DuplexStream>>,
}

#[async_trait]
impl LowerLayerOps for DuplexOps {
    type Io = DuplexStream;

    async fn sub_open(&self) -> spark_core::Result<Self::Io> {
        self.io
            .lock()
            .unwrap()
            .take()
            .ok_or(SparkError::Busy("already opened"))
    }
}

fn duplex_endpoint(io: DuplexStream) -> Arc<BaseEndpoint<DuplexOps>> {
    let ops = DuplexOps {
        io: Mutex::new(Some(io)),
    };
    BaseEndpoint::new("toy", FdLowerLayer::new(ops))
}

struct DataSink {
    received: Mutex<Vec<u8>>,
    saw_eof: AtomicBool,
}

impl DataSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            saw_eof: AtomicBool::new(false),
        })
    }
}

impl EventSink for DataSink {
    fn on_event(&self, event: EndpointEvent) {
        if let EndpointEvent::Read { data, aux } = event {
            if aux.iter().any(|a| a == "eof") {
                self.saw_eof.store(true, Ordering::SeqCst);
            } else {
                self.received.lock().unwrap().extend_from_slice(&data);
            }
        }
    }
}

struct CertVerifySink {
    seen: Mutex<Vec<Option<String>>>,
}

impl CertVerifySink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl EventSink for CertVerifySink {
    fn on_event(&self, event: EndpointEvent) {
        if let EndpointEvent::PostCertVerify { err, .. } = event {
            self.seen.lock().unwrap().push(err.map(|e| e.to_string()));
        }
    }
}

fn self_signed_server_identity() -> (Vec<rustls_pki_types::CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".into()]).expect("self-signed cert generation");
    let cert_der = cert.der().clone();
    let key_der = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    (vec![cert_der], key_der)
}

#[tokio::test]
async fn handshake_completes_and_reports_peer_certificate() {
    let (a, b) = tokio::io::duplex(8192);

    let (cert_chain, key) = self_signed_server_identity();
    let expected_fingerprint = hex::encode(Sha256::digest(&cert_chain[0]));

    let client = TlsConnector::wrap(
        duplex_endpoint(a) as Arc<dyn Endpoint>,
        ServerName::try_from("localhost").unwrap(),
    );
    let server = TlsAcceptor::wrap(duplex_endpoint(b) as Arc<dyn Endpoint>, cert_chain, key).unwrap();

    let client_cert_sink = CertVerifySink::new();
    client.set_event_sink(client_cert_sink.clone());
    let server_cert_sink = CertVerifySink::new();
    server.set_event_sink(server_cert_sink.clone());

    let (client_res, server_res) = tokio::join!(client.clone().open(), server.clone().open());
    client_res.unwrap();
    server_res.unwrap();

    assert_eq!(client_cert_sink.seen.lock().unwrap().as_slice(), [None]);
    assert_eq!(server_cert_sink.seen.lock().unwrap().as_slice(), [None]);

    let fp = client
        .control(ControlDepth::SelfOnly, ControlOp::Get, ControlOptionId::CertFingerprint, ControlOption::default())
        .await
        .unwrap();
    assert_eq!(fp.as_str().as_ref(), expected_fingerprint.as_str());
}

#[tokio::test]
async fn plaintext_flows_both_ways_after_handshake() {
    let (a, b) = tokio::io::duplex(8192);
    let (cert_chain, key) = self_signed_server_identity();

    let client = TlsConnector::wrap(
        duplex_endpoint(a) as Arc<dyn Endpoint>,
        ServerName::try_from("localhost").unwrap(),
    );
    let server = TlsAcceptor::wrap(duplex_endpoint(b) as Arc<dyn Endpoint>, cert_chain, key).unwrap();

    let client_data = DataSink::new();
    client.set_event_sink(client_data.clone());
    let server_data = DataSink::new();
    server.set_event_sink(server_data.clone());

    let (client_res, server_res) = tokio::join!(client.clone().open(), server.clone().open());
    client_res.unwrap();
    server_res.unwrap();

    client.write(b"hello server", &[]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(&server_data.received.lock().unwrap()[..], b"hello server");

    server.write(b"hello client", &[]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(&client_data.received.lock().unwrap()[..], b"hello client");

    client.clone().close().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(server_data.saw_eof.load(Ordering::SeqCst));
}

#[tokio::test]
async fn writing_with_aux_tags_is_rejected() {
    let (a, b) = tokio::io::duplex(4096);
    let (cert_chain, key) = self_signed_server_identity();

    let client = TlsConnector::wrap(
        duplex_endpoint(a) as Arc<dyn Endpoint>,
        ServerName::try_from("localhost").unwrap(),
    );
    let server = TlsAcceptor::wrap(duplex_endpoint(b) as Arc<dyn Endpoint>, cert_chain, key).unwrap();

    let (client_res, server_res) = tokio::join!(client.clone().open(), server.clone().open());
    client_res.unwrap();
    server_res.unwrap();

    let err = client.write(b"x", &["oob"]).await.unwrap_err();
    assert!(matches!(err, SparkError::Invalid(_)));
}
