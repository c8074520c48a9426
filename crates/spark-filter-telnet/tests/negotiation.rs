//! End-to-end test: two `TelnetEndpoint`s talking over an in-memory duplex
//! pipe, exercising IAC byte-stuffing of data, COM-PORT-OPTION negotiation,
//! and BREAK signalling.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use spark_core::control::{ControlOp, ControlOption, ControlOptionId};
use spark_core::{BaseEndpoint, Endpoint, EndpointEvent, EventSink, FdLowerLayer, LowerLayerOps, SparkError};
use spark_filter_telnet::TelnetEndpoint;
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

    async fn control(
        &self,
        _io: Option<&Self::Io>,
        _op: ControlOp,
        option: ControlOptionId,
        _value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        Err(SparkError::NotSup(match option {
            ControlOptionId::NoDelay => "NODELAY",
            ControlOptionId::Cert => "CERT",
            ControlOptionId::CertFingerprint => "CERT_FINGERPRINT",
            ControlOptionId::Service => "SERVICE",
        }))
    }
}

fn duplex_endpoint(io: DuplexStream) -> Arc<BaseEndpoint<DuplexOps>> {
    let ops = DuplexOps {
        io: Mutex::new(Some(io)),
    };
    BaseEndpoint::new("toy", FdLowerLayer::new(ops))
}

#[derive(Default)]
struct RecordingSink {
    data: Mutex<Vec<u8>>,
    breaks: AtomicUsize,
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: EndpointEvent) {
        match event {
            EndpointEvent::Read { data, .. } => self.data.lock().unwrap().extend_from_slice(&data),
            EndpointEvent::SendBreak => {
                self.breaks.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn data_containing_iac_survives_the_round_trip() {
    let (a, b) = tokio::io::duplex(8192);

    let client = TelnetEndpoint::new(duplex_endpoint(a) as Arc<dyn Endpoint>, false);
    let server = TelnetEndpoint::new(duplex_endpoint(b) as Arc<dyn Endpoint>, false);

    let server_sink = Arc::new(RecordingSink::default());
    server.set_event_sink(server_sink.clone());

    client.clone().open().await.unwrap();
    server.clone().open().await.unwrap();

    let payload = [1u8, 255, 2, 255, 255, 3];
    client.write(&payload, &[]).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(&server_sink.data.lock().unwrap()[..], &payload[..]);
}

#[tokio::test]
async fn rfc2217_peers_negotiate_com_port_option() {
    let (a, b) = tokio::io::duplex(8192);

    let client = TelnetEndpoint::new(duplex_endpoint(a) as Arc<dyn Endpoint>, true);
    let server = TelnetEndpoint::new(duplex_endpoint(b) as Arc<dyn Endpoint>, true);

    client.clone().open().await.unwrap();
    server.clone().open().await.unwrap();

    // Let the WILL/DO exchange settle; the filters don't expose negotiated
    // state directly, so this just asserts the exchange doesn't wedge the
    // stream for ordinary data afterward.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let server_sink = Arc::new(RecordingSink::default());
    server.set_event_sink(server_sink.clone());
    client.write(b"ready", &[]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(&server_sink.data.lock().unwrap()[..], b"ready");
}

#[tokio::test]
async fn break_subnegotiation_surfaces_as_send_break_event() {
    let (a, b) = tokio::io::duplex(8192);

    let client = TelnetEndpoint::new(duplex_endpoint(a) as Arc<dyn Endpoint>, true);
    let server = TelnetEndpoint::new(duplex_endpoint(b) as Arc<dyn Endpoint>, true);

    let server_sink = Arc::new(RecordingSink::default());
    server.set_event_sink(server_sink.clone());

    client.clone().open().await.unwrap();
    server.clone().open().await.unwrap();

    client.send_break();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(server_sink.breaks.load(Ordering::SeqCst), 1);
}
