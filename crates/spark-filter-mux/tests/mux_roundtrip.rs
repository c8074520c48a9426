//! End-to-end test: two `MuxEndpoint`s talking over an in-memory duplex
//! pipe, exercising channel open, data shuttling, and peer-initiated close.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use spark_core::control::{ControlOp, ControlOption, ControlOptionId};
use spark_core::{BaseEndpoint, Endpoint, EndpointEvent, EventSink, FdLowerLayer, LowerLayerOps, SparkError};
use spark_filter_mux::MuxEndpoint;
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

struct ChannelArrivalSink {
    arrived: Mutex<Vec<(Arc<dyn Endpoint>, String)>>,
}

impl EventSink for ChannelArrivalSink {
    fn on_event(&self, event: EndpointEvent) {
        if let EndpointEvent::NewChannel { endpoint, service } = event {
            self.arrived.lock().unwrap().push((endpoint, service));
        }
    }
}

struct DataSink {
    received: Mutex<Vec<u8>>,
    saw_eof: AtomicBool,
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

#[tokio::test]
async fn open_channel_surfaces_as_new_channel_with_data_flow() {
    let (a, b) = tokio::io::duplex(8192);

    let client_mux = MuxEndpoint::new(duplex_endpoint(a) as Arc<dyn Endpoint>);
    let server_mux = MuxEndpoint::new(duplex_endpoint(b) as Arc<dyn Endpoint>);

    let server_sink = Arc::new(ChannelArrivalSink {
        arrived: Mutex::new(Vec::new()),
    });
    server_mux.set_event_sink(server_sink.clone());

    client_mux.clone().open().await.unwrap();
    server_mux.clone().open().await.unwrap();

    let client_channel = client_mux.open_channel("shell:bash").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let arrived = server_sink.arrived.lock().unwrap().clone();
    assert_eq!(arrived.len(), 1);
    assert_eq!(arrived[0].1, "shell:bash");
    let server_channel = arrived[0].0.clone();

    let server_data_sink = Arc::new(DataSink {
        received: Mutex::new(Vec::new()),
        saw_eof: AtomicBool::new(false),
    });
    server_channel.set_event_sink(server_data_sink.clone());

    client_channel.write(b"hello from client", &[]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(&server_data_sink.received.lock().unwrap()[..], b"hello from client");

    client_channel.close().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(server_data_sink.saw_eof.load(Ordering::SeqCst));
}

#[tokio::test]
async fn writing_plain_data_to_the_mux_endpoint_itself_is_rejected() {
    let (a, b) = tokio::io::duplex(4096);
    let mux = MuxEndpoint::new(duplex_endpoint(a) as Arc<dyn Endpoint>);
    let _peer = duplex_endpoint(b);
    mux.clone().open().await.unwrap();

    let err = mux.write(b"not a frame", &[]).await.unwrap_err();
    assert!(matches!(err, SparkError::Invalid(_)));
}
