//! Contract-level tests: verifies `BaseEndpoint` follows the endpoint lifecycle's basic laws.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use spark_core::control::{ControlDepth, ControlOp, ControlOptionId};
use spark_core::{
    BaseEndpoint, ControlOption, Endpoint, EndpointEvent, EventSink, FdLowerLayer, LowerLayerOps,
    OpenState, SparkError,
};
use tokio::io::DuplexStream;

/// A toy lower layer that stores NODELAY in an atomic bit, driving an in-memory duplex pipe pair.
struct ToyOps {
    io: Mutex<Option<DuplexStream>>,
    nodelay: AtomicBool,
}

#[async_trait]
impl LowerLayerOps for ToyOps {
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
        op: ControlOp,
        option: ControlOptionId,
        value: ControlOption,
    ) -> spark_core::Result<ControlOption> {
        match option {
            ControlOptionId::NoDelay => match op {
                ControlOp::Set => {
                    self.nodelay
                        .store(value.as_str() == "1", Ordering::SeqCst);
                    Ok(ControlOption::text(if self.nodelay.load(Ordering::SeqCst) {
                        "1"
                    } else {
                        "0"
                    }))
                }
                ControlOp::Get => Ok(ControlOption::text(if self.nodelay.load(Ordering::SeqCst) {
                    "1"
                } else {
                    "0"
                })),
            },
            other => Err(SparkError::NotSup(match other {
                ControlOptionId::NoDelay => "NODELAY",
                ControlOptionId::Cert => "CERT",
                ControlOptionId::CertFingerprint => "CERT_FINGERPRINT",
                ControlOptionId::Service => "SERVICE",
            })),
        }
    }
}

struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: EndpointEvent) {
        let label = match event {
            EndpointEvent::Read { .. } => "read",
            EndpointEvent::WriteReady => "write_ready",
            EndpointEvent::NewChannel { .. } => "new_channel",
            EndpointEvent::NewConnection { .. } => "new_connection",
            EndpointEvent::RequestPassword { .. } => "request_password",
            EndpointEvent::PostCertVerify { .. } => "postcert_verify",
            EndpointEvent::SendBreak => "send_break",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

fn toy_endpoint() -> (Arc<BaseEndpoint<ToyOps>>, DuplexStream) {
    let (a, b) = tokio::io::duplex(4096);
    let ops = ToyOps {
        io: Mutex::new(Some(a)),
        nodelay: AtomicBool::new(false),
    };
    let ll = FdLowerLayer::new(ops);
    (BaseEndpoint::new("toy", ll), b)
}

#[tokio::test]
async fn control_round_trip_nodelay() {
    let (endpoint, _peer) = toy_endpoint();
    endpoint.clone().open().await.unwrap();

    endpoint
        .control(
            ControlDepth::SelfOnly,
            ControlOp::Set,
            ControlOptionId::NoDelay,
            ControlOption::text("1"),
        )
        .await
        .unwrap();
    let got = endpoint
        .control(
            ControlDepth::SelfOnly,
            ControlOp::Get,
            ControlOptionId::NoDelay,
            ControlOption::default(),
        )
        .await
        .unwrap();
    assert_eq!(got.as_str(), "1");

    endpoint
        .control(
            ControlDepth::SelfOnly,
            ControlOp::Set,
            ControlOptionId::NoDelay,
            ControlOption::text("0"),
        )
        .await
        .unwrap();
    let got = endpoint
        .control(
            ControlDepth::SelfOnly,
            ControlOp::Get,
            ControlOptionId::NoDelay,
            ControlOption::default(),
        )
        .await
        .unwrap();
    assert_eq!(got.as_str(), "0");
}

#[tokio::test]
async fn open_is_busy_while_already_open() {
    let (endpoint, _peer) = toy_endpoint();
    endpoint.clone().open().await.unwrap();
    assert_eq!(endpoint.state(), OpenState::Open);

    let err = endpoint.clone().open().await.unwrap_err();
    assert!(matches!(err, SparkError::Busy(_)));
}

#[tokio::test]
async fn close_is_idempotent_from_callers_perspective() {
    let (endpoint, _peer) = toy_endpoint();
    endpoint.clone().open().await.unwrap();
    endpoint.clone().close().await.unwrap();
    assert_eq!(endpoint.state(), OpenState::Closed);
    // A second close on an already-closed endpoint is a no-op, not an error.
    endpoint.clone().close().await.unwrap();
}

#[tokio::test]
async fn read_event_delivers_written_bytes() {
    let (endpoint, mut peer) = toy_endpoint();
    let sink = Arc::new(RecordingSink {
        events: Mutex::new(Vec::new()),
    });
    endpoint.set_event_sink(sink.clone());
    endpoint.clone().open().await.unwrap();

    use tokio::io::AsyncWriteExt;
    peer.write_all(b"ABC").await.unwrap();

    // give the background reader task a moment to run.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(sink.events.lock().unwrap().contains(&"read".to_string()));
}
