//! Integration tests for the accept-side lifecycle: bind an ephemeral port, connect once, check event delivery and idempotent shutdown.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spark_core::{AddressList, EndpointEvent, EventSink, SocketAddrEntry};
use spark_transport_tcp::TcpAccepter;
use tokio::net::TcpStream;

struct CountingSink {
    connections: AtomicUsize,
}

impl EventSink for CountingSink {
    fn on_event(&self, event: EndpointEvent) {
        if let EndpointEvent::NewConnection { .. } = event {
            self.connections.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn accepted_connection_delivers_new_connection_event() {
    let accepter = TcpAccepter::new();
    let sink = Arc::new(CountingSink {
        connections: AtomicUsize::new(0),
    });
    accepter.set_event_sink(sink.clone());

    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let bound_addr = probe.local_addr().unwrap();
    drop(probe);

    let addresses = AddressList::from_entries(vec![SocketAddrEntry::tcp(bound_addr)]);
    accepter.startup(&addresses).await.unwrap();
    assert_eq!(accepter.refcount(), 1);

    let client = TcpStream::connect(bound_addr).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(sink.connections.load(Ordering::SeqCst), 1);
    drop(client);

    accepter.shutdown().await.unwrap();
    assert_eq!(accepter.refcount(), 0);
}

#[tokio::test]
async fn set_enable_false_rejects_before_accept_logic_runs() {
    let accepter = TcpAccepter::new();
    let sink = Arc::new(CountingSink {
        connections: AtomicUsize::new(0),
    });
    accepter.set_event_sink(sink.clone());

    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let bound_addr = probe.local_addr().unwrap();
    drop(probe);
    let addresses = AddressList::from_entries(vec![SocketAddrEntry::tcp(bound_addr)]);

    accepter.startup(&addresses).await.unwrap();
    accepter.set_enable(false).await.unwrap();

    let client = TcpStream::connect(bound_addr).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(sink.connections.load(Ordering::SeqCst), 0);
    drop(client);

    accepter.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_without_startup_is_a_no_op() {
    let accepter = TcpAccepter::new();
    accepter.shutdown().await.unwrap();
    assert_eq!(accepter.refcount(), 0);
}
