//! Local (`-L`) and remote (`-R`) port forwarding over the mux control
//! channel: an address-field parser for `-L`/`-R` arguments plus an OOB
//! registration frame for the remote side.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use spark_core::{Endpoint, EndpointEvent, EventSink};
use spark_filter_mux::MuxEndpoint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

const SHUTTLE_BUF: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Proto {
    Tcp,
    Sctp,
}

impl Proto {
    fn as_wire(&self) -> &'static str {
        match self {
            Proto::Tcp => "tcp",
            Proto::Sctp => "sctp",
        }
    }
}

#[derive(Clone, Debug)]
pub struct NetAddr {
    pub host: Option<String>,
    pub proto: Proto,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub enum ForwardAddr {
    Unix(String),
    Net(NetAddr),
}

impl ForwardAddr {
    /// The endpoint-string wire form (`unix,<path>`, `tcp,<port>`, or
    /// `tcp,<host>,<port>`), the shape an accepter or connecter string
    /// takes inside a remote-forward registration frame.
    pub fn to_wire(&self) -> String {
        match self {
            ForwardAddr::Unix(path) => format!("unix,{path}"),
            ForwardAddr::Net(NetAddr { host: None, proto, port }) => format!("{},{}", proto.as_wire(), port),
            ForwardAddr::Net(NetAddr { host: Some(h), proto, port }) => format!("{},{},{}", proto.as_wire(), h, port),
        }
    }
}

fn parse_proto_port(field: &str) -> Result<(Proto, u16)> {
    let (proto, rest) = if let Some(r) = field.strip_prefix("tcp,") {
        (Proto::Tcp, r)
    } else if let Some(r) = field.strip_prefix("sctp,") {
        (Proto::Sctp, r)
    } else {
        (Proto::Tcp, field)
    };
    let port: u16 = rest.parse().map_err(|_| ClientError::BadForwardAddress(field.to_string()))?;
    Ok((proto, port))
}

fn host_port(host: Option<&str>, port_field: &str, original: &str) -> Result<NetAddr> {
    if host.map(str::is_empty).unwrap_or(false) {
        return Err(ClientError::BadForwardAddress(original.to_string()));
    }
    let (proto, port) = parse_proto_port(port_field)?;
    Ok(NetAddr {
        host: host.map(str::to_string),
        proto,
        port,
    })
}

/// Parses one `-L`/`-R` argument into its accept side and connect side,
/// splitting on colon fields and detecting unix-socket paths by a leading
/// `/`.
pub fn parse_forward(addr: &str) -> Result<(ForwardAddr, ForwardAddr)> {
    let bad = || ClientError::BadForwardAddress(addr.to_string());
    let fields: Vec<&str> = addr.splitn(4, ':').collect();
    let num_s = fields.len();
    if num_s < 2 {
        return Err(bad());
    }

    let last_is_unix = fields[num_s - 1].starts_with('/');
    let first_is_unix = fields[0].starts_with('/');
    let mut has_bind = false;

    if last_is_unix {
        if first_is_unix {
            if num_s > 2 {
                return Err(bad());
            }
        } else if num_s > 3 {
            return Err(bad());
        } else if num_s == 3 {
            has_bind = true;
        }
    } else if first_is_unix {
        if num_s > 3 {
            return Err(bad());
        }
    } else if num_s < 3 {
        return Err(bad());
    } else if num_s == 4 {
        has_bind = true;
    }

    let field_at = |i: usize| -> Result<&str> { fields.get(i).copied().ok_or_else(bad) };

    let mut pos = 0usize;
    let accept = if has_bind {
        let a = ForwardAddr::Net(host_port(Some(field_at(pos)?), field_at(pos + 1)?, addr)?);
        pos += 2;
        a
    } else if fields[pos].starts_with('/') {
        let a = ForwardAddr::Unix(fields[pos].to_string());
        pos += 1;
        a
    } else {
        let a = ForwardAddr::Net(host_port(None, fields[pos], addr)?);
        pos += 1;
        a
    };

    let connect = if field_at(pos).map(|f| f.starts_with('/')).unwrap_or(false) {
        ForwardAddr::Unix(field_at(pos)?.to_string())
    } else {
        ForwardAddr::Net(host_port(Some(field_at(pos)?), field_at(pos + 1)?, addr)?)
    };

    Ok((accept, connect))
}

/// Listens locally per `accept` and, for every connection, opens a mux
/// channel addressed by `connect`'s wire form, then shuttles bytes in both
/// directions — the `-L` direction of port forwarding.
pub async fn spawn_local_forward(mux: Arc<MuxEndpoint>, accept: ForwardAddr, connect: ForwardAddr) -> Result<()> {
    match accept {
        ForwardAddr::Unix(path) => {
            let listener = UnixListener::bind(&path)?;
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => spawn_unix_session(mux.clone(), stream, connect.to_wire()),
                        Err(e) => {
                            warn!(error = %e, "local unix forward accept failed");
                            break;
                        }
                    }
                }
            });
        }
        ForwardAddr::Net(net) => {
            let bind_addr = format!("{}:{}", net.host.as_deref().unwrap_or("0.0.0.0"), net.port);
            let listener = TcpListener::bind(&bind_addr).await?;
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => spawn_tcp_session(mux.clone(), stream, connect.to_wire()),
                        Err(e) => {
                            warn!(error = %e, "local tcp forward accept failed");
                            break;
                        }
                    }
                }
            });
        }
    }
    Ok(())
}

fn spawn_tcp_session(mux: Arc<MuxEndpoint>, stream: TcpStream, service: String) {
    tokio::spawn(async move {
        match mux.open_channel(&service).await {
            Ok(channel) => shuttle_socket_tcp(channel, stream).await,
            Err(e) => warn!(error = %e, service, "failed to open forwarded channel"),
        }
    });
}

fn spawn_unix_session(mux: Arc<MuxEndpoint>, stream: UnixStream, service: String) {
    tokio::spawn(async move {
        match mux.open_channel(&service).await {
            Ok(channel) => shuttle_socket_unix(channel, stream).await,
            Err(e) => warn!(error = %e, service, "failed to open forwarded channel"),
        }
    });
}

/// Registry of pending remote forwards (`-R`), keyed by the 4-digit service
/// id this client allocated; consulted when the mux layer delivers a
/// `NewChannel` event whose service matches one we asked the server to open.
pub struct RemoteForwards {
    next_id: AtomicU32,
    table: std::sync::Mutex<HashMap<String, ForwardAddr>>,
}

impl RemoteForwards {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(1),
            table: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Allocates a service id, builds the registration OOB frame, and
    /// records where an incoming connection with that service should be
    /// dialed to locally.
    pub fn register(&self, accept: ForwardAddr, connect: ForwardAddr) -> Vec<u8> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let service = format!("{id:04}");
        let frame = crate::oob::encode_remote_forward(&service, &accept.to_wire());
        self.table.lock().unwrap().insert(service, connect);
        frame
    }

    /// Handles a `NewChannel` event arriving on the mux endpoint: if its
    /// service matches a forward we registered, dials the local connect
    /// target and shuttles; otherwise the request is for someone else
    /// (plain remote command execution, say) and is left alone.
    pub fn try_handle(self: &Arc<Self>, service: &str, channel: Arc<dyn Endpoint>) -> bool {
        let connect = match self.table.lock().unwrap().get(service).cloned() {
            Some(c) => c,
            None => return false,
        };
        tokio::spawn(async move {
            match connect {
                ForwardAddr::Unix(path) => match UnixStream::connect(&path).await {
                    Ok(stream) => shuttle_socket_unix(channel, stream).await,
                    Err(e) => warn!(error = %e, path, "remote forward dial failed"),
                },
                ForwardAddr::Net(net) => {
                    let addr = format!("{}:{}", net.host.unwrap_or_default(), net.port);
                    match TcpStream::connect(&addr).await {
                        Ok(stream) => shuttle_socket_tcp(channel, stream).await,
                        Err(e) => warn!(error = %e, addr, "remote forward dial failed"),
                    }
                }
            }
        });
        true
    }
}

async fn shuttle_socket_tcp(channel: Arc<dyn Endpoint>, stream: TcpStream) {
    let (read_half, write_half) = stream.into_split();
    shuttle(channel, read_half, write_half).await;
}

async fn shuttle_socket_unix(channel: Arc<dyn Endpoint>, stream: UnixStream) {
    let (read_half, write_half) = stream.into_split();
    shuttle(channel, read_half, write_half).await;
}

/// Bridges a mux channel endpoint to a real socket's halves, the same
/// read-events-into-channel / writes-out-of-channel shape as
/// `spark-filter-tls`'s duplex bridge, but terminating at a live socket
/// instead of a `tokio-rustls` handshake.
async fn shuttle<R, W>(channel: Arc<dyn Endpoint>, mut read_half: R, mut write_half: W)
where
    R: AsyncReadExt + Unpin + Send + 'static,
    W: AsyncWriteExt + Unpin + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    channel.clone().set_event_sink(Arc::new(ChannelSink {
        tx,
        channel: channel.clone(),
    }));
    if let Err(e) = channel.clone().open().await {
        debug!(error = %e, "forwarded channel failed to open");
        return;
    }

    let outbound_channel = channel.clone();
    let outbound = tokio::spawn(async move {
        let mut buf = [0u8; SHUTTLE_BUF];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if outbound_channel.write(&buf[..n], &[]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(data) = rx.recv().await {
        if data.is_empty() || write_half.write_all(&data).await.is_err() {
            break;
        }
    }
    let _ = channel.close().await;
    outbound.abort();
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
    channel: Arc<dyn Endpoint>,
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: EndpointEvent) {
        if let EndpointEvent::Read { data, aux } = event {
            if aux.iter().any(|a| a == "eof") {
                let _ = self.tx.send(Bytes::new());
            } else {
                let _ = self.tx.send(data);
                self.channel.set_read_callback_enable(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_port_forward() {
        let (accept, connect) = parse_forward("8080:example.com:80").unwrap();
        assert_eq!(accept.to_wire(), "tcp,8080");
        assert_eq!(connect.to_wire(), "tcp,example.com,80");
    }

    #[test]
    fn parses_bind_address() {
        let (accept, connect) = parse_forward("127.0.0.1:8080:example.com:80").unwrap();
        assert_eq!(accept.to_wire(), "tcp,127.0.0.1,8080");
        assert_eq!(connect.to_wire(), "tcp,example.com,80");
    }

    #[test]
    fn parses_unix_sockets_on_both_ends() {
        let (accept, connect) = parse_forward("/tmp/a.sock:/tmp/b.sock").unwrap();
        assert_eq!(accept.to_wire(), "unix,/tmp/a.sock");
        assert_eq!(connect.to_wire(), "unix,/tmp/b.sock");
    }

    #[test]
    fn parses_sctp_prefixed_port() {
        let (accept, connect) = parse_forward("sctp,8080:example.com:sctp,80").unwrap();
        assert_eq!(accept.to_wire(), "sctp,8080");
        assert_eq!(connect.to_wire(), "sctp,example.com,80");
    }

    #[test]
    fn rejects_too_few_fields() {
        assert!(parse_forward("8080").is_err());
    }
}
