//! Builds the endpoint stack and drives one interactive (or piped-program)
//! connection.
//!
//! The stack is built bottom-up with each crate's direct constructor rather
//! than through [`spark_endpoint_parser::parse_and_build`]: gtlssh needs
//! concrete handles to call `supply_password()`, `open_channel()`, and
//! `send_break()`, none of which are reachable through `Arc<dyn Endpoint>`
//! alone. The layer order matches the single endpoint string this would be
//! expressed as: `telnet(rfc2217),mux,certauth(...),ssl(...),tcp,host,port`.
use std::os::fd::AsFd;
use std::sync::Arc;

use bytes::Bytes;
use rustls_pki_types::ServerName;
use spark_core::control::{ControlDepth, ControlOp, ControlOption, ControlOptionId};
use spark_core::{Endpoint, EndpointEvent, EventSink};
use spark_filter_certauth::CertAuthClientEndpoint;
use spark_filter_mux::MuxEndpoint;
use spark_filter_telnet::TelnetEndpoint;
use spark_filter_tls::TlsConnector;
use spark_transport_tcp::TcpConnector;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credentials::Credentials;
use crate::error::{ClientError, Result};
use crate::portfwd::{self, RemoteForwards};
use crate::prompt;
use crate::tofu;
use crate::tty::RawModeGuard;

const STDIO_BUF: usize = 8192;

/// Local-terminal escape processing: at the start of a line, `escape_byte`
/// followed by `.` disconnects the session instead of being sent on the
/// wire, the same convention classic terminal-shell clients use. Only
/// engaged in raw interactive mode; piped-program sessions pass every byte
/// straight through (see `ClientConfig::escchar`'s doc comment).
struct EscapeScanner {
    escape_byte: u8,
    at_bol: bool,
    pending: bool,
}

impl EscapeScanner {
    fn new(escape_byte: u8) -> Self {
        Self {
            escape_byte,
            at_bol: true,
            pending: false,
        }
    }

    /// Returns the bytes to forward to the remote and whether the
    /// disconnect sequence was seen (forwarding stops at that point; any
    /// bytes after it in the same read are dropped, matching a deliberate
    /// local keystroke rather than wire data).
    fn feed(&mut self, input: &[u8]) -> (Vec<u8>, bool) {
        let mut out = Vec::with_capacity(input.len());
        for &b in input {
            if self.pending {
                self.pending = false;
                if b == b'.' {
                    return (out, true);
                }
                if b != self.escape_byte {
                    out.push(self.escape_byte);
                }
                out.push(b);
                self.at_bol = b == b'\r' || b == b'\n';
                continue;
            }
            if self.at_bol && b == self.escape_byte {
                self.pending = true;
                continue;
            }
            out.push(b);
            self.at_bol = b == b'\r' || b == b'\n';
        }
        (out, false)
    }
}

fn escape_byte(cfg: &ClientConfig) -> Option<u8> {
    match cfg.escchar {
        Some(v) if (0..=255).contains(&v) => Some(v as u8),
        _ => None,
    }
}

/// Builds the session service string per the `login:`/`program:` grammar:
/// `program:arg1\0arg2\0…\0` when a program was given, otherwise
/// `login:[TERM=<term>]\0`.
fn session_service(cfg: &ClientConfig) -> String {
    if cfg.program.is_empty() {
        format!("login:TERM={}\0", cfg.term)
    } else {
        let mut s = String::from("program:");
        for arg in &cfg.program {
            s.push_str(arg);
            s.push('\0');
        }
        s
    }
}

pub struct Session {
    cfg: ClientConfig,
    top: Arc<dyn Endpoint>,
    certauth: Arc<CertAuthClientEndpoint>,
    mux: Option<Arc<MuxEndpoint>>,
    remote_forwards: Arc<RemoteForwards>,
    channel: Arc<dyn Endpoint>,
    stdout_rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Session {
    pub async fn connect(cfg: ClientConfig, creds: Credentials) -> Result<Self> {
        if cfg.try_sctp {
            debug!("sctp transport requested but unavailable in this build, falling back to tcp");
        }
        if !cfg.try_tcp {
            return Err(ClientError::Config(
                "sctp is unavailable in this build and --notcp was given, nothing left to try".to_string(),
            ));
        }

        let tcp = TcpConnector::connect_lazy(cfg.host.clone(), cfg.port);
        let server_name = ServerName::try_from(cfg.host.clone())
            .map_err(|_| ClientError::Config(format!("`{}` is not a valid TLS server name", cfg.host)))?;
        let ssl = TlsConnector::wrap(tcp as Arc<dyn Endpoint>, server_name);

        let certauth = CertAuthClientEndpoint::new(ssl as Arc<dyn Endpoint>, cfg.username.clone(), None, true);

        let mux = if cfg.use_mux {
            Some(MuxEndpoint::new(certauth.clone() as Arc<dyn Endpoint>))
        } else {
            None
        };

        let mux_level: Arc<dyn Endpoint> = match &mux {
            Some(m) => m.clone() as Arc<dyn Endpoint>,
            None => certauth.clone() as Arc<dyn Endpoint>,
        };

        let telnet = if cfg.telnet {
            Some(TelnetEndpoint::new(mux_level.clone(), true))
        } else {
            None
        };

        let top: Arc<dyn Endpoint> = match &telnet {
            Some(t) => t.clone() as Arc<dyn Endpoint>,
            None => mux_level,
        };

        let remote_forwards = RemoteForwards::new();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<Bytes>();
        let stdout_tx_for_channel = stdout_tx.clone();
        let sink = Arc::new(SessionSink {
            host: cfg.host.clone(),
            port: cfg.port,
            server_certs_dir: cfg.server_certs_dir(),
            top: top.clone(),
            certauth: certauth.clone(),
            remote_forwards: remote_forwards.clone(),
            ssl_endpoint: top.get_child_of_type("ssl"),
            stdout_tx,
        });
        top.clone().set_event_sink(sink);

        top.clone().open().await.map_err(ClientError::Spark)?;
        info!(host = %cfg.host, port = cfg.port, "connected");

        // The client certificate itself is not presented at the TLS layer
        // (see DESIGN.md); it is only used for its local expiry check, done
        // in `credentials::discover`. Identity to the server travels over
        // the certauth username/password handshake instead.
        let _ = creds;

        let service = session_service(&cfg);
        let channel: Arc<dyn Endpoint> = match &mux {
            Some(m) => {
                let ch = m.open_channel(&service).await.map_err(ClientError::Spark)?;
                ch.clone().set_event_sink(Arc::new(SessionChannelSink {
                    channel: ch.clone(),
                    stdout_tx: stdout_tx_for_channel,
                }));
                ch
            }
            None => top.clone(),
        };

        Ok(Self {
            cfg,
            top,
            certauth,
            mux,
            remote_forwards,
            channel,
            stdout_rx,
        })
    }

    /// Registers every `-L`/`-R` forward from the configuration, then either
    /// drives an interactive terminal session or spawns the requested
    /// program, returning the process-style exit code.
    pub async fn run(mut self) -> Result<i32> {
        let mux = self.mux.clone().ok_or_else(|| {
            ClientError::Config("port forwarding and WINCH propagation both require the mux filter (--nomux was given)".to_string())
        });

        for spec in &self.cfg.local_forwards {
            let (accept, connect) = portfwd::parse_forward(spec)?;
            let mux = mux.clone()?;
            portfwd::spawn_local_forward(mux, accept, connect).await?;
        }
        for spec in &self.cfg.remote_forwards {
            let (accept, connect) = portfwd::parse_forward(spec)?;
            let frame = self.remote_forwards.register(accept, connect);
            if let Ok(mux) = mux.clone() {
                mux.write(&frame, &["oob"]).await.map_err(ClientError::Spark)?;
            }
        }

        if let Ok(mux) = mux.clone() {
            let _winch = crate::winch::spawn(mux as Arc<dyn Endpoint>);
            self.shuttle_stdio().await
        } else {
            self.shuttle_stdio().await
        }
    }

    async fn shuttle_stdio(&mut self) -> Result<i32> {
        let stdin_is_tty = crate::tty::is_tty(std::io::stdin().as_fd());
        let _raw_guard = if stdin_is_tty && self.cfg.program.is_empty() {
            RawModeGuard::enable(std::io::stdin().as_fd()).ok()
        } else {
            None
        };

        self.top.set_read_callback_enable(true);

        let channel_for_input = self.channel.clone();
        let raw_mode = _raw_guard.is_some();
        let scanner_byte = if raw_mode { escape_byte(&self.cfg) } else { None };
        let input = tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; STDIO_BUF];
            let mut scanner = scanner_byte.map(EscapeScanner::new);
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => match &mut scanner {
                        Some(scanner) => {
                            let (forward, disconnect) = scanner.feed(&buf[..n]);
                            if !forward.is_empty() && channel_for_input.write(&forward, &[]).await.is_err() {
                                break;
                            }
                            if disconnect {
                                let _ = channel_for_input.clone().close().await;
                                break;
                            }
                        }
                        None => {
                            if channel_for_input.write(&buf[..n], &[]).await.is_err() {
                                break;
                            }
                        }
                    },
                }
            }
        });

        let mut stdout = tokio::io::stdout();
        while let Some(data) = self.stdout_rx.recv().await {
            if data.is_empty() {
                break;
            }
            if stdout.write_all(&data).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
        input.abort();
        let _ = self.top.clone().close().await;
        Ok(0)
    }
}

/// Installed once as the top endpoint's event sink for the whole session
/// lifetime, so `NewChannel`/`RequestPassword`/`PostCertVerify`/`SendBreak`
/// keep being handled after the interactive stdio shuttle starts, not just
/// during the initial handshake.
struct SessionSink {
    host: String,
    port: u16,
    server_certs_dir: std::path::PathBuf,
    top: Arc<dyn Endpoint>,
    certauth: Arc<CertAuthClientEndpoint>,
    remote_forwards: Arc<RemoteForwards>,
    ssl_endpoint: Option<Arc<dyn Endpoint>>,
    stdout_tx: mpsc::UnboundedSender<Bytes>,
}

impl EventSink for SessionSink {
    fn on_event(&self, event: EndpointEvent) {
        match event {
            EndpointEvent::RequestPassword { .. } => {
                let certauth = self.certauth.clone();
                tokio::task::spawn_blocking(move || match prompt::read_password("Password: ") {
                    Ok(pw) => certauth.supply_password(pw),
                    Err(e) => warn!(error = %e, "failed to read password"),
                });
            }
            EndpointEvent::PostCertVerify { err: None, .. } => {
                let Some(ssl) = self.ssl_endpoint.clone() else {
                    warn!("PostCertVerify fired but no ssl endpoint was found in the stack");
                    return;
                };
                let host = self.host.clone();
                let port = self.port;
                let server_certs_dir = self.server_certs_dir.clone();
                let top = self.top.clone();
                tokio::spawn(async move {
                    let cert = ssl
                        .control(ControlDepth::SelfOnly, ControlOp::Get, ControlOptionId::Cert, ControlOption::default())
                        .await;
                    let fingerprint = ssl
                        .control(
                            ControlDepth::SelfOnly,
                            ControlOp::Get,
                            ControlOptionId::CertFingerprint,
                            ControlOption::default(),
                        )
                        .await;
                    let (Ok(cert), Ok(fingerprint)) = (cert, fingerprint) else {
                        warn!("unable to read peer certificate for TOFU verification");
                        let _ = top.close().await;
                        return;
                    };
                    let raddr = ssl.raddr_to_str(0).unwrap_or_else(|| host.clone());
                    let fingerprint_hex = String::from_utf8_lossy(&fingerprint.value).to_string();

                    // TOFU does blocking terminal I/O; keep it off the reactor.
                    let result = tokio::task::spawn_blocking(move || {
                        tofu::verify_pinned(&server_certs_dir, &host, port, &raddr, &cert.value, &fingerprint_hex)
                    })
                    .await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(error = %e, "certificate trust check failed, closing connection");
                            let _ = top.close().await;
                        }
                        Err(_) => {
                            warn!("trust check task panicked");
                            let _ = top.close().await;
                        }
                    }
                });
            }
            EndpointEvent::PostCertVerify { err: Some(e), reason } => {
                warn!(error = %e, reason, "certificate verification failed");
                let top = self.top.clone();
                tokio::spawn(async move {
                    let _ = top.close().await;
                });
            }
            EndpointEvent::NewChannel { endpoint, service } => {
                if !self.remote_forwards.try_handle(&service, endpoint.clone()) {
                    debug!(service, "unsolicited channel request, closing");
                    let ep = endpoint;
                    tokio::spawn(async move {
                        let _ = ep.close().await;
                    });
                }
            }
            EndpointEvent::SendBreak => {}
            EndpointEvent::Read { data, aux } => {
                // Only reachable when `--nomux` leaves `top` doubling as the
                // session channel; under mux, session bytes arrive on the
                // channel's own sink (`SessionChannelSink`) instead.
                if aux.iter().any(|a| a == "eof") {
                    let _ = self.stdout_tx.send(Bytes::new());
                } else {
                    let _ = self.stdout_tx.send(data);
                    self.top.set_read_callback_enable(true);
                }
            }
            _ => {}
        }
    }
}

/// Forwards the session channel's inbound bytes to the stdout shuttle and
/// re-enables the channel's own one-shot read gate, the same shape as
/// `portfwd::ChannelSink` but feeding the session's stdout queue instead of a
/// forwarded socket.
struct SessionChannelSink {
    channel: Arc<dyn Endpoint>,
    stdout_tx: mpsc::UnboundedSender<Bytes>,
}

impl EventSink for SessionChannelSink {
    fn on_event(&self, event: EndpointEvent) {
        if let EndpointEvent::Read { data, aux } = event {
            if aux.iter().any(|a| a == "eof") {
                let _ = self.stdout_tx.send(Bytes::new());
            } else {
                let _ = self.stdout_tx.send(data);
                self.channel.set_read_callback_enable(true);
            }
        }
    }
}

/// Finds the first descendant endpoint of the given `endpoint_type`, used to
/// reach the `ssl` layer for `control(CERT)`/`control(CERT_FINGERPRINT)`
/// regardless of how many filters sit above it.
trait FindChild {
    fn get_child_of_type(&self, endpoint_type: &str) -> Option<Arc<dyn Endpoint>>;
}

impl FindChild for Arc<dyn Endpoint> {
    fn get_child_of_type(&self, endpoint_type: &str) -> Option<Arc<dyn Endpoint>> {
        if self.endpoint_type() == endpoint_type {
            return Some(self.clone());
        }
        let mut depth = 0;
        while let Some(child) = self.get_child(depth) {
            if child.endpoint_type() == endpoint_type {
                return Some(child);
            }
            depth += 1;
            if depth > 16 {
                return None;
            }
        }
        None
    }
}
