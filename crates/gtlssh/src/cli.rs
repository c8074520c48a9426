//! Command-line surface. The framework proper treats the shell CLI argument
//! parser as an external collaborator, but the client binary still needs
//! one — `clap`'s derive API is the idiomatic choice.
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gtlssh", about = "TOFU-authenticated, TLS-secured remote shell")]
pub struct Cli {
    /// Remote port.
    #[arg(short = 'p', long, default_value_t = 852)]
    pub port: u16,

    /// Client private key; the certificate is inferred by substituting the
    /// trailing `.key` with `.crt` unless `--certfile` overrides it.
    #[arg(short = 'i', long = "keyfile")]
    pub keyfile: Option<PathBuf>,

    /// Client certificate, overriding the one inferred from `--keyfile`.
    #[arg(long)]
    pub certfile: Option<PathBuf>,

    /// Escape character as a decimal code point; `-1` disables escape
    /// processing entirely. Defaults to `^\` (28) on a TTY, disabled
    /// otherwise.
    #[arg(short = 'e', long)]
    pub escchar: Option<i32>,

    /// Wrap the session in `telnet(rfc2217)`.
    #[arg(short = 'r', long = "telnet")]
    pub telnet: bool,

    /// Omit the `mux` filter (disables port forwarding and WINCH
    /// propagation, which both ride the mux control channel).
    #[arg(long)]
    pub nomux: bool,

    /// Never attempt the SCTP transport.
    #[arg(long)]
    pub nosctp: bool,

    /// Never fall back to the TCP transport if SCTP is unavailable.
    #[arg(long)]
    pub notcp: bool,

    /// Local port forward: `[bind:][proto,]port:host:[proto,]port` form,
    /// parsed by [`crate::portfwd::parse_forward`].
    #[arg(short = 'L', long = "local", action = clap::ArgAction::Append)]
    pub local_forwards: Vec<String>,

    /// Remote port forward, same grammar as `-L` but opened on the server.
    #[arg(short = 'R', long = "remote", action = clap::ArgAction::Append)]
    pub remote_forwards: Vec<String>,

    /// Increase log verbosity; may be repeated (`-d`, `-dd`, `-ddd`).
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Overrides `$HOME/.gtlssh` as the credential/pin directory.
    #[arg(long)]
    pub tlsshdir: Option<PathBuf>,

    /// `[user@]host`.
    pub destination: String,

    /// Remote program and arguments; if absent, an interactive login
    /// session is requested instead.
    pub program: Vec<String>,
}

impl Cli {
    /// Splits `destination` into an optional username and the bare host.
    pub fn user_and_host(&self) -> (Option<&str>, &str) {
        match self.destination.split_once('@') {
            Some((user, host)) => (Some(user), host),
            None => (None, self.destination.as_str()),
        }
    }
}
