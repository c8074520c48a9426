//! Resolved session configuration: the `Cli` struct plus the handful of
//! environment/identity lookups gtlssh needs before it can build an endpoint
//! stack (credential directory, default username, terminal type).
use std::env;
use std::path::PathBuf;

use nix::unistd::{Uid, User};

use crate::cli::Cli;
use crate::error::{ClientError, Result};

/// Everything the rest of the client needs to drive one connection,
/// resolved once at startup so later code never re-reads the environment.
pub struct ClientConfig {
    pub host: String,
    pub username: String,
    pub port: u16,
    pub tlssh_dir: PathBuf,
    pub keyfile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub telnet: bool,
    pub use_mux: bool,
    pub try_sctp: bool,
    pub try_tcp: bool,
    pub escchar: Option<i32>,
    pub local_forwards: Vec<String>,
    pub remote_forwards: Vec<String>,
    pub program: Vec<String>,
    pub term: String,
}

impl ClientConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let (user_in_dest, host) = cli.user_and_host();
        let username = match user_in_dest {
            Some(u) => u.to_string(),
            None => default_username()?,
        };

        let tlssh_dir = match &cli.tlsshdir {
            Some(dir) => dir.clone(),
            None => home_dir()?.join(".gtlssh"),
        };

        let escchar = cli.escchar.or_else(|| {
            if is_stdin_tty() {
                Some(0x1c) // ^\
            } else {
                None
            }
        });

        let term = env::var("TERM").unwrap_or_else(|_| "dumb".to_string());

        Ok(Self {
            host: host.to_string(),
            username,
            port: cli.port,
            tlssh_dir,
            keyfile: cli.keyfile.clone(),
            certfile: cli.certfile.clone(),
            telnet: cli.telnet,
            use_mux: !cli.nomux,
            try_sctp: !cli.nosctp,
            try_tcp: !cli.notcp,
            escchar,
            local_forwards: cli.local_forwards.clone(),
            remote_forwards: cli.remote_forwards.clone(),
            program: cli.program.clone(),
            term,
        })
    }

    pub fn server_certs_dir(&self) -> PathBuf {
        self.tlssh_dir.join("server_certs")
    }

    pub fn keycerts_dir(&self) -> PathBuf {
        self.tlssh_dir.join("keycerts")
    }
}

fn home_dir() -> Result<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| ClientError::Config("$HOME is not set and --tlsshdir was not given".to_string()))
}

fn default_username() -> Result<String> {
    if let Ok(name) = env::var("USER") {
        return Ok(name);
    }
    User::from_uid(Uid::current())
        .map_err(|e| ClientError::Config(format!("unable to look up current user: {e}")))?
        .map(|u| u.name)
        .ok_or_else(|| ClientError::Config("no password-database entry for the current uid".to_string()))
}

fn is_stdin_tty() -> bool {
    nix::unistd::isatty(&std::io::stdin()).unwrap_or(false)
}
