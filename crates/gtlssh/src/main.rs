//! Entry point: parse arguments, resolve configuration and credentials,
//! open the connection, then drive it to completion.
mod cli;
mod config;
mod credentials;
mod error;
mod oob;
mod portfwd;
mod prompt;
mod session;
mod tofu;
mod tty;
mod winch;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::ClientConfig;
use crate::error::ClientError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli).await {
        eprintln!("gtlssh: {e}");
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    let cfg = ClientConfig::from_cli(&cli)?;
    let creds = credentials::discover(&cfg)?;

    let session = session::Session::connect(cfg, creds).await?;
    let code = session.run().await?;
    std::process::exit(code);
}

/// Cumulative `-d` raises verbosity when `RUST_LOG` isn't set; an explicit
/// `RUST_LOG` always wins.
fn init_logging(debug_count: u8) {
    let default_level = match debug_count {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("gtlssh={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Setup/auth failures exit 1; a clean session always goes through
/// `std::process::exit` inside `run` with the shell's own exit status.
fn exit_code(_e: &ClientError) -> i32 {
    1
}
