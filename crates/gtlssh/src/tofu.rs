//! Trust-on-first-use certificate pinning.
//!
//! The `ssl` filter's [`spark_filter_tls`] verifier accepts every
//! certificate the handshake presents (`AcceptAnyServerCert`, see
//! `DESIGN.md`) — the real trust decision happens here, by comparing the
//! presented certificate's raw DER bytes against files pinned the first time
//! a host was seen, one keyed on `host,port` and one on the resolved address.
//! This is invoked from the session's `PostCertVerify` event handling.
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::warn;

use crate::credentials::days_until_expiry;
use crate::error::{ClientError, Result};
use crate::prompt;

pub struct PinPaths {
    host_pin: PathBuf,
    addr_pin: PathBuf,
    same_pin: bool,
}

fn pin_paths(server_certs_dir: &Path, host: &str, port: u16, raddr: &str) -> PinPaths {
    let host_pin = server_certs_dir.join(format!("{host},{port}.crt"));
    let addr_pin = server_certs_dir.join(format!("{raddr}.crt"));
    PinPaths {
        same_pin: host_pin == addr_pin,
        host_pin,
        addr_pin,
    }
}

/// Verifies the server certificate presented for this connection, prompting
/// the user interactively when a pin is missing or ambiguous. Returns
/// `Ok(())` to proceed, or [`ClientError::Tofu`] to abort the connection.
pub fn verify_pinned(
    server_certs_dir: &Path,
    host: &str,
    port: u16,
    raddr: &str,
    cert_der: &[u8],
    fingerprint_hex: &str,
) -> Result<()> {
    let pins = pin_paths(server_certs_dir, host, port, raddr);

    let host_pin = read_pin(&pins.host_pin)?;
    let addr_pin = if pins.same_pin { host_pin.clone() } else { read_pin(&pins.addr_pin)? };

    let host_match = host_pin.as_deref().map(|p| p == cert_der);
    let addr_match = addr_pin.as_deref().map(|p| p == cert_der);

    // Either pin on file but not matching this certificate: a hard refusal,
    // since that pin was presumably recorded against the genuine server.
    if host_match == Some(false) || addr_match == Some(false) {
        return Err(ClientError::Tofu(format!(
            "certificate for {host} does not match the pinned certificate in {}; it may have \
             changed legitimately, or this may be an impersonation attempt. Remove the pin \
             file if you are sure it is safe, then reconnect",
            server_certs_dir.display()
        )));
    }

    check_remote_expiry(host, cert_der);

    match (host_match, addr_match) {
        (Some(true), Some(true)) => Ok(()),
        (Some(true), None) => {
            println!("\nCertificate for {host} found and correct, but the address file was\nmissing for\n  {raddr}");
            confirm_and_pin(&pins, cert_der, WhichMissing::Addr)
        }
        (None, Some(true)) => {
            println!("\nCertificate for {host} found and correct, but the address file was\nmissing for it.");
            confirm_and_pin(&pins, cert_der, WhichMissing::Host)
        }
        (None, None) => {
            print!("Certificate for {host}");
            if host != raddr {
                print!(" {raddr}");
            }
            println!(" is not present, fingerprint is:\n{fingerprint_hex}");
            println!("Please validate the fingerprint and verify if you want it added to the set of valid servers.");
            confirm_and_pin(&pins, cert_der, WhichMissing::Both)
        }
        // host_match/addr_match can't independently be Some(false) here; the
        // hard-refusal check above already returned for that case.
        _ => unreachable!(),
    }
}

enum WhichMissing {
    Host,
    Addr,
    Both,
}

fn confirm_and_pin(pins: &PinPaths, cert_der: &[u8], missing: WhichMissing) -> Result<()> {
    println!("It is possible that the same key is used for different connections,\nbut there may also be a man in the middle");
    println!("Verify carefully, add if it is ok.");
    if !prompt::confirm("Add this certificate?")? {
        return Err(ClientError::Tofu("user declined to trust the presented certificate".to_string()));
    }
    match missing {
        WhichMissing::Host => write_pin(&pins.host_pin, cert_der)?,
        WhichMissing::Addr => {
            if !pins.same_pin {
                write_pin(&pins.addr_pin, cert_der)?;
            }
        }
        WhichMissing::Both => {
            write_pin(&pins.host_pin, cert_der)?;
            if !pins.same_pin {
                write_pin(&pins.addr_pin, cert_der)?;
            }
        }
    }
    if let Some(dir) = pins.host_pin.parent() {
        best_effort_rehash(dir);
    }
    Ok(())
}

/// Runs `gtlssh-keygen rehash <dir>` after a pin write, best-effort: a
/// missing or failing `gtlssh-keygen` only gets a warning, never aborts the
/// connection the pin write already secured.
fn best_effort_rehash(dir: &Path) {
    match Command::new("gtlssh-keygen").arg("rehash").arg(dir).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(%status, dir = %dir.display(), "gtlssh-keygen rehash exited non-zero, continuing anyway"),
        Err(e) => warn!(error = %e, dir = %dir.display(), "could not run gtlssh-keygen rehash, continuing anyway"),
    }
}

/// Warns when the server's certificate is within 30 days of expiry,
/// independent of whether it matches a pin.
fn check_remote_expiry(host: &str, cert_der: &[u8]) {
    if let Some(days) = days_until_expiry(cert_der) {
        if days < 30 {
            warn!(host, days, "server certificate will expire soon");
        }
    }
}

fn read_pin(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Refuses to silently clobber an existing pin; a pre-existing file at this
/// exact path with different contents would already have been caught above,
/// so `create_new` here is a defense against a lost race, not the common case.
fn write_pin(path: &Path, der: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().write(true).create_new(true).mode(0o644).open(path)?;
    file.write_all(der)?;
    Ok(())
}
