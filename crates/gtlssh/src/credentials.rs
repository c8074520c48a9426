//! Client credential discovery and validation: which certificate/key pair to
//! present, and the local sanity checks that catch a world-readable private
//! key before it ever reaches the TLS layer.
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::Uid;
use tracing::warn;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

pub struct Credentials {
    pub ca_dir: PathBuf,
    pub certfile: PathBuf,
    pub keyfile: PathBuf,
}

/// Walks the credential fallback chain: a pair scoped to `host,port`, then
/// one scoped to just `host`, then the directory-wide default. The first
/// pair whose certificate file exists wins.
pub fn discover(cfg: &ClientConfig) -> Result<Credentials> {
    let ca_dir = cfg.server_certs_dir();
    let keycerts = cfg.keycerts_dir();

    let (certfile, keyfile) = if let (Some(cert), Some(key)) = (&cfg.certfile, &cfg.keyfile) {
        (cert.clone(), key.clone())
    } else {
        let scoped = keycerts.join(format!("{},{}.crt", cfg.host, cfg.port));
        let host_only = keycerts.join(format!("{}.crt", cfg.host));
        let default = cfg.tlssh_dir.join("default.crt");

        if scoped.is_file() {
            (scoped, keycerts.join(format!("{},{}.key", cfg.host, cfg.port)))
        } else if host_only.is_file() {
            (host_only, keycerts.join(format!("{}.key", cfg.host)))
        } else {
            (default, cfg.tlssh_dir.join("default.key"))
        }
    };

    checkout_dir(&ca_dir)?;
    checkout_file(&certfile, false)?;
    checkout_file(&keyfile, true)?;

    if !certfile.is_file() || !keyfile.is_file() {
        return Err(ClientError::NoCredentials(cfg.tlssh_dir.clone()));
    }

    check_local_expiry(&certfile);

    Ok(Credentials { ca_dir, certfile, keyfile })
}

/// A CA/pin directory must exist and be a directory; gtlssh never creates it
/// implicitly, since a missing `server_certs/` means no pins have ever been
/// recorded for this user.
fn checkout_dir(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        return Err(ClientError::Config(format!("{} is not a directory", path.display())));
    }
    Ok(())
}

/// Private keys must be mode 0600 and owned by the invoking user; anything
/// looser means another local user, or a misconfigured umask, could read it.
fn checkout_file(path: &Path, is_key: bool) -> Result<()> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) if !is_key => return Ok(()), // absence is handled by the fallback chain above
        Err(e) => return Err(e.into()),
    };
    if is_key {
        let mode = meta.permissions().mode() & 0o777;
        if mode != 0o600 || meta.uid() != Uid::current().as_raw() {
            return Err(ClientError::KeyPermissions { path: path.to_path_buf() });
        }
    }
    Ok(())
}

fn check_local_expiry(certfile: &Path) {
    let pem = match fs::read_to_string(certfile) {
        Ok(p) => p,
        Err(_) => return,
    };
    match der_from_pem(&pem).and_then(|der| days_until_expiry(&der)) {
        Some(days) if days < 30 => {
            warn!(path = %certfile.display(), days, "local certificate will expire soon");
        }
        _ => {}
    }
}

/// Strips PEM armor and base64-decodes the single certificate block.
fn der_from_pem(pem: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    let start = pem.find("-----BEGIN CERTIFICATE-----")?;
    let end = pem.find("-----END CERTIFICATE-----")?;
    let body: String = pem[start..end]
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect();
    base64::engine::general_purpose::STANDARD.decode(body.trim()).ok()
}

/// Days remaining until `der`'s `notAfter`, negative if already expired.
/// Shared with [`crate::tofu`]'s remote-certificate expiry check.
pub fn days_until_expiry(der: &[u8]) -> Option<i64> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let not_after = cert.validity().not_after.timestamp();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Some((not_after - now) / 86_400)
}
