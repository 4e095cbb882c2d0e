//! Server host key verification.

use std::fmt;
use std::path::PathBuf;

use russh_keys::key::PublicKey;
use tracing::{debug, warn};

use crate::error::SshError;

/// How the server's host key is checked during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept only keys listed for the host in an OpenSSH known_hosts file.
    KnownHosts(PathBuf),
    /// Accept only the key with this SHA-256 fingerprint
    /// (`SHA256:...` as printed by `ssh-keygen -lf`, prefix optional).
    Fingerprint(String),
    /// Accept any key. Exposes the session to man-in-the-middle attacks.
    InsecureAcceptAny,
}

impl HostKeyPolicy {
    /// Check `key` presented by `host:port` against this policy.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let fingerprint = key.fingerprint();
        match self {
            HostKeyPolicy::KnownHosts(path) => {
                match russh_keys::check_known_hosts_path(host, port, key, path) {
                    Ok(true) => {
                        debug!(
                            host,
                            port,
                            fingerprint = %fingerprint,
                            "Host key found in known_hosts"
                        );
                        Ok(())
                    }
                    Ok(false) => Err(SshError::HostKey(format!(
                        "{}:{} (SHA256:{}) is not in {}",
                        host,
                        port,
                        fingerprint,
                        path.display()
                    ))),
                    Err(e) => Err(SshError::HostKey(format!(
                        "{}:{} (SHA256:{}) failed known_hosts check: {}",
                        host, port, fingerprint, e
                    ))),
                }
            }
            HostKeyPolicy::Fingerprint(expected) => {
                if normalize_fingerprint(expected) == normalize_fingerprint(&fingerprint) {
                    Ok(())
                } else {
                    Err(SshError::HostKey(format!(
                        "{}:{} presented SHA256:{}, expected {}",
                        host, port, fingerprint, expected
                    )))
                }
            }
            HostKeyPolicy::InsecureAcceptAny => {
                warn!(
                    host,
                    port,
                    fingerprint = %fingerprint,
                    "Accepting unverified host key"
                );
                Ok(())
            }
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::KnownHosts(path) => write!(f, "known_hosts({})", path.display()),
            HostKeyPolicy::Fingerprint(fp) => write!(f, "fingerprint({})", fp),
            HostKeyPolicy::InsecureAcceptAny => f.write_str("insecure_accept_any"),
        }
    }
}

fn normalize_fingerprint(fp: &str) -> &str {
    let fp = fp.trim();
    fp.strip_prefix("SHA256:")
        .unwrap_or(fp)
        .trim_end_matches('=')
}
