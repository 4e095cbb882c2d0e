//! SSH session as a socktun transport.
//!
//! - probe: open a session channel and close it again; the server has to
//!   answer the open, so an acknowledged open proves the peer is alive
//! - streams: one `direct-tcpip` channel per dial
//! - close: disconnect the session; every channel dies with it

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelOpenFailure, Disconnect};
use russh_keys::key::PublicKey;
use socktun_transport::{split_host_port, Network, Transport, TransportError, TransportStream};
use tracing::{debug, info};

use crate::error::SshError;
use crate::host_key::HostKeyPolicy;

/// Default bound on connect, key exchange and authentication.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Originator reported to the server for `direct-tcpip` channels.
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";
const ORIGINATOR_PORT: u32 = 0;

/// Parameters for establishing an SSH session.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Server address (`host:port`).
    pub address: String,
    /// Login user.
    pub user: String,
    /// Private key file (OpenSSH or PEM).
    pub key_path: PathBuf,
    /// Passphrase for an encrypted private key.
    pub key_passphrase: Option<String>,
    /// Server host key policy.
    pub host_key_policy: HostKeyPolicy,
    /// Bound on connect, key exchange and authentication.
    pub handshake_timeout: Duration,
}

/// russh client callbacks: host key verification only.
struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.policy
            .verify(&self.host, self.port, server_public_key)
            .map(|()| true)
    }
}

/// An authenticated SSH session.
pub struct SshTransport {
    handle: Handle<ClientHandler>,
    identity: String,
    closed: AtomicBool,
}

impl SshTransport {
    /// Connect, verify the host key and authenticate with the private key.
    ///
    /// The whole sequence is bounded by `config.handshake_timeout`.
    pub async fn connect(config: SshConfig) -> Result<Self, SshError> {
        let (host, port) = split_host_port(&config.address)
            .map_err(|_| SshError::InvalidAddress(config.address.clone()))?;

        let key_path = config.key_path.display();
        let key = russh_keys::load_secret_key(&config.key_path, config.key_passphrase.as_deref())
            .map_err(|e| SshError::Key(format!("{}: {}", key_path, e)))?;

        let handler = ClientHandler {
            host: host.to_string(),
            port,
            policy: config.host_key_policy.clone(),
        };
        let ssh_config = Arc::new(client::Config::default());
        let identity = format!("{}@{}", config.user, config.address);

        info!(
            address = %config.address,
            user = %config.user,
            host_key_policy = %config.host_key_policy,
            "Connecting to SSH server"
        );

        let handshake = async {
            let mut handle = client::connect(ssh_config, (host, port), handler).await?;
            let authenticated = handle
                .authenticate_publickey(config.user.clone(), Arc::new(key))
                .await?;
            if !authenticated {
                return Err(SshError::Authentication {
                    user: config.user.clone(),
                });
            }
            Ok::<_, SshError>(handle)
        };

        let handle = tokio::time::timeout(config.handshake_timeout, handshake)
            .await
            .map_err(|_| SshError::HandshakeTimeout(config.handshake_timeout))??;

        info!(identity = %identity, "SSH session established");

        Ok(Self {
            handle,
            identity,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn probe(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(map_ssh_error)?;
        if let Err(e) = channel.close().await {
            debug!(error = %e, "Failed to close probe channel");
        }
        Ok(())
    }

    async fn open_stream(
        &self,
        network: Network,
        address: &str,
    ) -> Result<TransportStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !network.is_stream() {
            return Err(TransportError::UnsupportedNetwork(network));
        }
        let (host, port) = split_host_port(address)?;

        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), ORIGINATOR_ADDRESS, ORIGINATOR_PORT)
            .await
            .map_err(|e| map_open_error(e, address))?;

        Ok(Box::new(Box::pin(channel.into_stream())))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "socktun closing", "en")
            .await
        {
            debug!(error = %e, "SSH disconnect failed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.handle.is_closed()
    }

    fn describe(&self) -> String {
        self.identity.clone()
    }
}

/// Map a failed `direct-tcpip` open, keeping the remote's reason.
fn map_open_error(err: russh::Error, address: &str) -> TransportError {
    match err {
        russh::Error::ChannelOpenFailure(reason) => match reason {
            ChannelOpenFailure::ConnectFailed => TransportError::ConnectFailed(address.to_string()),
            ChannelOpenFailure::AdministrativelyProhibited => {
                TransportError::Prohibited(address.to_string())
            }
            other => TransportError::ConnectFailed(format!("{} ({:?})", address, other)),
        },
        other => map_ssh_error(other),
    }
}

fn map_ssh_error(err: russh::Error) -> TransportError {
    match err {
        russh::Error::Disconnect | russh::Error::SendError => TransportError::Closed,
        russh::Error::ConnectionTimeout => TransportError::TimedOut,
        russh::Error::IO(e) => TransportError::Io(e),
        other => TransportError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_open_failure_mapping() {
        let err = map_open_error(
            russh::Error::ChannelOpenFailure(ChannelOpenFailure::ConnectFailed),
            "10.0.0.9:9999",
        );
        let TransportError::ConnectFailed(address) = &err else {
            panic!("unexpected error: {:?}", err);
        };
        assert_eq!(address, "10.0.0.9:9999");

        let err = map_open_error(
            russh::Error::ChannelOpenFailure(ChannelOpenFailure::AdministrativelyProhibited),
            "10.0.0.9:25",
        );
        assert!(matches!(err, TransportError::Prohibited(_)));

        let err = map_open_error(
            russh::Error::ChannelOpenFailure(ChannelOpenFailure::ResourceShortage),
            "10.0.0.9:25",
        );
        assert!(matches!(err, TransportError::ConnectFailed(_)));
        assert!(!err.is_transport_fatal());
    }

    #[test]
    fn test_session_error_mapping() {
        assert!(matches!(
            map_ssh_error(russh::Error::Disconnect),
            TransportError::Closed
        ));
        assert!(matches!(
            map_ssh_error(russh::Error::SendError),
            TransportError::Closed
        ));
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let mapped = map_ssh_error(russh::Error::IO(io));
        assert!(matches!(mapped, TransportError::Io(_)));
    }
}
