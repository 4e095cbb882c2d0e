//! SOCKS5 accept loop and per-connection handling.
//!
//! Each accepted client runs in its own task:
//! 1. method negotiation (no authentication)
//! 2. request parsing, CONNECT only
//! 3. one dial through the tunnel, mapped to a reply code
//! 4. byte relay until either side closes

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socktun_transport::Network;
use socktun_tunnel::Dial;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::error::Socks5Error;
use super::protocol::{
    read_greeting, read_request, write_method, write_reply, Command, ReplyCode, Request,
    TargetAddr, METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH,
};
use super::relay::relay;

/// Default maximum concurrent client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent client connections. Extra clients are dropped.
    pub max_connections: usize,
    /// Close a relay direction after this long without data.
    pub idle_timeout: Option<Duration>,
    /// Resolve domain targets on this host instead of the remote one.
    pub resolve_locally: bool,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: None,
            resolve_locally: false,
        }
    }
}

/// Listener counters.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Client connections accepted.
    pub connections_accepted: AtomicU64,
    /// Client connections currently open.
    pub connections_active: AtomicU64,
    /// Client connections finished.
    pub connections_closed: AtomicU64,
    /// Clients dropped because the connection limit was reached.
    pub connections_rejected: AtomicU64,
    /// Clients that failed negotiation or sent an unsupported request.
    pub handshake_failed: AtomicU64,
    /// CONNECT requests answered with success.
    pub dial_succeeded: AtomicU64,
    /// CONNECT requests answered with a failure reply.
    pub dial_failed: AtomicU64,
    /// Bytes relayed from clients to targets.
    pub bytes_to_remote: AtomicU64,
    /// Bytes relayed from targets to clients.
    pub bytes_from_remote: AtomicU64,
}

/// SOCKS5 front-end over any [`Dial`] implementation.
pub struct Socks5Listener<D: Dial> {
    config: ListenerConfig,
    listener: TcpListener,
    dialer: Arc<D>,
    conn_semaphore: Arc<Semaphore>,
    stats: Arc<ListenerStats>,
}

impl<D: Dial> Socks5Listener<D> {
    /// Bind the listening socket.
    pub async fn bind(config: ListenerConfig, dialer: Arc<D>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            resolve_locally = config.resolve_locally,
            "SOCKS5 listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            config,
            dialer,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Accept clients until `shutdown` is cancelled.
    ///
    /// Connections already accepted keep running in their own tasks.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "SOCKS5 listener started");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(bind_addr = %local_addr, "SOCKS5 listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let permit = match Arc::clone(&self.conn_semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(
                                peer_addr = %peer_addr,
                                "Connection rejected: max connections reached"
                            );
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let listener = Arc::clone(&self);
                    tokio::spawn(
                        async move {
                            if let Err(e) = listener.handle_connection(stream).await {
                                debug!(error = %e, "Connection error");
                            }

                            listener
                                .stats
                                .connections_active
                                .fetch_sub(1, Ordering::Relaxed);
                            listener
                                .stats
                                .connections_closed
                                .fetch_add(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("socks5", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_connection(&self, mut client: TcpStream) -> Result<(), Socks5Error> {
        let request = match negotiate(&mut client).await {
            Ok(request) => request,
            Err(e) => {
                self.stats.handshake_failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let address = match self.resolve(&request.target).await {
            Ok(address) => address,
            Err(e) => {
                self.stats.dial_failed.fetch_add(1, Ordering::Relaxed);
                write_reply(&mut client, ReplyCode::HostUnreachable).await?;
                return Err(e);
            }
        };

        let remote = match self.dialer.dial(Network::Tcp, &address).await {
            Ok(remote) => remote,
            Err(e) => {
                self.stats.dial_failed.fetch_add(1, Ordering::Relaxed);
                let code = ReplyCode::from(&e);
                let reply = code as u8;
                debug!(
                    dest = %address,
                    reason = e.reason_code(),
                    reply,
                    "CONNECT failed"
                );
                write_reply(&mut client, code).await?;
                return Err(e.into());
            }
        };

        self.stats.dial_succeeded.fetch_add(1, Ordering::Relaxed);
        write_reply(&mut client, ReplyCode::Succeeded).await?;
        debug!(dest = %address, "CONNECT established");

        let outcome = relay(client, remote, self.config.idle_timeout).await;

        self.stats
            .bytes_to_remote
            .fetch_add(outcome.bytes_to_remote, Ordering::Relaxed);
        self.stats
            .bytes_from_remote
            .fetch_add(outcome.bytes_from_remote, Ordering::Relaxed);

        debug!(
            dest = %address,
            bytes_to_remote = outcome.bytes_to_remote,
            bytes_from_remote = outcome.bytes_from_remote,
            "Connection closed"
        );

        match outcome.error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Turn the request target into the address handed to the dialer.
    async fn resolve(&self, target: &TargetAddr) -> Result<String, Socks5Error> {
        match target {
            TargetAddr::Domain(host, _) if self.config.resolve_locally => {
                let mut addrs = tokio::net::lookup_host(target.to_address())
                    .await
                    .map_err(|e| Socks5Error::Resolve {
                        host: host.clone(),
                        reason: e.to_string(),
                    })?;
                let addr = addrs.next().ok_or_else(|| Socks5Error::Resolve {
                    host: host.clone(),
                    reason: "no addresses".to_string(),
                })?;
                debug!(host = %host, resolved = %addr, "Resolved target locally");
                Ok(addr.to_string())
            }
            _ => Ok(target.to_address()),
        }
    }
}

/// Run method negotiation and read a CONNECT request.
///
/// Unsupported methods, commands and address types are answered on the
/// wire before the error is returned.
async fn negotiate(client: &mut TcpStream) -> Result<Request, Socks5Error> {
    let methods = read_greeting(client).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        write_method(client, METHOD_NO_ACCEPTABLE).await?;
        return Err(Socks5Error::NoAcceptableMethod);
    }
    write_method(client, METHOD_NO_AUTH).await?;

    let request = match read_request(client).await {
        Ok(request) => request,
        Err(e @ Socks5Error::UnsupportedAddressType(_)) => {
            write_reply(client, ReplyCode::AddressTypeNotSupported).await?;
            return Err(e);
        }
        Err(e @ Socks5Error::InvalidDomain) => {
            write_reply(client, ReplyCode::GeneralFailure).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    if request.command != Command::Connect {
        write_reply(client, ReplyCode::CommandNotSupported).await?;
        return Err(Socks5Error::UnsupportedCommand(request.command.code()));
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::new("127.0.0.1:1080".parse().unwrap());
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(config.idle_timeout.is_none());
        assert!(!config.resolve_locally);
    }

    #[test]
    fn test_listener_stats() {
        let stats = ListenerStats::default();
        stats.handshake_failed.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.handshake_failed.load(Ordering::Relaxed), 1);
    }
}
