//! Command line and environment configuration.

use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use directories::BaseDirs;
use socktun_ssh::{HostKeyPolicy, SshConfig};
use socktun_transport::{join_host_port, split_host_port};
use socktun_tunnel::SupervisorConfig;

use crate::socks5::{ListenerConfig, DEFAULT_MAX_CONNECTIONS};

/// Port used when the SSH address has none.
const DEFAULT_SSH_PORT: u16 = 22;

/// SOCKS5 proxy that sends every connection through one SSH session.
#[derive(Debug, Clone, Parser)]
#[command(name = "socktun")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Private key used to authenticate to the SSH server.
    #[arg(value_name = "KEY_PATH", env = "SOCKTUN_KEY_PATH")]
    pub key_path: PathBuf,

    /// SSH server address (`host[:port]`, port 22 by default).
    #[arg(value_name = "SSH_ADDR", env = "SOCKTUN_SSH_ADDR")]
    pub ssh_addr: String,

    /// Local address the SOCKS5 listener binds to (`host:port` or `:port`).
    #[arg(value_name = "LISTEN_ADDR", env = "SOCKTUN_LISTEN_ADDR")]
    pub listen_addr: String,

    /// SSH login user.
    #[arg(long, env = "SOCKTUN_USER", default_value = "root")]
    pub user: String,

    /// Passphrase for an encrypted private key.
    #[arg(long, env = "SOCKTUN_KEY_PASSPHRASE", hide_env_values = true)]
    pub key_passphrase: Option<String>,

    /// known_hosts file to verify the server key against
    /// (default: ~/.ssh/known_hosts).
    #[arg(long, env = "SOCKTUN_KNOWN_HOSTS", value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,

    /// Accept only the server key with this SHA-256 fingerprint.
    #[arg(
        long,
        env = "SOCKTUN_HOST_KEY_FINGERPRINT",
        value_name = "SHA256:...",
        conflicts_with = "known_hosts"
    )]
    pub host_key_fingerprint: Option<String>,

    /// Accept any server key. Only for trusted networks.
    #[arg(
        long,
        env = "SOCKTUN_INSECURE_IGNORE_HOST_KEY",
        conflicts_with_all = ["known_hosts", "host_key_fingerprint"]
    )]
    pub insecure_ignore_host_key: bool,

    /// Seconds between liveness probes.
    #[arg(long, env = "SOCKTUN_HEARTBEAT_INTERVAL", default_value_t = 60)]
    pub heartbeat_interval: u64,

    /// Seconds to wait for each probe acknowledgement.
    #[arg(long, env = "SOCKTUN_HEARTBEAT_TIMEOUT", default_value_t = 15)]
    pub heartbeat_timeout: u64,

    /// Consecutive probe failures that terminate the session.
    #[arg(long, env = "SOCKTUN_MAX_HEARTBEAT_FAILURES", default_value_t = 3)]
    pub max_heartbeat_failures: u32,

    /// Seconds allowed for connect, key exchange and authentication.
    #[arg(long, env = "SOCKTUN_HANDSHAKE_TIMEOUT", default_value_t = 30)]
    pub handshake_timeout: u64,

    /// Maximum concurrent SOCKS5 clients.
    #[arg(
        long,
        env = "SOCKTUN_MAX_CONNECTIONS",
        default_value_t = DEFAULT_MAX_CONNECTIONS
    )]
    pub max_connections: usize,

    /// Close a relayed connection after this many idle seconds.
    #[arg(long, env = "SOCKTUN_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Resolve domain targets on this host instead of the SSH server.
    #[arg(long, env = "SOCKTUN_RESOLVE_LOCALLY")]
    pub resolve_locally: bool,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, env = "SOCKTUN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[arg(long, env = "SOCKTUN_LOG_JSON")]
    pub log_json: bool,
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub ssh: SshConfig,
    pub supervisor: SupervisorConfig,
    pub listener: ListenerConfig,
    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let address = normalize_ssh_address(&args.ssh_addr)?;
        let host_key_policy = host_key_policy(&args)?;

        if args.handshake_timeout == 0 {
            bail!("--handshake-timeout must be greater than zero");
        }
        if args.max_connections == 0 {
            bail!("--max-connections must be greater than zero");
        }
        if args.idle_timeout == Some(0) {
            bail!("--idle-timeout must be greater than zero");
        }

        let supervisor = SupervisorConfig::new(
            Duration::from_secs(args.heartbeat_interval),
            args.max_heartbeat_failures,
        )
        .with_probe_timeout(Duration::from_secs(args.heartbeat_timeout));
        supervisor
            .validate()
            .context("invalid heartbeat configuration")?;

        let bind_addr = parse_listen_addr(&args.listen_addr)?;
        let listener = ListenerConfig {
            bind_addr,
            max_connections: args.max_connections,
            idle_timeout: args.idle_timeout.map(Duration::from_secs),
            resolve_locally: args.resolve_locally,
        };

        let ssh = SshConfig {
            address,
            user: args.user,
            key_path: args.key_path,
            key_passphrase: args.key_passphrase,
            host_key_policy,
            handshake_timeout: Duration::from_secs(args.handshake_timeout),
        };

        Ok(Self {
            ssh,
            supervisor,
            listener,
            log_level: args.log_level,
            log_json: args.log_json,
        })
    }
}

fn host_key_policy(args: &Args) -> Result<HostKeyPolicy> {
    if args.insecure_ignore_host_key {
        return Ok(HostKeyPolicy::InsecureAcceptAny);
    }
    if let Some(fingerprint) = &args.host_key_fingerprint {
        return Ok(HostKeyPolicy::Fingerprint(fingerprint.clone()));
    }
    let path = match &args.known_hosts {
        Some(path) => path.clone(),
        None => default_known_hosts()?,
    };
    Ok(HostKeyPolicy::KnownHosts(path))
}

fn default_known_hosts() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Could not determine home directory; pass --known-hosts or --host-key-fingerprint"
            )
        })
}

/// Accept `host:port`, `[v6]:port`, or a bare host that gets port 22.
fn normalize_ssh_address(address: &str) -> Result<String> {
    if split_host_port(address).is_ok() {
        return Ok(address.to_string());
    }

    let host = address
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(address);
    let bare = !host.is_empty() && (!host.contains(':') || host.parse::<Ipv6Addr>().is_ok());
    if !bare {
        bail!("invalid SSH address: {}", address);
    }
    Ok(join_host_port(host, DEFAULT_SSH_PORT))
}

/// `:port` binds every interface.
fn parse_listen_addr(address: &str) -> Result<SocketAddr> {
    let full = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };
    full.parse()
        .with_context(|| format!("invalid listen address: {}", address))
}
