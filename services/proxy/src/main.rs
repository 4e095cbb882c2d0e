//! socktun
//!
//! Local SOCKS5 proxy whose outbound connections all travel through one SSH
//! session. A liveness supervisor probes the session; once it gives up, every
//! tunneled connection is aborted and the process exits non-zero so a service
//! manager can restart it.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use socktun_proxy::config::{Args, Config};
use socktun_proxy::socks5::Socks5Listener;
use socktun_ssh::{HostKeyPolicy, SshTransport};
use socktun_transport::Transport;
use socktun_tunnel::{Dialer, LivenessSupervisor, SupervisorExit};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args(Args::parse())?;

    init_tracing(&config);

    info!(
        ssh_addr = %config.ssh.address,
        user = %config.ssh.user,
        listen_addr = %config.listener.bind_addr,
        host_key_policy = %config.ssh.host_key_policy,
        "Starting socktun"
    );
    if config.ssh.host_key_policy == HostKeyPolicy::InsecureAcceptAny {
        warn!("Host key verification is disabled");
    }

    let ssh_addr = config.ssh.address.clone();
    let transport = SshTransport::connect(config.ssh.clone())
        .await
        .with_context(|| format!("Failed to connect to SSH server {}", ssh_addr))?;
    let transport = Arc::new(transport);
    info!(transport = %transport.describe(), "SSH session established");

    let supervisor = LivenessSupervisor::spawn(Arc::clone(&transport), config.supervisor.clone())
        .context("Failed to start liveness supervisor")?;
    let signal = supervisor.signal();
    let dialer = Arc::new(Dialer::new(Arc::clone(&transport), Arc::clone(&signal)));

    let bind_addr = config.listener.bind_addr;
    let bound = Socks5Listener::bind(config.listener.clone(), Arc::clone(&dialer));
    let listener = match bound.await {
        Ok(listener) => Arc::new(listener),
        Err(e) => {
            supervisor.shutdown().await;
            return Err(e).with_context(|| format!("Failed to bind listener on {}", bind_addr));
        }
    };

    let shutdown = CancellationToken::new();
    let listener_handle = tokio::spawn({
        let listener = Arc::clone(&listener);
        let shutdown = shutdown.clone();
        async move { listener.run(shutdown).await }
    });

    let terminated = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        _ = signal.terminated() => {
            error!("SSH session terminated by liveness supervisor");
            true
        }
    };

    shutdown.cancel();
    match listener_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "SOCKS5 listener error"),
        Err(e) => error!(error = %e, "SOCKS5 listener task panicked"),
    }

    let exit = supervisor.shutdown().await;
    transport.close().await;

    let stats = listener.stats();
    let dials = dialer.stats().snapshot();
    info!(
        ?exit,
        connections_accepted = stats.connections_accepted.load(Ordering::Relaxed),
        connections_rejected = stats.connections_rejected.load(Ordering::Relaxed),
        handshake_failed = stats.handshake_failed.load(Ordering::Relaxed),
        dials_attempted = dials.attempted,
        dials_succeeded = dials.succeeded,
        dials_failed = dials.failed,
        dials_rejected_terminated = dials.rejected_terminated,
        bytes_to_remote = stats.bytes_to_remote.load(Ordering::Relaxed),
        bytes_from_remote = stats.bytes_from_remote.load(Ordering::Relaxed),
        "socktun shutdown complete"
    );

    if terminated {
        if let SupervisorExit::FailureThreshold {
            consecutive_failures,
        } = exit
        {
            anyhow::bail!(
                "SSH session lost after {} consecutive heartbeat failures",
                consecutive_failures
            );
        }
        anyhow::bail!("SSH session lost");
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let level = config.log_level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    let (json, plain) = if config.log_json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}
