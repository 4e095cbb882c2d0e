//! Test doubles for socktun.
//!
//! [`FakeTransport`] stands in for an SSH session:
//! - probe outcomes are scripted per tick, then fall back to a default
//! - each remote address is routed to an echoing peer, a rejection, or a hang
//! - closing it tears down every echo peer, like a dropped session would

use std::collections::{HashMap, VecDeque};
use std::future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use socktun_transport::{Network, Transport, TransportError, TransportStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Buffer size of the in-memory pipe behind each fake stream.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Outcome of one scripted liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The peer acknowledges.
    Ack,
    /// The probe fails with an error right away.
    Fail,
    /// The peer never answers; the caller's timeout decides.
    Hang,
}

type ErrorFactory = Arc<dyn Fn() -> TransportError + Send + Sync>;

/// How the fake answers an `open_stream` for one address.
#[derive(Clone)]
pub enum Route {
    /// Open a stream whose peer echoes every byte back.
    Echo,
    /// Wait, then open an echoing stream.
    EchoAfter(Duration),
    /// Fail with the error produced by the factory.
    Reject(ErrorFactory),
    /// Never complete the open.
    Hang,
}

impl Route {
    /// Reject with a freshly built error on every attempt.
    pub fn reject<F>(factory: F) -> Self
    where
        F: Fn() -> TransportError + Send + Sync + 'static,
    {
        Route::Reject(Arc::new(factory))
    }
}

struct Script {
    probes: VecDeque<ProbeOutcome>,
    default_probe: ProbeOutcome,
    routes: HashMap<String, Route>,
    default_route: Route,
}

/// Scripted in-memory transport.
pub struct FakeTransport {
    name: String,
    script: Mutex<Script>,
    closed: Mutex<bool>,
    close_token: CancellationToken,
    probe_count: AtomicUsize,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
}

impl FakeTransport {
    /// Create a healthy fake: probes succeed, unknown addresses are unreachable.
    pub fn new() -> Self {
        Self::named("fake-transport")
    }

    /// Create a healthy fake with a custom identity for logs.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(Script {
                probes: VecDeque::new(),
                default_probe: ProbeOutcome::Ack,
                routes: HashMap::new(),
                default_route: Route::reject(|| {
                    TransportError::HostUnreachable("no route in fake transport".to_string())
                }),
            }),
            closed: Mutex::new(false),
            close_token: CancellationToken::new(),
            probe_count: AtomicUsize::new(0),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
        }
    }

    /// Queue probe outcomes, consumed one per probe in order.
    pub fn script_probes(&self, outcomes: impl IntoIterator<Item = ProbeOutcome>) {
        self.lock_script().probes.extend(outcomes);
    }

    /// Outcome used once the scripted probes are exhausted.
    pub fn set_default_probe(&self, outcome: ProbeOutcome) {
        self.lock_script().default_probe = outcome;
    }

    /// Route one address.
    pub fn route(&self, address: impl Into<String>, route: Route) {
        self.lock_script().routes.insert(address.into(), route);
    }

    /// Echo on `address`.
    pub fn accept(&self, address: impl Into<String>) {
        self.route(address, Route::Echo);
    }

    /// Route every address without an explicit route.
    pub fn set_default_route(&self, route: Route) {
        self.lock_script().default_route = route;
    }

    /// Number of probes received.
    pub fn probe_count(&self) -> usize {
        self.probe_count.load(Ordering::SeqCst)
    }

    /// Number of `open_stream` calls received, including rejected ones.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Number of `close` calls received.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Simulate the peer dropping the session without a local `close`.
    pub fn sever(&self) {
        self.mark_closed();
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_closed(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        *closed = true;
        self.close_token.cancel();
    }

    fn spawn_echo_peer(&self, address: &str) -> DuplexStream {
        let (local, mut remote) = tokio::io::duplex(PIPE_CAPACITY);
        let closed = self.close_token.clone();
        let address = address.to_string();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = closed.cancelled() => {
                        debug!(address = %address, "Fake peer torn down by transport close");
                        break;
                    }
                    read = remote.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if remote.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    },
                }
            }
        });

        local
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn probe(&self) -> Result<(), TransportError> {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let outcome = {
            let mut script = self.lock_script();
            let default = script.default_probe;
            script.probes.pop_front().unwrap_or(default)
        };

        match outcome {
            ProbeOutcome::Ack => Ok(()),
            ProbeOutcome::Fail => Err(TransportError::Protocol(
                "scripted probe failure".to_string(),
            )),
            ProbeOutcome::Hang => future::pending().await,
        }
    }

    async fn open_stream(
        &self,
        network: Network,
        address: &str,
    ) -> Result<TransportStream, TransportError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !network.is_stream() {
            return Err(TransportError::UnsupportedNetwork(network));
        }

        let route = {
            let script = self.lock_script();
            script
                .routes
                .get(address)
                .cloned()
                .unwrap_or_else(|| script.default_route.clone())
        };

        match route {
            Route::Echo => Ok(Box::new(self.spawn_echo_peer(address))),
            Route::EchoAfter(delay) => {
                tokio::time::sleep(delay).await;
                if self.is_closed() {
                    return Err(TransportError::Closed);
                }
                Ok(Box::new(self.spawn_echo_peer(address)))
            }
            Route::Reject(factory) => Err(factory()),
            Route::Hang => future::pending().await,
        }
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.mark_closed();
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
