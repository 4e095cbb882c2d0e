//! Dial multiplexer behavior: passthrough, fail-fast, concurrency and
//! shutdown propagation.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use socktun_testing::{FakeTransport, ProbeOutcome, Route};
use socktun_transport::{Network, TransportError};
use socktun_tunnel::{
    Dial, DialError, Dialer, LivenessSupervisor, SupervisorConfig, SupervisorHandle,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};

/// Supervisor with a short period so tests can flip the fake to failing and
/// see the transport terminated quickly.
fn supervise(fake: &Arc<FakeTransport>) -> (SupervisorHandle, Dialer<FakeTransport>) {
    let config = SupervisorConfig::new(Duration::from_millis(20), 1)
        .with_probe_timeout(Duration::from_millis(20));
    let handle = LivenessSupervisor::spawn(Arc::clone(fake), config).unwrap();
    let dialer = Dialer::new(Arc::clone(fake), handle.signal());
    (handle, dialer)
}

async fn terminate(fake: &FakeTransport, handle: &SupervisorHandle) {
    fake.set_default_probe(ProbeOutcome::Fail);
    timeout(Duration::from_secs(2), handle.signal().terminated())
        .await
        .expect("transport should terminate");
}

#[tokio::test]
async fn dial_returns_echoing_stream() {
    let fake = Arc::new(FakeTransport::new());
    fake.accept("10.0.0.5:80");
    let (_handle, dialer) = supervise(&fake);

    let mut stream = dialer.dial(Network::Tcp, "10.0.0.5:80").await.unwrap();
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

    let mut buf = vec![0u8; 18];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, b"GET / HTTP/1.0\r\n\r\n");

    let stats = dialer.stats().snapshot();
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn refused_dial_is_passed_through_and_service_continues() {
    let fake = Arc::new(FakeTransport::new());
    fake.accept("10.0.0.5:80");
    fake.route(
        "10.0.0.9:9999",
        Route::reject(|| TransportError::ConnectionRefused("10.0.0.9:9999".into())),
    );
    let (_handle, dialer) = supervise(&fake);

    let err = dialer
        .dial(Network::Tcp, "10.0.0.9:9999")
        .await
        .unwrap_err();
    match &err {
        DialError::Transport(TransportError::ConnectionRefused(addr)) => {
            assert_eq!(addr, "10.0.0.9:9999")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.to_string(), "connection refused: 10.0.0.9:9999");

    let mut stream = dialer.dial(Network::Tcp, "10.0.0.5:80").await.unwrap();
    stream.write_all(b"still serving").await.unwrap();
    let mut buf = [0u8; 13];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still serving");

    let stats = dialer.stats().snapshot();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn dial_after_termination_fails_without_touching_transport() {
    let fake = Arc::new(FakeTransport::new());
    fake.accept("10.0.0.5:80");
    let (handle, dialer) = supervise(&fake);

    terminate(&fake, &handle).await;
    let opens_before = fake.open_count();

    for _ in 0..10 {
        let err = dialer.dial(Network::Tcp, "10.0.0.5:80").await.unwrap_err();
        assert!(matches!(err, DialError::TransportUnavailable));
    }

    assert_eq!(fake.open_count(), opens_before);
    assert!(!dialer.is_available());
    assert_eq!(dialer.stats().snapshot().rejected_terminated, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dials_complete_independently() {
    let fake = Arc::new(FakeTransport::new());
    fake.set_default_route(Route::Echo);
    fake.route("10.1.0.0:1", Route::EchoAfter(Duration::from_secs(5)));
    let (_handle, dialer) = supervise(&fake);

    // One slow dial in flight while the others run.
    let slow = tokio::spawn({
        let dialer = dialer.clone();
        async move { dialer.dial(Network::Tcp, "10.1.0.0:1").await }
    });

    let start = Instant::now();
    let dials = (0..128u32).map(|i| {
        let dialer = dialer.clone();
        tokio::spawn(async move {
            let address = format!("10.2.{}.{}:{}", i / 256, i % 256, 1000 + i);
            let mut stream = dialer.dial(Network::Tcp, &address).await?;
            let payload = address.into_bytes();
            stream.write_all(&payload).await?;
            let mut buf = vec![0u8; payload.len()];
            stream.read_exact(&mut buf).await?;
            assert_eq!(buf, payload);
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
        })
    });

    let results = timeout(Duration::from_secs(2), join_all(dials))
        .await
        .expect("fast dials must not wait on the slow one");
    for result in results {
        result.unwrap().unwrap();
    }
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!slow.is_finished());

    slow.abort();
}

#[tokio::test]
async fn open_streams_fail_promptly_on_termination() {
    const STREAMS: usize = 16;

    let fake = Arc::new(FakeTransport::new());
    fake.set_default_route(Route::Echo);
    let (handle, dialer) = supervise(&fake);

    let mut streams = Vec::new();
    for i in 0..STREAMS {
        let address = format!("10.3.0.{}:80", i);
        streams.push(dialer.dial(Network::Tcp, &address).await.unwrap());
    }

    // Half of the streams are blocked in a read when the transport dies.
    let mut readers = Vec::new();
    for mut stream in streams.drain(..STREAMS / 2) {
        readers.push(tokio::spawn(async move {
            let mut buf = [0u8; 16];
            stream.read(&mut buf).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    terminate(&fake, &handle).await;

    for reader in readers {
        let result = timeout(Duration::from_secs(1), reader)
            .await
            .expect("blocked read must unblock")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);
    }

    for mut stream in streams {
        assert!(stream.is_aborted());
        let err = stream.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}

#[tokio::test]
async fn dial_racing_termination_fails() {
    let fake = Arc::new(FakeTransport::new());
    fake.route("10.4.0.1:80", Route::EchoAfter(Duration::from_millis(300)));
    let (handle, dialer) = supervise(&fake);

    let in_flight = tokio::spawn({
        let dialer = dialer.clone();
        async move { dialer.dial(Network::Tcp, "10.4.0.1:80").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    terminate(&fake, &handle).await;

    let result = timeout(Duration::from_secs(2), in_flight)
        .await
        .expect("in-flight dial must finish")
        .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn dial_trait_object_uses_same_path() {
    async fn through_trait<D: Dial>(dialer: &D) -> Result<D::Stream, DialError> {
        dialer.dial(Network::Tcp, "10.0.0.5:80").await
    }

    let fake = Arc::new(FakeTransport::new());
    fake.accept("10.0.0.5:80");
    let (_handle, dialer) = supervise(&fake);

    let mut stream = through_trait(&dialer).await.unwrap();
    stream.write_all(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");
}
