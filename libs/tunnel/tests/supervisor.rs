//! Liveness supervisor behavior against the scripted fake transport.
//!
//! Time is paused: tokio advances the clock whenever every task is idle, so
//! tick arithmetic is exact.

use std::sync::Arc;
use std::time::Duration;

use socktun_testing::{FakeTransport, ProbeOutcome};
use socktun_transport::Transport;
use socktun_tunnel::{LivenessStatus, LivenessSupervisor, SupervisorConfig, SupervisorExit};
use tokio::time::Instant;

fn config(interval_ms: u64, max_failures: u32) -> SupervisorConfig {
    SupervisorConfig::new(Duration::from_millis(interval_ms), max_failures)
}

#[tokio::test(start_paused = true)]
async fn failure_counter_resets_on_success_and_terminates_after_sixth_tick() {
    let fake = Arc::new(FakeTransport::new());
    fake.script_probes([
        ProbeOutcome::Fail,
        ProbeOutcome::Fail,
        ProbeOutcome::Ack,
        ProbeOutcome::Fail,
        ProbeOutcome::Fail,
        ProbeOutcome::Fail,
    ]);

    let start = Instant::now();
    let handle = LivenessSupervisor::spawn(Arc::clone(&fake), config(1000, 3)).unwrap();
    let signal = handle.signal();

    let mut rx = handle.subscribe();
    let collector = tokio::spawn(async move {
        let mut counters = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            counters.push((state.consecutive_failures(), state.status()));
        }
        counters
    });

    signal.terminated().await;
    assert_eq!(start.elapsed(), Duration::from_secs(6));

    let exit = handle.wait().await;
    assert_eq!(
        exit,
        SupervisorExit::FailureThreshold {
            consecutive_failures: 3
        }
    );

    let counters = collector.await.unwrap();
    let failures: Vec<u32> = counters.iter().map(|(n, _)| *n).collect();
    assert_eq!(failures, vec![1, 2, 0, 1, 2, 3]);
    assert!(counters[..5]
        .iter()
        .all(|(_, status)| *status == LivenessStatus::Active));
    assert_eq!(counters[5].1, LivenessStatus::Terminated);

    assert_eq!(fake.probe_count(), 6);
    assert_eq!(fake.close_count(), 1);
    assert!(fake.is_closed());
}

#[tokio::test(start_paused = true)]
async fn healthy_transport_stays_active() {
    let fake = Arc::new(FakeTransport::new());
    let handle = LivenessSupervisor::spawn(Arc::clone(&fake), config(1000, 3)).unwrap();

    tokio::time::sleep(Duration::from_millis(10_500)).await;

    assert_eq!(fake.probe_count(), 10);
    let state = handle.state();
    assert_eq!(state.status(), LivenessStatus::Active);
    assert_eq!(state.consecutive_failures(), 0);
    assert!(state.last_probe_at().is_some());
    assert!(!handle.signal().is_terminated());
    assert!(!handle.is_finished());
    assert_eq!(fake.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn first_probe_waits_one_interval() {
    let fake = Arc::new(FakeTransport::new());
    let _handle = LivenessSupervisor::spawn(Arc::clone(&fake), config(1000, 3)).unwrap();

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(fake.probe_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fake.probe_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_probes_time_out_and_count_as_failures() {
    let fake = Arc::new(FakeTransport::new());
    fake.set_default_probe(ProbeOutcome::Hang);

    let config = config(1000, 2).with_probe_timeout(Duration::from_millis(300));
    let start = Instant::now();
    let handle = LivenessSupervisor::spawn(Arc::clone(&fake), config).unwrap();

    let exit = handle.wait().await;
    assert_eq!(
        exit,
        SupervisorExit::FailureThreshold {
            consecutive_failures: 2
        }
    );
    // Two ticks, the last one followed by its full probe timeout.
    assert_eq!(start.elapsed(), Duration::from_millis(2300));
    assert!(fake.is_closed());
}

#[tokio::test(start_paused = true)]
async fn severed_transport_is_detected() {
    let fake = Arc::new(FakeTransport::new());
    let handle = LivenessSupervisor::spawn(Arc::clone(&fake), config(1000, 2)).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(handle.state().consecutive_failures(), 0);

    fake.sever();

    let exit = handle.wait().await;
    assert_eq!(
        exit,
        SupervisorExit::FailureThreshold {
            consecutive_failures: 2
        }
    );
}

#[tokio::test(start_paused = true)]
async fn explicit_shutdown_terminates_and_closes() {
    let fake = Arc::new(FakeTransport::new());
    let handle = LivenessSupervisor::spawn(Arc::clone(&fake), config(1000, 3)).unwrap();
    let signal = handle.signal();
    let rx = handle.subscribe();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(fake.probe_count(), 2);

    let exit = handle.shutdown().await;
    assert_eq!(exit, SupervisorExit::Shutdown);
    assert!(signal.is_terminated());
    assert_eq!(rx.borrow().status(), LivenessStatus::Terminated);
    assert_eq!(fake.close_count(), 1);

    // No probes after shutdown.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fake.probe_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_a_hanging_probe() {
    let fake = Arc::new(FakeTransport::new());
    fake.set_default_probe(ProbeOutcome::Hang);
    let config = config(1000, 3).with_probe_timeout(Duration::from_secs(30));
    let handle = LivenessSupervisor::spawn(Arc::clone(&fake), config).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(fake.probe_count(), 1);

    let start = Instant::now();
    let exit = handle.shutdown().await;
    assert_eq!(exit, SupervisorExit::Shutdown);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(fake.is_closed());
}

#[tokio::test(start_paused = true)]
async fn shutdown_after_threshold_reports_threshold() {
    let fake = Arc::new(FakeTransport::new());
    fake.set_default_probe(ProbeOutcome::Fail);
    let handle = LivenessSupervisor::spawn(Arc::clone(&fake), config(1000, 1)).unwrap();
    let signal = handle.signal();

    signal.terminated().await;
    let exit = handle.shutdown().await;
    assert_eq!(
        exit,
        SupervisorExit::FailureThreshold {
            consecutive_failures: 1
        }
    );
    assert_eq!(fake.close_count(), 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let fake = Arc::new(FakeTransport::new());
    assert!(LivenessSupervisor::spawn(fake, config(1000, 0)).is_err());
}
