//! Lifecycle Scenario Tests
//!
//! Drives a real manager against fake login, socket and host services on a
//! paused tokio clock:
//! - Registration and acknowledgement
//! - Single-flight attempts under trigger storms
//! - Backoff, retry cap and terminal login answers
//! - Heartbeat staleness, abnormal and orderly closes
//! - Network and suspend edges
//! - Persisted intent across restarts
//! - Watchdog, network and power monitors feeding the manager

mod common;

use common::{advance, settle, Harness, LoginOutcome};
use std::time::Duration;
use tokio::sync::mpsc;
use webcall_lifecycle::{
    AlarmWatchdog, ConnectionStatus, LifecycleConfig, NetworkMonitor, NetworkState,
    PersistedState, PowerSuspendMonitor, RawNetworkEvent, RawPowerEvent, ReconnectState,
    SessionEvent, StateEvent, SuspendEdge,
};

/// Test that going online logs in once, opens one socket and registers
#[tokio::test(start_paused = true)]
async fn test_go_online_registers_session() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    assert_eq!(h.login.calls(), 1);
    assert_eq!(h.connector.opened(), 1);
    assert_eq!(h.connector.last().sent(), vec!["init|".to_string()]);

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, ReconnectState::Registered);
    assert_eq!(snapshot.connection_status(), ConnectionStatus::Online);
    assert!(!snapshot.session_acknowledged);
    assert!(h.sink.has_status("Login..."));

    // keep-awake is held only while the attempt runs
    assert_eq!(h.sleep_lock.acquires(), 1);
    assert!(!h.sleep_lock.is_held());

    let stored = h.store.snapshot();
    assert!(stored.connect_wanted);
    assert_eq!(stored.cookies.as_deref(), Some("webcallid=abc"));
}

/// Test that the server acknowledgement marks the session connected and
/// only real payloads reach the inbound sink
#[tokio::test(start_paused = true)]
async fn test_acknowledgement_and_inbound_routing() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    let session = h.connector.last();
    session.emit(SessionEvent::Text("sessionId|42".to_string()));
    session.emit(SessionEvent::Text("dummy|keepalive".to_string()));
    session.emit(SessionEvent::Text("callerOffer|{}".to_string()));
    settle().await;

    assert!(h.sink.has_status("Ready to receive calls"));
    assert_eq!(h.sink.last_state(), Some(StateEvent::Connected));
    assert!(h.snapshot().await.session_acknowledged);
    assert_eq!(h.sink.inbound(), vec!["callerOffer|{}".to_string()]);
}

/// Test that send needs a live session
#[tokio::test(start_paused = true)]
async fn test_send_requires_live_session() {
    let h = Harness::start(NetworkState::Wifi);
    tokio_test::assert_err!(h.handle.send("hello|1").await);

    h.online().await;
    tokio_test::assert_ok!(h.handle.send("hello|1").await);
    assert_eq!(
        h.connector.last().sent(),
        vec!["init|".to_string(), "hello|1".to_string()]
    );
}

/// Test that concurrent triggers never run two attempts at once
#[tokio::test(start_paused = true)]
async fn test_single_flight_under_trigger_storm() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.delay(Duration::from_secs(5));

    h.handle.set_desired_state(true).unwrap();
    h.handle.watchdog_fired().unwrap();
    h.handle.notify_charger_changed().unwrap();
    h.handle.set_desired_state(true).unwrap();
    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::Other)
        .unwrap();
    h.handle.notify_suspend_edge(SuspendEdge::Leaving).unwrap();

    // the last trigger wins: one attempt, 2s after the resume edge
    advance(Duration::from_secs(3)).await;
    assert_eq!(h.login.calls(), 1);
    assert_eq!(
        h.snapshot().await.connection_status(),
        ConnectionStatus::Connecting
    );

    // everything while the login is in flight is absorbed
    h.handle.watchdog_fired().unwrap();
    h.handle.set_desired_state(true).unwrap();
    h.handle.notify_suspend_edge(SuspendEdge::Entering).unwrap();
    h.handle.notify_suspend_edge(SuspendEdge::Leaving).unwrap();
    h.handle
        .notify_network_changed(NetworkState::Other, NetworkState::Wifi)
        .unwrap();
    h.handle.notify_charger_changed().unwrap();
    h.handle.check_heartbeat_staleness().unwrap();

    advance(Duration::from_secs(10)).await;
    assert_eq!(h.login.calls(), 1);
    assert_eq!(h.login.max_in_flight(), 1);
    assert_eq!(h.connector.opened(), 1);
    assert_eq!(h.connector.live(), 1);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that transient failures back off linearly and give up on the cap
#[tokio::test(start_paused = true)]
async fn test_backoff_gives_up_after_attempt_cap() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.always(LoginOutcome::Transient);
    h.online().await;

    advance(Duration::from_secs(80_000)).await;

    assert_eq!(h.login.calls(), 120);

    let gaps: Vec<Duration> = h
        .login
        .call_times()
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect();
    assert_eq!(gaps[0], Duration::from_secs(10));
    assert_eq!(gaps[9], Duration::from_secs(100));
    assert!(gaps.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(gaps.iter().all(|gap| *gap <= Duration::from_secs(1200)));

    let retries: Vec<_> = h
        .sink
        .statuses()
        .into_iter()
        .filter(|s| s.text == "Failed to reconnect. Will try again...")
        .collect();
    assert_eq!(retries.len(), 119);
    assert!(retries[9].important);
    assert_eq!(retries.iter().filter(|s| s.important).count(), 1);

    let gave_up = h
        .sink
        .statuses()
        .into_iter()
        .find(|s| s.text == "Gave up reconnecting")
        .expect("give-up status");
    assert!(gave_up.important);
    assert!(gave_up.notify);

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, ReconnectState::GivenUp);
    assert!(!snapshot.desired);
    assert_eq!(snapshot.pending_retry, None);
    assert_eq!(h.sink.last_state(), Some(StateEvent::Deactivated));
    assert!(!h.store.snapshot().connect_wanted);
    assert!(!h.sleep_lock.is_held());
}

/// Test that a reserved login token ends reconnecting without backoff
#[tokio::test(start_paused = true)]
async fn test_terminal_login_response_gives_up_immediately() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.always(LoginOutcome::Reject("notregistered"));
    h.online().await;

    advance(Duration::from_secs(3600)).await;

    assert_eq!(h.login.calls(), 1);
    assert_eq!(h.snapshot().await.state, ReconnectState::GivenUp);
    assert!(!h.sink.has_status("Failed to reconnect. Will try again..."));
    assert!(h
        .sink
        .texts()
        .iter()
        .any(|t| t.starts_with("Gave up reconnecting")));
    assert!(!h.store.snapshot().connect_wanted);
}

/// Test that going online again after giving up starts a fresh streak
#[tokio::test(start_paused = true)]
async fn test_online_after_give_up_recovers() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.script([LoginOutcome::Reject("busy")]);
    h.online().await;
    assert_eq!(h.snapshot().await.state, ReconnectState::GivenUp);

    h.online().await;
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that a socket open failure counts as a failed attempt
#[tokio::test(start_paused = true)]
async fn test_socket_failure_backs_off() {
    let h = Harness::start(NetworkState::Wifi);
    h.connector.fail_next(1);
    h.online().await;

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, ReconnectState::BackoffWaiting);
    assert_eq!(snapshot.attempts, 1);
    let pending = snapshot.pending_retry.expect("retry scheduled");
    assert!(pending <= Duration::from_secs(10));
    assert!(pending > Duration::from_secs(9));

    advance(Duration::from_secs(10)).await;
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
    assert_eq!(h.snapshot().await.attempts, 0);
}

/// Test that a stale heartbeat replaces the session
#[tokio::test(start_paused = true)]
async fn test_stale_heartbeat_triggers_reconnect() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    advance(Duration::from_secs(131)).await;
    h.handle.check_heartbeat_staleness().unwrap();
    settle().await;

    assert!(h.connector.session(0).is_closed());
    assert_eq!(h.connector.opened(), 2);
    assert_eq!(h.connector.live(), 1);
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that heartbeats keep the session and the watchdog only pings it
#[tokio::test(start_paused = true)]
async fn test_fresh_heartbeat_keeps_session() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    advance(Duration::from_secs(100)).await;
    h.connector.last().emit(SessionEvent::Heartbeat);
    advance(Duration::from_secs(100)).await;

    h.handle.watchdog_fired().unwrap();
    settle().await;

    assert_eq!(h.connector.last().pings(), 1);
    assert_eq!(h.login.calls(), 1);
    assert_eq!(h.connector.live(), 1);
}

/// Test that a charger edge runs the staleness check
#[tokio::test(start_paused = true)]
async fn test_charger_edge_checks_heartbeat() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    advance(Duration::from_secs(140)).await;
    h.handle.notify_charger_changed().unwrap();
    settle().await;

    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.connector.live(), 1);
}

/// Test that going offline cancels a scheduled attempt
#[tokio::test(start_paused = true)]
async fn test_offline_cancels_scheduled_attempt() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::Other)
        .unwrap();
    h.handle.set_desired_state(false).unwrap();
    settle().await;

    assert!(h.sink.has_status("Stopped reconnecting"));
    assert!(h.sink.has_status("Offline"));

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, ReconnectState::Idle);
    assert_eq!(snapshot.pending_retry, None);

    advance(Duration::from_secs(60)).await;
    assert_eq!(h.login.calls(), 1);
    assert_eq!(h.connector.live(), 0);
    assert!(!h.store.snapshot().connect_wanted);
    assert!(!h.sleep_lock.is_held());
}

/// Test that going offline during backoff stops further logins
#[tokio::test(start_paused = true)]
async fn test_offline_during_backoff() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.always(LoginOutcome::Transient);
    h.online().await;
    assert!(h.snapshot().await.pending_retry.is_some());

    h.handle.set_desired_state(false).unwrap();
    advance(Duration::from_secs(3600)).await;

    assert_eq!(h.login.calls(), 1);
    assert_eq!(h.snapshot().await.attempts, 0);
}

/// Test that a persisted intent resumes after the boot delay
#[tokio::test(start_paused = true)]
async fn test_persisted_intent_resumes_after_restart() {
    let config = LifecycleConfig::default();
    let persisted = PersistedState {
        connect_wanted: true,
        app_version: config.app_version.clone(),
        ..Default::default()
    };
    let h = Harness::with(config, persisted, NetworkState::Cellular);

    advance(Duration::from_secs(15)).await;
    assert_eq!(h.login.calls(), 0);
    let snapshot = h.snapshot().await;
    assert!(snapshot.desired);
    assert!(snapshot.pending_retry.is_some());

    advance(Duration::from_secs(2)).await;
    assert_eq!(h.login.calls(), 1);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that resuming can be switched off
#[tokio::test(start_paused = true)]
async fn test_persisted_intent_not_resumed_when_disabled() {
    let config = LifecycleConfig {
        resume_persisted_intent: false,
        ..Default::default()
    };
    let persisted = PersistedState {
        connect_wanted: true,
        ..Default::default()
    };
    let h = Harness::with(config, persisted, NetworkState::Wifi);

    advance(Duration::from_secs(60)).await;
    assert_eq!(h.login.calls(), 0);
    assert!(!h.snapshot().await.desired);
}

/// Test Wifi -> None -> Wifi: teardown on loss, one attempt 3s after return
#[tokio::test(start_paused = true)]
async fn test_wifi_loss_and_return_reconnects_once() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::None)
        .unwrap();
    settle().await;

    assert!(h.sink.has_status("Wifi lost"));
    assert!(h.connector.session(0).is_closed());
    assert!(h.sink.states().contains(&StateEvent::Disconnected));
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, ReconnectState::BackoffWaiting);
    assert_eq!(snapshot.attempts, 0);
    assert_eq!(snapshot.pending_retry, None);
    assert_eq!(snapshot.connection_status(), ConnectionStatus::Offline);

    h.handle
        .notify_network_changed(NetworkState::None, NetworkState::Wifi)
        .unwrap();
    settle().await;
    assert!(h.sink.has_status("Using Wifi network"));

    advance(Duration::from_secs(2)).await;
    assert_eq!(h.login.calls(), 1);

    advance(Duration::from_secs(2)).await;
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.connector.opened(), 2);
    assert_eq!(h.connector.live(), 1);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
    assert_eq!(h.login.cookies_seen()[1].as_deref(), Some("webcallid=abc"));
}

/// Test that an attempt due without network parks instead of logging in
#[tokio::test(start_paused = true)]
async fn test_attempt_without_network_parks() {
    let h = Harness::start(NetworkState::None);
    h.online().await;

    assert_eq!(h.login.calls(), 0);
    assert!(h.sink.has_status("No network. Reconnect paused."));
    assert_eq!(h.snapshot().await.state, ReconnectState::BackoffWaiting);

    h.handle
        .notify_network_changed(NetworkState::None, NetworkState::Cellular)
        .unwrap();
    advance(Duration::from_secs(4)).await;
    assert!(h.sink.has_status("Using mobile network"));
    assert_eq!(h.login.calls(), 1);
}

/// Test that a login result arriving after network loss is discarded
#[tokio::test(start_paused = true)]
async fn test_network_loss_during_login_discards_result() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.delay(Duration::from_secs(5));
    h.online().await;

    advance(Duration::from_secs(1)).await;
    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::None)
        .unwrap();
    settle().await;
    assert!(!h.snapshot().await.busy);

    advance(Duration::from_secs(5)).await;
    assert_eq!(h.connector.opened(), 0);

    h.handle
        .notify_network_changed(NetworkState::None, NetworkState::Other)
        .unwrap();
    advance(Duration::from_secs(4)).await;
    assert_eq!(h.login.calls(), 2);

    advance(Duration::from_secs(5)).await;
    assert_eq!(h.connector.opened(), 1);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that an abnormal close reconnects after 5s
#[tokio::test(start_paused = true)]
async fn test_abnormal_close_reconnects_after_delay() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    h.connector.last().server_close(1006);
    settle().await;

    assert_eq!(h.snapshot().await.state, ReconnectState::BackoffWaiting);
    assert_eq!(h.sink.last_state(), Some(StateEvent::Disconnected));
    assert!(h.sink.has_status("Disconnected from WebCall server..."));

    advance(Duration::from_secs(4)).await;
    assert_eq!(h.login.calls(), 1);

    advance(Duration::from_secs(2)).await;
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that an orderly server close does not reconnect
#[tokio::test(start_paused = true)]
async fn test_normal_close_does_not_reconnect() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    h.connector.last().server_close(1000);
    advance(Duration::from_secs(60)).await;

    assert!(h.sink.has_status("disconnected from WebCall server"));
    assert_eq!(h.login.calls(), 1);
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, ReconnectState::Idle);
    assert!(snapshot.desired);
}

/// Test that events from a torn-down session are ignored
#[tokio::test(start_paused = true)]
async fn test_stale_session_events_are_ignored() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;
    let first = h.connector.session(0);

    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::Other)
        .unwrap();
    advance(Duration::from_secs(4)).await;
    assert_eq!(h.connector.opened(), 2);

    first.server_close(1006);
    first.emit(SessionEvent::Text("callerOffer|late".to_string()));
    advance(Duration::from_secs(30)).await;

    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
    assert!(h.sink.inbound().is_empty());
}

/// Test suspend edges: ping on entering, replace the session after leaving
#[tokio::test(start_paused = true)]
async fn test_suspend_edges() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    h.handle.notify_suspend_edge(SuspendEdge::Entering).unwrap();
    settle().await;
    assert_eq!(h.connector.session(0).pings(), 1);
    assert!(h.sleep_lock.is_held());

    h.handle.notify_suspend_edge(SuspendEdge::Leaving).unwrap();
    settle().await;
    assert!(h.connector.session(0).is_closed());

    advance(Duration::from_secs(2)).await;
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.connector.live(), 1);
}

/// Test that an unavailable message consumer ends reconnecting
#[tokio::test(start_paused = true)]
async fn test_runtime_unavailable_gives_up() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    h.sink.set_runtime_down(true);
    h.connector
        .last()
        .emit(SessionEvent::Text("callerOffer|x".to_string()));
    settle().await;

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, ReconnectState::GivenUp);
    assert!(!snapshot.desired);
    assert_eq!(h.sink.last_state(), Some(StateEvent::Deactivated));
    assert_eq!(h.connector.live(), 0);
}

/// Test that the sleep lock is held during the attempt and accounted
#[tokio::test(start_paused = true)]
async fn test_keep_awake_held_during_attempt() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.delay(Duration::from_secs(5));
    h.online().await;

    let snapshot = h.snapshot().await;
    assert!(snapshot.keep_awake_held);
    assert!(snapshot.busy);

    advance(Duration::from_secs(6)).await;
    let snapshot = h.snapshot().await;
    assert!(!snapshot.keep_awake_held);
    assert!(snapshot.keep_awake_ms_today >= 5000);
    assert!(h.store.snapshot().keep_awake.held_ms >= 5000);
}

/// Test that the Wifi hold is only taken while a connection is wanted and is
/// released when going offline
#[tokio::test(start_paused = true)]
async fn test_wifi_hold() {
    let config = LifecycleConfig {
        wifi_lock: true,
        ..Default::default()
    };
    let h = Harness::with(config, PersistedState::default(), NetworkState::Wifi);
    settle().await;
    assert!(!h.network_hold.is_held());

    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::Cellular)
        .unwrap();
    h.handle
        .notify_network_changed(NetworkState::Cellular, NetworkState::Wifi)
        .unwrap();
    settle().await;
    assert_eq!(h.network_hold.acquires(), 0);

    h.online().await;
    assert!(h.network_hold.is_held());

    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::Cellular)
        .unwrap();
    settle().await;
    assert!(!h.network_hold.is_held());

    h.handle
        .notify_network_changed(NetworkState::Cellular, NetworkState::Wifi)
        .unwrap();
    settle().await;
    assert!(h.network_hold.is_held());

    h.handle.set_desired_state(false).unwrap();
    settle().await;
    assert!(!h.network_hold.is_held());
}

/// Test that shutdown closes the session but keeps the intent
#[tokio::test(start_paused = true)]
async fn test_shutdown_keeps_intent() {
    let mut h = Harness::start(NetworkState::Wifi);
    h.online().await;

    tokio_test::assert_ok!(h.handle.shutdown().await);
    (&mut h.task).await.unwrap();
    assert_eq!(h.connector.live(), 0);
    assert!(h.store.snapshot().connect_wanted);
    assert!(h.handle.set_desired_state(true).is_err());
}

/// Test that suspend edges leave the sleep lock alone while offline
#[tokio::test(start_paused = true)]
async fn test_suspend_edges_while_offline_take_no_lock() {
    let h = Harness::start(NetworkState::Wifi);
    settle().await;

    h.handle.notify_suspend_edge(SuspendEdge::Entering).unwrap();
    h.handle.notify_suspend_edge(SuspendEdge::Leaving).unwrap();
    advance(Duration::from_secs(3)).await;

    assert_eq!(h.sleep_lock.acquires(), 0);
    assert_eq!(h.login.calls(), 0);
    assert_eq!(h.snapshot().await.keep_awake_ms_today, 0);
}

/// Test that going offline aborts a slow login so the next one never overlaps it
#[tokio::test(start_paused = true)]
async fn test_offline_online_during_login_keeps_one_in_flight() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.delay(Duration::from_secs(5));
    h.online().await;

    advance(Duration::from_secs(1)).await;
    h.handle.set_desired_state(false).unwrap();
    settle().await;
    h.online().await;
    assert_eq!(h.login.calls(), 2);

    advance(Duration::from_secs(6)).await;
    assert_eq!(h.login.max_in_flight(), 1);
    assert_eq!(h.connector.opened(), 1);
    assert_eq!(h.connector.live(), 1);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that a quick Wifi drop and return during a slow login never runs
/// two logins at once
#[tokio::test(start_paused = true)]
async fn test_wifi_flap_during_login_keeps_one_in_flight() {
    let h = Harness::start(NetworkState::Wifi);
    h.login.delay(Duration::from_secs(5));
    h.online().await;

    advance(Duration::from_secs(1)).await;
    h.handle
        .notify_network_changed(NetworkState::Wifi, NetworkState::None)
        .unwrap();
    settle().await;
    h.handle
        .notify_network_changed(NetworkState::None, NetworkState::Wifi)
        .unwrap();

    // the replacement login starts while the first would still be running
    advance(Duration::from_secs(3) + Duration::from_millis(10)).await;
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.login.max_in_flight(), 1);

    advance(Duration::from_secs(6)).await;
    assert_eq!(h.login.max_in_flight(), 1);
    assert_eq!(h.connector.opened(), 1);
    assert_eq!(h.snapshot().await.state, ReconnectState::Registered);
}

/// Test that the watchdog keeps firing while no connection is wanted and
/// picks up a session once there is one
#[tokio::test(start_paused = true)]
async fn test_watchdog_rearms_while_offline() {
    let config = LifecycleConfig {
        watchdog_period: Duration::from_secs(60),
        ..Default::default()
    };
    let watchdog = AlarmWatchdog::from_config(&config);
    let h = Harness::with(config, PersistedState::default(), NetworkState::Wifi);
    let (_nudge, task) = watchdog.spawn(h.handle.clone());

    advance(Duration::from_secs(125)).await;
    assert_eq!(h.login.calls(), 0);
    assert!(!task.is_finished());

    h.online().await;
    advance(Duration::from_secs(60)).await;
    assert_eq!(h.connector.last().pings(), 1);
    assert_eq!(h.login.calls(), 1);

    task.cancel();
}

/// Test that a heartbeat going stale is noticed on the next watchdog period
#[tokio::test(start_paused = true)]
async fn test_watchdog_replaces_stale_session() {
    let h = Harness::start(NetworkState::Wifi);
    let (_nudge, task) = AlarmWatchdog::new(Duration::from_secs(60)).spawn(h.handle.clone());
    h.online().await;

    // stale after 130s, next firing at 180s
    advance(Duration::from_secs(150)).await;
    assert_eq!(h.login.calls(), 1);
    assert!(!h.connector.session(0).is_closed());

    advance(Duration::from_secs(31)).await;
    assert!(h.connector.session(0).is_closed());
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.connector.live(), 1);

    task.cancel();
}

/// Test that a nudge runs the check without waiting for the period
#[tokio::test(start_paused = true)]
async fn test_watchdog_nudge_fires_now() {
    let h = Harness::start(NetworkState::Wifi);
    let (nudge, task) = AlarmWatchdog::default().spawn(h.handle.clone());
    h.online().await;

    advance(Duration::from_secs(131)).await;
    assert_eq!(h.login.calls(), 1);

    nudge.nudge();
    settle().await;
    assert_eq!(h.connector.session(0).pings(), 1);
    assert!(h.connector.session(0).is_closed());
    assert_eq!(h.login.calls(), 2);

    task.cancel();
}

/// Test that the watchdog disarms once the manager is gone
#[tokio::test(start_paused = true)]
async fn test_watchdog_disarms_after_shutdown() {
    let mut h = Harness::start(NetworkState::Wifi);
    let (nudge, task) = AlarmWatchdog::new(Duration::from_secs(60)).spawn(h.handle.clone());

    h.handle.shutdown().await.unwrap();
    (&mut h.task).await.unwrap();

    advance(Duration::from_secs(61)).await;
    assert!(task.is_finished());
    // a late nudge is ignored
    nudge.nudge();
}

/// Test that the network monitor forwards only real edges
#[tokio::test(start_paused = true)]
async fn test_network_monitor_forwards_edges() {
    let h = Harness::start(NetworkState::Wifi);
    h.online().await;

    let (tx, rx) = mpsc::channel(8);
    let monitor = NetworkMonitor::new(NetworkState::Wifi).spawn(rx, h.handle.clone());

    tx.send(RawNetworkEvent::Lost).await.unwrap();
    settle().await;
    assert!(h.connector.session(0).is_closed());
    assert!(h.sink.has_status("Wifi lost"));

    tx.send(RawNetworkEvent::Available(NetworkState::Wifi))
        .await
        .unwrap();
    tx.send(RawNetworkEvent::CapabilitiesChanged(NetworkState::Wifi))
        .await
        .unwrap();
    advance(Duration::from_secs(4)).await;

    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.connector.opened(), 2);
    assert_eq!(h.connector.live(), 1);

    drop(tx);
    settle().await;
    assert!(monitor.is_finished());
}

/// Test that the power monitor forwards suspend and charger edges and nudges
/// the watchdog on resume
#[tokio::test(start_paused = true)]
async fn test_power_monitor_forwards_edges() {
    let h = Harness::start(NetworkState::Wifi);
    let (watchdog, task) = AlarmWatchdog::default().spawn(h.handle.clone());
    h.online().await;

    let (tx, rx) = mpsc::channel(8);
    let monitor = PowerSuspendMonitor::new().spawn(rx, h.handle.clone(), Some(watchdog));

    tx.send(RawPowerEvent::PrepareForSleep(true)).await.unwrap();
    settle().await;
    assert_eq!(h.connector.session(0).pings(), 1);

    // the nudge pings once more before the stale session is dropped
    advance(Duration::from_secs(131)).await;
    tx.send(RawPowerEvent::PrepareForSleep(false)).await.unwrap();
    settle().await;
    assert_eq!(h.connector.session(0).pings(), 2);
    assert!(h.connector.session(0).is_closed());

    advance(Duration::from_secs(3)).await;
    assert_eq!(h.login.calls(), 2);
    assert_eq!(h.connector.live(), 1);

    // the first charger report is only a baseline
    advance(Duration::from_secs(131)).await;
    tx.send(RawPowerEvent::OnBattery(true)).await.unwrap();
    settle().await;
    assert_eq!(h.login.calls(), 2);

    tx.send(RawPowerEvent::OnBattery(false)).await.unwrap();
    settle().await;
    assert_eq!(h.login.calls(), 3);
    assert_eq!(h.connector.live(), 1);

    drop(tx);
    settle().await;
    assert!(monitor.is_finished());
    task.cancel();
}
