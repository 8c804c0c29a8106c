//! Integration tests for floating detection inside a live session.
//!
//! Default tuning: one sample every 2 s, 2 s persistence threshold. The
//! first sample after spawn only records a baseline, so an agent that
//! spawns floating gets its goal cancelled on the third sample.

use std::time::Duration;

use botkeeper::game::ConnectionEvent;
use botkeeper::models::session::SessionEvent;
use botkeeper::orchestrator::session_manager::SessionManager;

use crate::support::{events_until, options, settings, state_at, FakeConnector, FakeViewers};

fn clear_goal_calls(connector: &FakeConnector, n: usize) -> usize {
    connector
        .connection(n)
        .calls()
        .iter()
        .filter(|call| *call == "clear_goal")
        .count()
}

#[tokio::test(start_paused = true)]
async fn floating_agent_goal_is_cancelled_once_per_episode() {
    let connector = FakeConnector::new();
    let manager = SessionManager::new(connector.clone(), FakeViewers::new(), settings(true, false));
    let session = manager.open("s1", options(), None).await.expect("open");
    let mut events = session.subscribe();

    let conn = connector.connection(1);
    conn.set_state(state_at(80.0, false));
    connector.emit(1, ConnectionEvent::Spawn).await;
    let started = tokio::time::Instant::now();

    events_until(&mut events, |e| *e == SessionEvent::GoalCancelled).await;
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7),
        "{elapsed:?}"
    );
    assert_eq!(clear_goal_calls(&connector, 1), 1);

    // Still floating: no repeat within the same episode.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(clear_goal_calls(&connector, 1), 1);

    // Landing ends the episode; floating again starts a new one.
    conn.set_state(state_at(64.0, true));
    tokio::time::sleep(Duration::from_secs(3)).await;
    conn.set_state(state_at(90.0, false));
    events_until(&mut events, |e| *e == SessionEvent::GoalCancelled).await;
    assert_eq!(clear_goal_calls(&connector, 1), 2);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn moving_agent_is_left_alone() {
    let connector = FakeConnector::new();
    let manager = SessionManager::new(connector.clone(), FakeViewers::new(), settings(true, false));
    let session = manager.open("s1", options(), None).await.expect("open");

    let conn = connector.connection(1);
    conn.set_state(state_at(80.0, false));
    connector.emit(1, ConnectionEvent::Spawn).await;

    // Move between samples, never on a sample boundary.
    tokio::time::sleep(Duration::from_secs(1)).await;
    for step in 0..10_u32 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        conn.set_state(state_at(79.0 - f64::from(step), false));
    }
    assert_eq!(clear_goal_calls(&connector, 1), 0);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn no_sampling_before_spawn() {
    let connector = FakeConnector::new();
    let manager = SessionManager::new(connector.clone(), FakeViewers::new(), settings(true, false));
    let session = manager.open("s1", options(), None).await.expect("open");

    connector.connection(1).set_state(state_at(80.0, false));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(clear_goal_calls(&connector, 1), 0);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn sampling_stops_when_the_connection_is_lost() {
    let connector = FakeConnector::new();
    let manager = SessionManager::new(connector.clone(), FakeViewers::new(), settings(true, false));
    let session = manager.open("s1", options(), None).await.expect("open");
    let mut events = session.subscribe();

    let conn = connector.connection(1);
    conn.set_state(state_at(80.0, false));
    connector.emit(1, ConnectionEvent::Spawn).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    connector.refuse(true);
    connector.emit(1, ConnectionEvent::Kicked("timeout".into())).await;
    events_until(&mut events, |e| matches!(e, SessionEvent::TornDown { .. })).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    // The only clear_goal is the one issued by teardown.
    assert_eq!(clear_goal_calls(&connector, 1), 1);
    assert!(!events_seen_goal_cancel(&mut events));

    session.stop().await;
}

fn events_seen_goal_cancel(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> bool {
    let mut seen = false;
    while let Ok(event) = events.try_recv() {
        seen |= event == SessionEvent::GoalCancelled;
    }
    seen
}
