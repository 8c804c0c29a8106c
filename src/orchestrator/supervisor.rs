//! Per-session supervisor task.
//!
//! The supervisor owns every piece of mutable session state and handles
//! one signal at a time: connection events, the retry deadline, the viewer
//! settle deadline, stuck-detector ticks and cancellation. Because nothing
//! else touches this state, the at-most-one-pending-retry check and the
//! teardown-then-rebuild ordering hold without locks.

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session_manager::SessionSettings;
use super::stuck_detector::{StuckDetector, StuckVerdict};
use super::teardown::{best_effort, ActiveConnection};
use crate::game::viewer::ViewerFactory;
use crate::game::{ConnectOptions, Connected, ConnectionEvent, ConnectionHandle, Connector};
use crate::models::session::{LifecycleStatus, SessionEvent};

/// Channels the supervisor publishes to.
pub(crate) struct Outlets {
    pub handle_tx: watch::Sender<ConnectionHandle>,
    pub status_tx: watch::Sender<LifecycleStatus>,
    pub events_tx: broadcast::Sender<SessionEvent>,
}

pub(crate) struct Supervisor {
    session_id: String,
    options: ConnectOptions,
    viewer_port: Option<u16>,
    settings: Arc<SessionSettings>,
    connector: Arc<dyn Connector>,
    viewers: Arc<dyn ViewerFactory>,
    active: ActiveConnection,
    status: LifecycleStatus,
    retry_at: Option<Instant>,
    viewer_at: Option<Instant>,
    sampler: Option<(Interval, StuckDetector)>,
    rng: StdRng,
    outlets: Outlets,
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)] // Internal plumbing; built only by the session manager.
    pub(crate) fn new(
        session_id: String,
        options: ConnectOptions,
        viewer_port: Option<u16>,
        settings: Arc<SessionSettings>,
        connector: Arc<dyn Connector>,
        viewers: Arc<dyn ViewerFactory>,
        initial: Connected,
        outlets: Outlets,
        stopped: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        let active = ActiveConnection::new(initial);
        let status = LifecycleStatus {
            connection_id: active.handle().connection_id().to_owned(),
            generation: 1,
            ..LifecycleStatus::default()
        };
        Self {
            session_id,
            options,
            viewer_port,
            settings,
            connector,
            viewers,
            active,
            status,
            retry_at: None,
            viewer_at: None,
            sampler: None,
            rng: StdRng::from_entropy(),
            outlets,
            stopped,
            cancel,
        }
    }

    /// Main loop; returns after cancellation once teardown has finished.
    pub(crate) async fn run(mut self) {
        self.publish();
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    self.shutdown().await;
                    break;
                }

                event = next_event(self.active.events_mut()) => match event {
                    Some(event) => self.on_event(event),
                    None => self.on_stream_closed(),
                },

                () = sleep_until_opt(self.retry_at) => self.on_retry().await,

                () = sleep_until_opt(self.viewer_at) => self.on_viewer_due().await,

                now = next_tick(&mut self.sampler) => self.on_sample(now).await,
            }
            self.publish();
        }
        self.publish();
    }

    fn publish(&self) {
        self.outlets.status_tx.send_replace(self.status.clone());
    }

    fn emit(&self, event: SessionEvent) {
        self.publish();
        // No subscribers is fine.
        let _ = self.outlets.events_tx.send(event);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    fn on_event(&mut self, event: ConnectionEvent) {
        let kind = event.kind();
        match event {
            ConnectionEvent::Spawn => self.on_spawn(),
            ConnectionEvent::Kicked(reason)
            | ConnectionEvent::End(reason)
            | ConnectionEvent::Error(reason) => self.on_disconnect(kind, reason),
        }
    }

    fn on_stream_closed(&mut self) {
        *self.active.events_mut() = None;
        if self.retry_at.is_none() && !self.active.is_torn_down() {
            warn!(session_id = %self.session_id, "event stream closed without a terminal event");
            self.on_disconnect("end", "event stream closed".to_owned());
        }
    }

    fn on_spawn(&mut self) {
        self.status.attempt = 0;
        self.status.spawned = true;
        info!(
            session_id = %self.session_id,
            generation = self.status.generation,
            "agent spawned"
        );

        let stuck = &self.settings.stuck;
        if stuck.enabled && self.sampler.is_none() {
            let period = Duration::from_millis(stuck.sample_interval_ms);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.sampler = Some((interval, StuckDetector::from_config(stuck)));
        }

        let viewer = &self.settings.viewer;
        if viewer.enabled && self.viewer_port.is_some() && !self.active.has_viewer() {
            self.viewer_at =
                Some(Instant::now() + Duration::from_millis(viewer.settle_delay_ms));
        }

        self.emit(SessionEvent::Spawned {
            generation: self.status.generation,
        });
    }

    /// A second failure signal while a retry is pending is a no-op for
    /// scheduling.
    fn on_disconnect(&mut self, kind: &'static str, reason: String) {
        warn!(session_id = %self.session_id, kind, %reason, "connection lost");
        self.sampler = None;
        self.viewer_at = None;
        self.status.spawned = false;
        self.emit(SessionEvent::Disconnected { kind, reason });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.is_stopped() {
            debug!(session_id = %self.session_id, "stopped; not scheduling reconnect");
            return;
        }
        if self.retry_at.is_some() {
            debug!(session_id = %self.session_id, "retry already pending");
            return;
        }

        let delay = self.settings.policy.delay(self.status.attempt, &mut self.rng);
        self.status.attempt += 1;
        self.status.retry_pending = true;
        self.retry_at = Some(Instant::now() + delay);

        info!(
            session_id = %self.session_id,
            attempt = self.status.attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        self.emit(SessionEvent::RetryScheduled {
            attempt: self.status.attempt,
            delay,
        });
    }

    async fn on_retry(&mut self) {
        self.retry_at = None;
        self.status.retry_pending = false;

        self.teardown().await;
        if self.is_stopped() {
            return;
        }

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            result = self.connector.connect(&self.options) => result,
        };

        match connected {
            Ok(connected) => {
                self.install(connected).await;
                info!(
                    session_id = %self.session_id,
                    generation = self.status.generation,
                    connection_id = %self.status.connection_id,
                    "reconnected"
                );
                self.emit(SessionEvent::Reconnected {
                    generation: self.status.generation,
                });
            }
            Err(err) => {
                warn!(
                    session_id = %self.session_id,
                    attempt = self.status.attempt,
                    %err,
                    "reconnect failed"
                );
                self.emit(SessionEvent::ReconnectFailed {
                    attempt: self.status.attempt,
                    error: err.to_string(),
                });
                self.schedule_reconnect();
            }
        }
    }

    async fn install(&mut self, connected: Connected) {
        attach_plugins(&self.session_id, &connected.handle, &self.settings).await;

        self.active = ActiveConnection::new(connected);
        let handle = Arc::clone(self.active.handle());
        self.status.connection_id = handle.connection_id().to_owned();
        self.status.generation += 1;
        self.status.spawned = false;
        self.status.viewer_active = false;
        self.outlets.handle_tx.send_replace(handle);
    }

    async fn on_viewer_due(&mut self) {
        self.viewer_at = None;
        let Some(port) = self.viewer_port else {
            return;
        };
        if self.is_stopped() || self.active.is_torn_down() {
            return;
        }

        let handle = Arc::clone(self.active.handle());
        match self.viewers.start(handle, port).await {
            Ok(viewer) => {
                self.active.set_viewer(viewer);
                self.status.viewer_active = true;
                info!(session_id = %self.session_id, port, "viewer started");
                self.emit(SessionEvent::ViewerStarted { port });
            }
            Err(err) => {
                warn!(session_id = %self.session_id, port, %err, "viewer unavailable; continuing without it");
                self.emit(SessionEvent::ViewerFailed {
                    port,
                    error: err.to_string(),
                });
            }
        }
    }

    async fn on_sample(&mut self, now: Instant) {
        let Some((_, detector)) = self.sampler.as_mut() else {
            return;
        };
        let Some(state) = self.active.handle().entity_state() else {
            return;
        };

        if detector.observe(state, now) == StuckVerdict::CancelGoal {
            info!(
                session_id = %self.session_id,
                y = state.position.y,
                "agent floating without progress; cancelling movement goal"
            );
            let handle = Arc::clone(self.active.handle());
            best_effort(&self.session_id, "clear_goal", handle.clear_goal()).await;
            self.emit(SessionEvent::GoalCancelled);
        }
    }

    async fn teardown(&mut self) {
        self.sampler = None;
        self.viewer_at = None;
        if let Some(failures) = self.active.teardown(&self.session_id).await {
            self.status.viewer_active = false;
            self.emit(SessionEvent::TornDown { failures });
        }
    }

    async fn shutdown(&mut self) {
        self.retry_at = None;
        self.status.retry_pending = false;
        self.teardown().await;
        self.status.spawned = false;
        self.status.stopped = true;
        info!(session_id = %self.session_id, "session stopped");
        self.emit(SessionEvent::Stopped);
    }
}

/// Attach every configured plugin; failures are logged and skipped.
pub(crate) async fn attach_plugins(
    session_id: &str,
    handle: &ConnectionHandle,
    settings: &SessionSettings,
) {
    for plugin in &settings.plugins {
        best_effort(session_id, "load_plugin", handle.load_plugin(*plugin)).await;
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ConnectionEvent>>) -> Option<ConnectionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}

async fn next_tick(sampler: &mut Option<(Interval, StuckDetector)>) -> Instant {
    match sampler {
        Some((interval, _)) => interval.tick().await,
        None => pending().await,
    }
}
