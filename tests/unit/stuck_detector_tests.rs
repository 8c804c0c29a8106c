//! Unit tests for floating detection.

use std::time::Duration;

use tokio::time::Instant;

use botkeeper::config::StuckConfig;
use botkeeper::game::{EntityState, Position};
use botkeeper::orchestrator::stuck_detector::{StuckDetector, StuckVerdict};

fn airborne(x: f64, y: f64) -> EntityState {
    EntityState {
        position: Position::new(x, y, 0.0),
        on_ground: false,
    }
}

fn grounded(x: f64, y: f64) -> EntityState {
    EntityState {
        position: Position::new(x, y, 0.0),
        on_ground: true,
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn detector() -> StuckDetector {
    StuckDetector::new(0.05, secs(2))
}

#[test]
fn first_sample_only_sets_baseline() {
    let mut detector = detector();
    let t0 = Instant::now();
    assert_eq!(detector.observe(airborne(0.0, 70.0), t0), StuckVerdict::Moving);
    assert!(detector.floating_since().is_none());
}

#[test]
fn motionless_airborne_agent_triggers_after_threshold() {
    let mut detector = detector();
    let t0 = Instant::now();
    detector.observe(airborne(0.0, 70.0), t0);

    assert_eq!(
        detector.observe(airborne(0.0, 70.0), t0 + secs(2)),
        StuckVerdict::Floating
    );
    assert_eq!(detector.floating_since(), Some(t0 + secs(2)));

    assert_eq!(
        detector.observe(airborne(0.01, 70.02), t0 + secs(3)),
        StuckVerdict::Floating
    );
    assert_eq!(
        detector.observe(airborne(0.0, 70.0), t0 + secs(4)),
        StuckVerdict::CancelGoal
    );
}

#[test]
fn fires_once_per_episode() {
    let mut detector = detector();
    let t0 = Instant::now();
    detector.observe(airborne(0.0, 70.0), t0);
    detector.observe(airborne(0.0, 70.0), t0 + secs(2));
    assert_eq!(
        detector.observe(airborne(0.0, 70.0), t0 + secs(4)),
        StuckVerdict::CancelGoal
    );

    for step in 3..10 {
        assert_eq!(
            detector.observe(airborne(0.0, 70.0), t0 + secs(step * 2)),
            StuckVerdict::Floating,
            "sample {step}"
        );
    }
}

#[test]
fn landing_resets_the_episode() {
    let mut detector = detector();
    let t0 = Instant::now();
    detector.observe(airborne(0.0, 70.0), t0);
    detector.observe(airborne(0.0, 70.0), t0 + secs(2));
    assert_eq!(
        detector.observe(airborne(0.0, 70.0), t0 + secs(4)),
        StuckVerdict::CancelGoal
    );

    assert_eq!(detector.observe(grounded(0.0, 70.0), t0 + secs(6)), StuckVerdict::Moving);
    assert!(detector.floating_since().is_none());

    detector.observe(airborne(0.0, 70.0), t0 + secs(8));
    assert_eq!(
        detector.observe(airborne(0.0, 70.0), t0 + secs(10)),
        StuckVerdict::CancelGoal
    );
}

#[test]
fn vertical_movement_is_progress() {
    let mut detector = detector();
    let t0 = Instant::now();
    detector.observe(airborne(0.0, 70.0), t0);
    detector.observe(airborne(0.0, 70.0), t0 + secs(2));
    assert_eq!(
        detector.observe(airborne(0.0, 69.0), t0 + secs(4)),
        StuckVerdict::Moving
    );
    assert!(detector.floating_since().is_none());
}

#[test]
fn horizontal_movement_is_progress() {
    let mut detector = detector();
    let t0 = Instant::now();
    detector.observe(airborne(0.0, 70.0), t0);
    detector.observe(airborne(0.0, 70.0), t0 + secs(2));
    assert_eq!(
        detector.observe(airborne(0.5, 70.0), t0 + secs(4)),
        StuckVerdict::Moving
    );
}

#[test]
fn grounded_and_still_is_never_stuck() {
    let mut detector = detector();
    let t0 = Instant::now();
    for step in 0..20 {
        assert_eq!(
            detector.observe(grounded(0.0, 64.0), t0 + secs(step)),
            StuckVerdict::Moving
        );
    }
}

#[test]
fn from_config_uses_threshold() {
    let config = StuckConfig {
        threshold_ms: 500,
        ..StuckConfig::default()
    };
    let mut detector = StuckDetector::from_config(&config);
    let t0 = Instant::now();
    detector.observe(airborne(0.0, 70.0), t0);
    detector.observe(airborne(0.0, 70.0), t0 + Duration::from_millis(100));
    assert_eq!(
        detector.observe(airborne(0.0, 70.0), t0 + Duration::from_millis(600)),
        StuckVerdict::CancelGoal
    );
}
