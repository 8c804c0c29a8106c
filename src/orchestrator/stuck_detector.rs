//! Stuck/floating detection for an agent's movement.
//!
//! The movement planner can wait forever on a goal that is unreachable
//! while the agent hangs in the air. The detector is fed one sample per
//! period by the session supervisor; when the agent stays airborne and
//! motionless for longer than the threshold it asks for the goal to be
//! cancelled, once per episode.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::StuckConfig;
use crate::game::{EntityState, Position};

/// Result of feeding one sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckVerdict {
    /// Grounded, moving, or no baseline yet.
    Moving,
    /// Airborne and motionless, threshold not reached (or already acted on).
    Floating,
    /// Floating persisted past the threshold: cancel the movement goal.
    CancelGoal,
}

/// Pure detector state for one connection.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    epsilon: f64,
    threshold: Duration,
    last: Option<Position>,
    floating_since: Option<Instant>,
    fired: bool,
}

impl StuckDetector {
    /// Construct a detector with the given displacement epsilon and
    /// persistence threshold.
    #[must_use]
    pub fn new(epsilon: f64, threshold: Duration) -> Self {
        Self {
            epsilon,
            threshold,
            last: None,
            floating_since: None,
            fired: false,
        }
    }

    /// Build from the `[stuck]` config section.
    #[must_use]
    pub fn from_config(config: &StuckConfig) -> Self {
        Self::new(config.epsilon, Duration::from_millis(config.threshold_ms))
    }

    /// Start of the current floating episode, if any.
    #[must_use]
    pub fn floating_since(&self) -> Option<Instant> {
        self.floating_since
    }

    /// Feed one sample taken at `now`.
    pub fn observe(&mut self, state: EntityState, now: Instant) -> StuckVerdict {
        let previous = self.last.replace(state.position);

        let motionless = previous.is_some_and(|prev| {
            prev.vertical_distance(&state.position) < self.epsilon
                && prev.horizontal_distance(&state.position) < self.epsilon
        });

        if state.on_ground || !motionless {
            self.floating_since = None;
            self.fired = false;
            return StuckVerdict::Moving;
        }

        if self.fired {
            return StuckVerdict::Floating;
        }

        let since = *self.floating_since.get_or_insert(now);
        if now.saturating_duration_since(since) >= self.threshold {
            self.fired = true;
            self.floating_since = None;
            return StuckVerdict::CancelGoal;
        }
        StuckVerdict::Floating
    }
}
