//! Loop Guard - Hard limits on routing, enforced outside the collaborators.
//!
//! The guard enforces two **hard stops**:
//! - Routing exhaustion: the same capability is chosen `repeat_threshold`
//!   times in a row and no slot moved in between
//! - Step ceiling: the session has processed more than `max_steps` turns
//!
//! Both checks are purely structural. They look at routing history and slot
//! values, never at reply text or classifier rationale.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::conversation_state::{ConversationState, FinishReason, RoutingDecision};
use crate::models::{Capability, Slots};

// Re-export from config for convenience
pub use crate::config::LoopGuardConfig;

/// Smallest meaningful repeat threshold: one prior decision plus the current.
pub const MIN_REPEAT_THRESHOLD: u32 = 2;

// ============================================================================
// Hard Stops
// ============================================================================

/// Conditions that terminate a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LoopGuardStop {
    /// Same target repeated without any slot progress
    #[error("routed to {target} {repeats} times in a row without new information")]
    RoutingExhausted { target: Capability, repeats: u32 },
    /// Step ceiling reached
    #[error("step limit reached ({steps}/{limit})")]
    StepLimitReached { steps: u32, limit: u32 },
}

impl LoopGuardStop {
    pub fn finish_reason(&self) -> FinishReason {
        match self {
            LoopGuardStop::RoutingExhausted { .. } => FinishReason::RoutingExhausted,
            LoopGuardStop::StepLimitReached { .. } => FinishReason::StepLimit,
        }
    }

    /// Patient-facing explanation for the termination.
    pub fn reply(&self) -> String {
        match self {
            LoopGuardStop::RoutingExhausted { .. } => "I'm sorry, we seem to be going in circles \
                 and I don't have enough new information to continue. This conversation has \
                 ended; please start a new session or contact the clinic directly."
                .to_string(),
            LoopGuardStop::StepLimitReached { .. } => "This conversation has reached its maximum \
                 length and has ended. Please start a new session to continue."
                .to_string(),
        }
    }
}

// ============================================================================
// Loop Guard
// ============================================================================

#[derive(Debug, Clone)]
pub struct LoopGuard {
    /// Consecutive same-target decisions (including the prospective one)
    /// without slot progress before termination
    pub repeat_threshold: u32,
    /// Routing history kept per session
    pub history_capacity: usize,
    /// Turns a session may process before the hard stop
    pub max_steps: u32,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self {
            repeat_threshold: 2,
            history_capacity: 10,
            max_steps: 10,
        }
    }
}

impl LoopGuard {
    /// Create a loop guard from configuration, clamping out-of-range values.
    pub fn from_config(config: &LoopGuardConfig) -> Self {
        let repeat_threshold = config.repeat_threshold.max(MIN_REPEAT_THRESHOLD);
        if repeat_threshold != config.repeat_threshold {
            tracing::warn!(
                "repeat_threshold {} is below the minimum, using {}",
                config.repeat_threshold,
                repeat_threshold
            );
        }
        // History must hold enough decisions to ever observe a repeat.
        let history_capacity = config
            .history_capacity
            .max(repeat_threshold as usize - 1)
            .max(1);

        Self {
            repeat_threshold,
            history_capacity,
            max_steps: config.max_steps.max(1),
        }
    }

    // ========================================================================
    // Hard Stop Checks
    // ========================================================================

    /// Run both checks for a prospective decision. The step limit wins when
    /// both would fire.
    pub fn check(
        &self,
        state: &ConversationState,
        target: Capability,
        slots_after: &Slots,
    ) -> Result<(), LoopGuardStop> {
        self.check_step_limit(state)?;

        if self.is_repeating(&state.routing_history, target, slots_after) {
            return Err(LoopGuardStop::RoutingExhausted {
                target,
                repeats: self.repeat_threshold,
            });
        }

        Ok(())
    }

    /// Hard stop once the current turn would exceed `max_steps`.
    ///
    /// `step_count` already includes the turn being processed.
    pub fn check_step_limit(&self, state: &ConversationState) -> Result<(), LoopGuardStop> {
        if state.step_count > self.max_steps {
            return Err(LoopGuardStop::StepLimitReached {
                steps: state.step_count,
                limit: self.max_steps,
            });
        }
        Ok(())
    }

    /// True when routing to `target` with `slots_after` would make the last
    /// `repeat_threshold` decisions identical in target with no slot change
    /// between any consecutive pair.
    pub fn is_repeating(
        &self,
        history: &VecDeque<RoutingDecision>,
        target: Capability,
        slots_after: &Slots,
    ) -> bool {
        let needed = self.repeat_threshold.max(MIN_REPEAT_THRESHOLD) as usize - 1;
        if history.len() < needed {
            return false;
        }

        let recent: Vec<&RoutingDecision> = history.iter().rev().take(needed).collect();
        if recent.iter().any(|d| d.target != target) {
            return false;
        }

        // Newest first: prospective slots, then each snapshot back in time.
        let mut newer = slots_after;
        for decision in recent {
            if decision.slots != *newer {
                return false;
            }
            newer = &decision.slots;
        }

        true
    }
}
