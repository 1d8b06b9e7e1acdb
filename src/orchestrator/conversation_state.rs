//! ConversationState - the record threaded through a session.
//!
//! A state value is owned by exactly one turn at a time: the router takes it
//! by value, mutates it, and hands it back. Persistence is the session
//! store's job; this module only defines the shape and its invariants.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::models::{Capability, Intent, Message, PatientId, Slots};

/// Current schema version for persisted state.
/// Bump when adding/removing/modifying fields.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Session Status
// ============================================================================

/// Lifecycle status of a session. `Finished` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Finished,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Why a session reached `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A handler completed the flow (single-shot booking)
    Completed,
    /// The loop guard saw the same route repeat without slot progress
    RoutingExhausted,
    /// The session hit the step ceiling
    StepLimit,
}

// ============================================================================
// Routing History
// ============================================================================

/// One routing decision, kept for repetition detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub intent: Intent,
    pub target: Capability,
    /// Step on which the decision was made
    pub step: u32,
    /// Slots as they stood after extraction on that step
    pub slots: Slots,
}

// ============================================================================
// Conversation State
// ============================================================================

/// Persistent state for one `(patient_id, session_key)` conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Schema version for migration support
    pub schema_version: u32,
    pub patient_id: PatientId,
    pub session_key: String,
    /// Append-only history in conversational order
    pub messages: Vec<Message>,
    pub slots: Slots,
    /// Last classified intent (None before the first classification)
    pub intent: Option<Intent>,
    /// Bounded; oldest entries are evicted first
    pub routing_history: VecDeque<RoutingDecision>,
    /// Number of turns processed
    pub step_count: u32,
    pub status: SessionStatus,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    /// Diagnostic text from the last routing decision. Never parsed.
    pub last_reasoning: Option<String>,
    /// Store revision; bumped by the session store on every save
    #[serde(default)]
    pub revision: u64,
    /// Creation time in ISO8601 format
    pub created_at: String,
    /// Last mutation time in ISO8601 format
    pub updated_at: String,
}

impl ConversationState {
    /// Fresh state for the first message of a session.
    pub fn new(patient_id: PatientId, session_key: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            schema_version: SCHEMA_VERSION,
            patient_id,
            session_key: session_key.into(),
            messages: Vec::new(),
            slots: Slots::default(),
            intent: None,
            routing_history: VecDeque::new(),
            step_count: 0,
            status: SessionStatus::Active,
            finish_reason: None,
            last_reasoning: None,
            revision: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// Append a patient message and count the turn.
    pub fn begin_turn(&mut self, text: &str) {
        self.messages.push(Message::patient(text));
        self.step_count += 1;
    }

    pub fn push_reply(&mut self, text: &str) {
        self.messages.push(Message::assistant(text));
    }

    /// Record a routing decision, evicting the oldest entries past `capacity`.
    pub fn record_decision(&mut self, decision: RoutingDecision, capacity: usize) {
        self.routing_history.push_back(decision);
        while self.routing_history.len() > capacity.max(1) {
            self.routing_history.pop_front();
        }
    }

    /// Move the session to its terminal status.
    pub fn finish(&mut self, reason: FinishReason) {
        self.status = SessionStatus::Finished;
        self.finish_reason = Some(reason);
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}
