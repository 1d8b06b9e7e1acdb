use serde::{Deserialize, Serialize};

use super::{Intent, Message, PatientId, Slots};
use crate::orchestrator::{ConversationState, FinishReason, SessionStatus};

/// Session key used when the caller does not name one.
pub const DEFAULT_SESSION_KEY: &str = "default";

/// What the router consumes for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInput {
    pub message: String,
    /// Caller-asserted intent tag; bypasses the classifier for this turn only.
    #[serde(default)]
    pub explicit_intent: Option<String>,
    /// Caller-asserted slots; bypass the extractor for this turn only.
    #[serde(default)]
    pub explicit_slots: Option<Slots>,
}

impl TurnInput {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            ..Default::default()
        }
    }

    pub fn with_intent(mut self, tag: impl Into<String>) -> Self {
        self.explicit_intent = Some(tag.into());
        self
    }

    pub fn with_slots(mut self, slots: Slots) -> Self {
        self.explicit_slots = Some(slots);
        self
    }
}

/// A turn as submitted by an outer surface (CLI, MCP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub patient_id: PatientId,
    #[serde(default)]
    pub session_key: Option<String>,
    pub message: String,
    #[serde(default)]
    pub explicit_intent: Option<String>,
    #[serde(default)]
    pub explicit_slots: Option<Slots>,
}

impl TurnRequest {
    pub fn new(patient_id: PatientId, message: impl Into<String>) -> Self {
        Self {
            patient_id,
            session_key: None,
            message: message.into(),
            explicit_intent: None,
            explicit_slots: None,
        }
    }

    pub fn session_key(&self) -> &str {
        self.session_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(DEFAULT_SESSION_KEY)
    }

    pub fn input(&self) -> TurnInput {
        TurnInput {
            message: self.message.clone(),
            explicit_intent: self.explicit_intent.clone(),
            explicit_slots: self.explicit_slots.clone(),
        }
    }
}

/// Result of a turn, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub patient_id: u64,
    pub session_key: String,
    pub reply: String,
    pub intent: Option<Intent>,
    pub slots: Slots,
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    pub last_reasoning: Option<String>,
    pub step_count: u32,
}

impl TurnResponse {
    pub fn from_state(state: &ConversationState, reply: impl Into<String>) -> Self {
        Self {
            patient_id: state.patient_id.0,
            session_key: state.session_key.clone(),
            reply: reply.into(),
            intent: state.intent,
            slots: state.slots.clone(),
            messages: state.messages.clone(),
            status: state.status,
            finish_reason: state.finish_reason,
            last_reasoning: state.last_reasoning.clone(),
            step_count: state.step_count,
        }
    }
}
