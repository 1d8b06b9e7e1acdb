pub mod conversation_state;
pub mod loop_guard;
pub mod registry;
pub mod router;
pub mod service;

// State exports
pub use conversation_state::{
    ConversationState, FinishReason, RoutingDecision, SCHEMA_VERSION, SessionStatus,
};

// Routing exports
pub use loop_guard::{LoopGuard, LoopGuardConfig, LoopGuardStop};
pub use registry::SessionRegistry;
pub use router::{CLASSIFIER_FAILURE_REPLY, HANDLER_FAILURE_REPLY, Router, SESSION_ENDED_REPLY};
pub use service::{STORE_FAILURE_REPLY, TurnService};
