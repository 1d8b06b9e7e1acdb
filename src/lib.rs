pub mod app;
pub mod backend;
pub mod collaborators;
pub mod config;
pub mod handlers;
pub mod mcp;
pub mod models;
pub mod orchestrator;
pub mod store;

// Re-export main types
pub use backend::{InMemorySchedule, SchedulingBackend};
pub use collaborators::{IntentClassifier, KeywordIntentClassifier, KeywordSlotExtractor, SlotExtractor};
pub use config::RouterConfig;
pub use models::{Intent, PatientId, Slots, TurnRequest, TurnResponse};
pub use orchestrator::{ConversationState, LoopGuard, Router, SessionStatus, TurnService};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

// Re-export MCP server
pub use mcp::ClinicRouterServer;
