//! Clinic-Router MCP Server implementation.
//!
//! Exposes the turn service to AI assistants via MCP protocol.

use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::router::tool::ToolRouter,
    model::{
        CallToolResult, Content, ErrorCode, ErrorData, Implementation, Role, ServerCapabilities,
        ServerInfo,
    },
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::{ClinicService, StoreMode, build_service};
use crate::backend::SchedulingBackend;
use crate::config::RouterConfig;
use crate::models::{DEFAULT_SESSION_KEY, PatientId, Slots, TurnRequest, display_name, normalize_specialization};
use crate::store::normalize_session_key;

/// Default number of sessions returned by `session_list`
const DEFAULT_LIST_LIMIT: usize = 10;

// ============================================================================
// Tool Parameters
// ============================================================================

/// Parameters for the process_turn tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProcessTurnParams {
    /// Patient id (7 or 8 digits)
    pub patient_id: String,
    /// Session key. Defaults to "default".
    pub session_key: Option<String>,
    /// The patient's message
    pub message: String,
    /// Intent tag to use instead of classifying: book, check_availability,
    /// cancel, reschedule or general_info
    pub intent: Option<String>,
    /// Slot values to use instead of extracting, e.g. {"doctor": "jane smith"}
    pub slots: Option<BTreeMap<String, String>>,
}

/// Parameters for the session_status tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionStatusParams {
    /// Patient id (7 or 8 digits)
    pub patient_id: String,
    /// Session key. Defaults to "default".
    pub session_key: Option<String>,
}

/// Parameters for the session_list tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionListParams {
    /// Patient id (7 or 8 digits)
    pub patient_id: String,
    /// Maximum number of sessions to return (default: 10)
    pub limit: Option<u32>,
}

/// Parameters for the session_delete tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionDeleteParams {
    /// Patient id (7 or 8 digits)
    pub patient_id: String,
    /// Session key to delete
    pub session_key: String,
}

#[derive(Debug, Serialize)]
struct DeleteResult {
    session_key: String,
    deleted: bool,
}

/// Parameters for the doctor_directory tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DoctorDirectoryParams {
    /// Only list doctors with this specialization
    pub specialization: Option<String>,
}

#[derive(Debug, Serialize)]
struct DirectoryEntry {
    name: String,
    specialization: String,
}

// ============================================================================
// Server Implementation
// ============================================================================

/// Clinic-Router MCP Server
///
/// Runs patient turns through the router and exposes session state.
#[derive(Clone)]
pub struct ClinicRouterServer {
    tool_router: ToolRouter<Self>,
    service: Arc<ClinicService>,
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ClinicRouterServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = r#"Clinic-Router: multi-turn appointment assistant.

Each call to process_turn is one patient message in a session identified by
patient_id and session_key. Sessions persist between calls; a finished
session rejects further messages, so start a new session_key instead.
If the session store is unreachable the reply says so and nothing is
recorded; the same message can simply be sent again.

Available tools:
- process_turn: Send a patient message and get the assistant reply
- session_status: Read the full state of a session
- session_list: List a patient's sessions, most recent first
- doctor_directory: List doctors and their specializations
- session_delete: Delete one of a patient's sessions
"#;

        ServerInfo {
            server_info: Implementation {
                name: "clinic-router".to_string(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                title: Some("Clinic-Router".to_string()),
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(instructions.to_string()),
            ..Default::default()
        }
    }
}

fn internal_error(message: String) -> ErrorData {
    ErrorData::new(ErrorCode::INTERNAL_ERROR, message, None)
}

fn invalid_params(message: String) -> ErrorData {
    ErrorData::new(ErrorCode::INVALID_PARAMS, message, None)
}

fn parse_patient(raw: &str) -> Result<PatientId, ErrorData> {
    PatientId::parse(raw).map_err(|e| invalid_params(e.to_string()))
}

fn json_result<T: Serialize>(value: &T, what: &str) -> Result<CallToolResult, ErrorData> {
    let response = serde_json::to_string_pretty(value)
        .map_err(|e| internal_error(format!("Failed to serialize {}: {}", what, e)))?;

    Ok(CallToolResult::success(vec![
        Content::text(response).with_audience(vec![Role::Assistant]),
    ]))
}

impl ClinicRouterServer {
    /// Run the server with stdio transport
    pub async fn run_stdio(self) -> anyhow::Result<()> {
        use tokio::io::{stdin, stdout};

        tracing::info!("Starting MCP server with stdio transport");
        let service = self.serve((stdin(), stdout())).await?;
        service.waiting().await?;
        tracing::info!("MCP server shutdown complete");
        Ok(())
    }
}

#[tool_router(router = tool_router)]
impl ClinicRouterServer {
    /// Wrap an assembled turn service.
    pub fn with_service(service: Arc<ClinicService>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            service,
        }
    }

    /// Build the service from configuration.
    pub async fn from_config(config: &RouterConfig, mode: StoreMode) -> anyhow::Result<Self> {
        let service = build_service(config, mode).await?;
        Ok(Self::with_service(Arc::new(service)))
    }

    // ========================================================================
    // Execution Tools
    // ========================================================================

    /// Process one patient message.
    #[tool(
        name = "process_turn",
        description = "Process one patient message in a session. Returns the assistant reply together with the session's intent, slots, status and full message history. Optional 'intent' and 'slots' bypass classification and extraction for this turn."
    )]
    pub async fn process_turn(
        &self,
        params: rmcp::handler::server::wrapper::Parameters<ProcessTurnParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let params = params.0;
        let patient_id = parse_patient(&params.patient_id)?;
        let explicit_slots = params
            .slots
            .map(Slots::from_pairs)
            .transpose()
            .map_err(|e| invalid_params(e.to_string()))?;

        let request = TurnRequest {
            patient_id,
            session_key: params.session_key,
            message: params.message,
            explicit_intent: params.intent,
            explicit_slots,
        };

        let response = self.service.handle(request).await;
        json_result(&response, "turn response")
    }

    /// Delete a session.
    #[tool(
        name = "session_delete",
        description = "Delete one of a patient's sessions and its message history. Returns whether the session existed."
    )]
    pub async fn session_delete(
        &self,
        params: rmcp::handler::server::wrapper::Parameters<SessionDeleteParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let params = params.0;
        let patient_id = parse_patient(&params.patient_id)?;
        let session_key = normalize_session_key(&params.session_key);

        let deleted = self
            .service
            .delete_session(patient_id, &session_key)
            .await
            .map_err(|e| internal_error(format!("{:#}", e)))?;

        json_result(
            &DeleteResult {
                session_key,
                deleted,
            },
            "delete result",
        )
    }

    // ========================================================================
    // Read-Only Tools
    // ========================================================================

    /// Read the full state of a session.
    #[tool(
        name = "session_status",
        description = "Get the full state of a session: messages, slots, intent, routing history, status and step count."
    )]
    pub async fn session_status(
        &self,
        params: rmcp::handler::server::wrapper::Parameters<SessionStatusParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let patient_id = parse_patient(&params.0.patient_id)?;
        let session_key = params
            .0
            .session_key
            .unwrap_or_else(|| DEFAULT_SESSION_KEY.to_string());

        let state = self
            .service
            .session(patient_id, &session_key)
            .await
            .map_err(|e| internal_error(format!("{:#}", e)))?
            .ok_or_else(|| {
                invalid_params(format!(
                    "No session '{}' for patient {}",
                    session_key, patient_id
                ))
            })?;

        json_result(&state, "session")
    }

    /// List a patient's sessions.
    #[tool(
        name = "session_list",
        description = "List a patient's sessions with status, intent and step count, sorted by most recent first."
    )]
    pub async fn session_list(
        &self,
        params: rmcp::handler::server::wrapper::Parameters<SessionListParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let patient_id = parse_patient(&params.0.patient_id)?;
        let limit = params
            .0
            .limit
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIST_LIMIT);

        let mut sessions = self
            .service
            .sessions(patient_id)
            .await
            .map_err(|e| internal_error(format!("{:#}", e)))?;
        sessions.truncate(limit);

        json_result(&sessions, "sessions")
    }

    /// List the doctor directory.
    #[tool(
        name = "doctor_directory",
        description = "List the clinic's doctors and their specializations. Optionally filter by specialization, e.g. 'orthodontist'."
    )]
    pub async fn doctor_directory(
        &self,
        params: rmcp::handler::server::wrapper::Parameters<DoctorDirectoryParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let filter = params
            .0
            .specialization
            .as_deref()
            .map(normalize_specialization);

        let doctors = self
            .service
            .router()
            .backend()
            .directory()
            .await
            .map_err(|e| internal_error(format!("Failed to read directory: {}", e)))?;

        let entries: Vec<DirectoryEntry> = doctors
            .into_iter()
            .filter(|d| filter.as_ref().is_none_or(|f| &d.specialization == f))
            .map(|d| DirectoryEntry {
                name: display_name(&d.name),
                specialization: d.specialization,
            })
            .collect();

        json_result(&entries, "directory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::handler::server::wrapper::Parameters;

    async fn server() -> ClinicRouterServer {
        ClinicRouterServer::from_config(&RouterConfig::default(), StoreMode::Ephemeral)
            .await
            .unwrap()
    }

    fn text_of(result: &CallToolResult) -> String {
        serde_json::to_value(&result.content[0])
            .ok()
            .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(str::to_string))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_process_turn_then_status() {
        let server = server().await;
        let result = server
            .process_turn(Parameters(ProcessTurnParams {
                patient_id: "1234567".to_string(),
                session_key: None,
                message: "I want to book".to_string(),
                intent: None,
                slots: None,
            }))
            .await
            .unwrap();
        let response: serde_json::Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(response["intent"], "book");
        assert_eq!(response["status"], "active");

        let status = server
            .session_status(Parameters(SessionStatusParams {
                patient_id: "1234567".to_string(),
                session_key: Some("default".to_string()),
            }))
            .await
            .unwrap();
        let state: serde_json::Value = serde_json::from_str(&text_of(&status)).unwrap();
        assert_eq!(state["step_count"], 1);
    }

    #[tokio::test]
    async fn test_invalid_patient_id_is_rejected() {
        let server = server().await;
        let err = server
            .session_list(Parameters(SessionListParams {
                patient_id: "12".to_string(),
                limit: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_slot_is_rejected() {
        let server = server().await;
        let mut slots = BTreeMap::new();
        slots.insert("colour".to_string(), "blue".to_string());
        let err = server
            .process_turn(Parameters(ProcessTurnParams {
                patient_id: "1234567".to_string(),
                session_key: None,
                message: "hi".to_string(),
                intent: None,
                slots: Some(slots),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_directory_filter() {
        let server = server().await;
        let result = server
            .doctor_directory(Parameters(DoctorDirectoryParams {
                specialization: Some("Orthodontist".to_string()),
            }))
            .await
            .unwrap();
        let entries: serde_json::Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(entries.as_array().map(|a| a.len()), Some(2));
    }

    #[tokio::test]
    async fn test_session_delete() {
        let server = server().await;
        server
            .process_turn(Parameters(ProcessTurnParams {
                patient_id: "1234567".to_string(),
                session_key: Some("Morning Visit".to_string()),
                message: "hello".to_string(),
                intent: None,
                slots: None,
            }))
            .await
            .unwrap();

        let delete = || {
            server.session_delete(Parameters(SessionDeleteParams {
                patient_id: "1234567".to_string(),
                session_key: "Morning Visit".to_string(),
            }))
        };
        let first: serde_json::Value =
            serde_json::from_str(&text_of(&delete().await.unwrap())).unwrap();
        assert_eq!(first["session_key"], "morning-visit");
        assert_eq!(first["deleted"], true);

        let second: serde_json::Value =
            serde_json::from_str(&text_of(&delete().await.unwrap())).unwrap();
        assert_eq!(second["deleted"], false);
    }
}
