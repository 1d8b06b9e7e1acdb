//! Capability handlers.
//!
//! Each handler reads the conversation state, talks to the scheduling
//! backend, and returns an updated copy of the state plus the reply. A
//! handler never persists anything and never sees other sessions.

pub mod appointments;
pub mod availability;
pub mod booking;
pub mod general;

use async_trait::async_trait;

use crate::backend::{BackendError, Doctor, SchedulingBackend};
use crate::models::{Capability, DATE_FORMAT, SlotField, Slots, TIME_FORMAT, display_name, normalize_name};
use crate::orchestrator::ConversationState;

pub use appointments::AppointmentsHandler;
pub use availability::AvailabilityHandler;
pub use booking::BookingHandler;
pub use general::GeneralInfoHandler;

/// What a handler may use besides the state.
pub struct HandlerContext<'a> {
    pub backend: &'a dyn SchedulingBackend,
    /// Finish the session after a successful booking
    pub single_shot_booking: bool,
}

/// Result of a handler run.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub state: ConversationState,
    pub reply: String,
}

impl HandlerOutcome {
    /// Reply without touching the state (clarifications, lookups).
    pub fn reply_only(state: &ConversationState, reply: impl Into<String>) -> Self {
        Self {
            state: state.clone(),
            reply: reply.into(),
        }
    }
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(
        &self,
        state: &ConversationState,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, BackendError>;
}

/// Run the handler serving `capability`.
pub async fn dispatch(
    capability: Capability,
    state: &ConversationState,
    ctx: &HandlerContext<'_>,
) -> Result<HandlerOutcome, BackendError> {
    match capability {
        Capability::Booking => BookingHandler.handle(state, ctx).await,
        Capability::Availability => AvailabilityHandler.handle(state, ctx).await,
        Capability::Appointments => AppointmentsHandler.handle(state, ctx).await,
        Capability::GeneralInfo => GeneralInfoHandler.handle(state, ctx).await,
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// "a", "a and b", "a, b and c"
pub(crate) fn join_human(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
    }
}

/// Clarifying reply naming every missing field.
pub(crate) fn ask_for(purpose: &str, missing: &[SlotField]) -> String {
    let labels: Vec<String> = missing
        .iter()
        .map(|f| match f {
            SlotField::Doctor => "the doctor (or a specialization)".to_string(),
            other => format!("the {}", other.label()),
        })
        .collect();
    format!("To {} I still need {}.", purpose, join_human(&labels))
}

/// Clarifying reply for the first date or time field that is not in
/// canonical form.
pub(crate) fn format_problem(slots: &Slots, fields: &[SlotField]) -> Option<String> {
    fields.iter().find_map(|field| {
        let value = slots.get(*field)?;
        let ok = match field {
            SlotField::Date | SlotField::NewDate => {
                chrono::NaiveDate::parse_from_str(value, DATE_FORMAT).is_ok()
            }
            SlotField::Time | SlotField::NewTime => {
                chrono::NaiveTime::parse_from_str(value, TIME_FORMAT).is_ok()
            }
            _ => true,
        };
        (!ok).then(|| {
            format!(
                "I couldn't read the {} '{}'. Please give it as {}.",
                field,
                value,
                field.label()
            )
        })
    })
}

/// Look a doctor up in the directory by (normalized) name.
pub(crate) async fn find_doctor(
    backend: &dyn SchedulingBackend,
    name: &str,
) -> Result<Option<Doctor>, BackendError> {
    let wanted = normalize_name(name);
    Ok(backend
        .directory()
        .await?
        .into_iter()
        .find(|d| d.name == wanted))
}

/// Reply for a doctor name the directory does not know.
pub(crate) async fn unknown_doctor_reply(
    backend: &dyn SchedulingBackend,
    name: &str,
) -> Result<String, BackendError> {
    let names: Vec<String> = backend
        .directory()
        .await?
        .iter()
        .map(|d| doctor_title(&d.name))
        .collect();
    Ok(format!(
        "I couldn't find a doctor named '{}'. Our doctors are: {}.",
        name,
        join_human(&names)
    ))
}

/// `jane smith` -> `Dr. Jane Smith`
pub(crate) fn doctor_title(name: &str) -> String {
    format!("Dr. {}", display_name(name))
}

pub(crate) fn list_times(times: &[String]) -> String {
    times.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_human() {
        assert_eq!(join_human(&[]), "");
        assert_eq!(join_human(&["a".to_string()]), "a");
        assert_eq!(join_human(&["a".to_string(), "b".to_string()]), "a and b");
        assert_eq!(
            join_human(&["a".to_string(), "b".to_string(), "c".to_string()]),
            "a, b and c"
        );
    }

    #[test]
    fn test_ask_for_names_each_field() {
        let reply = ask_for("book an appointment", &[SlotField::Doctor, SlotField::Date]);
        assert_eq!(
            reply,
            "To book an appointment I still need the doctor (or a specialization) and the date (DD-MM-YYYY)."
        );
    }

    #[test]
    fn test_format_problem() {
        let slots = Slots::default()
            .with(SlotField::Date, "14-10-2025")
            .with(SlotField::Time, "noonish");
        let reply = format_problem(&slots, &[SlotField::Date, SlotField::Time]).unwrap();
        assert!(reply.contains("'noonish'"));
        assert!(format_problem(&slots, &[SlotField::Date]).is_none());
    }
}
