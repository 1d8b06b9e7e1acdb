use async_trait::async_trait;

use super::{CapabilityHandler, HandlerContext, HandlerOutcome, doctor_title, join_human};
use crate::backend::BackendError;
use crate::models::{display_name, latest_patient_text};
use crate::orchestrator::ConversationState;

const HOW_TO: &str = "I can check a doctor's availability, book an appointment, and cancel \
or reschedule one. Tell me the doctor (or the kind of specialist), the date as DD-MM-YYYY \
and the time as HH:MM.";

/// What a general question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    MyAppointments,
    Doctors,
    Specializations,
    Overview,
}

fn topic_of(text: &str) -> Topic {
    let text = text.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if mentions(&[
        "my appointment",
        "my booking",
        "appointments do i have",
        "upcoming appointment",
    ]) {
        Topic::MyAppointments
    } else if mentions(&["speciali", "service", "treatment", "offer"]) {
        Topic::Specializations
    } else if mentions(&["doctor", "dentist", "who "]) {
        Topic::Doctors
    } else {
        Topic::Overview
    }
}

/// Answers questions about the clinic from the directory. Never mutates
/// state.
pub struct GeneralInfoHandler;

#[async_trait]
impl CapabilityHandler for GeneralInfoHandler {
    async fn handle(
        &self,
        state: &ConversationState,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, BackendError> {
        let text = latest_patient_text(&state.messages).unwrap_or_default();

        let reply = match topic_of(text) {
            Topic::MyAppointments => {
                let appointments = ctx.backend.appointments_for(state.patient_id).await?;
                if appointments.is_empty() {
                    format!("You have no upcoming appointments. {}", HOW_TO)
                } else {
                    let lines: Vec<String> = appointments
                        .iter()
                        .map(|a| {
                            format!(
                                "- {} with {} on {} at {}",
                                a.reference,
                                doctor_title(&a.doctor),
                                a.date,
                                a.time
                            )
                        })
                        .collect();
                    format!("Your appointments:\n{}", lines.join("\n"))
                }
            }
            Topic::Doctors => {
                let lines: Vec<String> = ctx
                    .backend
                    .directory()
                    .await?
                    .iter()
                    .map(|d| format!("- {} ({})", doctor_title(&d.name), display_name(&d.specialization)))
                    .collect();
                format!("Our doctors:\n{}", lines.join("\n"))
            }
            Topic::Specializations => {
                let mut specializations: Vec<String> = ctx
                    .backend
                    .directory()
                    .await?
                    .iter()
                    .map(|d| display_name(&d.specialization).to_lowercase())
                    .collect();
                specializations.sort();
                specializations.dedup();
                format!(
                    "We have specialists for: {}. {}",
                    join_human(&specializations),
                    HOW_TO
                )
            }
            Topic::Overview => format!("Hello! {}", HOW_TO),
        };

        Ok(HandlerOutcome::reply_only(state, reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemorySchedule, SchedulingBackend, SlotRef};
    use crate::models::PatientId;
    use chrono::NaiveDate;

    async fn ask(text: &str, backend: &InMemorySchedule) -> HandlerOutcome {
        let mut state = ConversationState::new(PatientId(1234567), "default");
        state.begin_turn(text);
        let ctx = HandlerContext {
            backend,
            single_shot_booking: false,
        };
        GeneralInfoHandler.handle(&state, &ctx).await.unwrap()
    }

    fn schedule() -> InMemorySchedule {
        InMemorySchedule::demo(NaiveDate::from_ymd_opt(2025, 10, 13).unwrap(), 1)
    }

    #[test]
    fn test_topic_detection() {
        assert_eq!(topic_of("which doctors work here?"), Topic::Doctors);
        assert_eq!(topic_of("What services do you offer"), Topic::Specializations);
        assert_eq!(topic_of("show my appointments"), Topic::MyAppointments);
        assert_eq!(topic_of("hi"), Topic::Overview);
    }

    #[tokio::test]
    async fn test_lists_doctors() {
        let outcome = ask("who are your doctors?", &schedule()).await;
        assert!(outcome.reply.contains("Dr. Kevin Anderson (General Dentist)"));
        assert_eq!(outcome.reply.lines().count(), 11);
    }

    #[tokio::test]
    async fn test_lists_specializations_once() {
        let outcome = ask("what specializations do you have", &schedule()).await;
        assert_eq!(outcome.reply.matches("orthodontist").count(), 1);
        assert!(outcome.reply.contains("oral surgeon"));
    }

    #[tokio::test]
    async fn test_lists_patient_appointments() {
        let backend = schedule();
        backend
            .book(PatientId(1234567), &SlotRef::new("sarah wilson", "13-10-2025", "12:00"))
            .await
            .unwrap();

        let outcome = ask("what are my appointments?", &backend).await;
        assert!(outcome.reply.contains("APT-00001 with Dr. Sarah Wilson on 13-10-2025 at 12:00"));
    }

    #[tokio::test]
    async fn test_overview_does_not_change_state() {
        let backend = schedule();
        let mut state = ConversationState::new(PatientId(1234567), "default");
        state.begin_turn("hello");
        let ctx = HandlerContext {
            backend: &backend,
            single_shot_booking: false,
        };
        let outcome = GeneralInfoHandler.handle(&state, &ctx).await.unwrap();

        assert!(outcome.reply.starts_with("Hello!"));
        assert_eq!(outcome.state, state);
    }
}
