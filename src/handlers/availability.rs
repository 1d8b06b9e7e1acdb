use async_trait::async_trait;

use super::{
    CapabilityHandler, HandlerContext, HandlerOutcome, ask_for, doctor_title, find_doctor,
    format_problem, list_times, unknown_doctor_reply,
};
use crate::backend::BackendError;
use crate::models::{SlotField, display_name};
use crate::orchestrator::ConversationState;

/// Answers "who is free when". Read-only: never mutates slots or status.
pub struct AvailabilityHandler;

#[async_trait]
impl CapabilityHandler for AvailabilityHandler {
    async fn handle(
        &self,
        state: &ConversationState,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, BackendError> {
        let slots = &state.slots;

        let mut missing = Vec::new();
        if !slots.is_filled(SlotField::Doctor) && !slots.is_filled(SlotField::Specialization) {
            missing.push(SlotField::Doctor);
        }
        missing.extend(slots.missing(&[SlotField::Date]));
        if !missing.is_empty() {
            return Ok(HandlerOutcome::reply_only(
                state,
                ask_for("check availability", &missing),
            ));
        }

        if let Some(problem) = format_problem(slots, &[SlotField::Date, SlotField::Time]) {
            return Ok(HandlerOutcome::reply_only(state, problem));
        }

        let date = slots.date.clone().unwrap_or_default();

        let reply = if let Some(name) = slots.doctor.as_deref() {
            let Some(doctor) = find_doctor(ctx.backend, name).await? else {
                let reply = unknown_doctor_reply(ctx.backend, name).await?;
                return Ok(HandlerOutcome::reply_only(state, reply));
            };
            let times = ctx.backend.available_times(&doctor.name, &date).await?;
            let title = doctor_title(&doctor.name);

            match slots.time.as_deref() {
                Some(time) if times.iter().any(|t| t == time) => {
                    format!("Yes, {} is free on {} at {}.", title, date, time)
                }
                Some(time) if times.is_empty() => {
                    format!("{} is not free at {} and has no free time on {}.", title, time, date)
                }
                Some(time) => format!(
                    "{} is not free on {} at {}. Free times that day: {}.",
                    title,
                    date,
                    time,
                    list_times(&times)
                ),
                None if times.is_empty() => format!("{} has no free time on {}.", title, date),
                None => format!(
                    "{} has free time on {}: {}.",
                    title,
                    date,
                    list_times(&times)
                ),
            }
        } else {
            let specialization = slots.specialization.clone().unwrap_or_default();
            let label = display_name(&specialization).to_lowercase();
            let found = ctx
                .backend
                .available_by_specialization(&specialization, &date)
                .await?;

            if found.is_empty() {
                format!("No {} has free time on {}.", label, date)
            } else {
                let lines: Vec<String> = found
                    .iter()
                    .map(|a| format!("- {}: {}", doctor_title(&a.doctor), list_times(&a.times)))
                    .collect();
                format!("Free {} appointments on {}:\n{}", label, date, lines.join("\n"))
            }
        };

        Ok(HandlerOutcome::reply_only(state, reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemorySchedule, SchedulingBackend, SlotRef};
    use crate::models::{PatientId, Slots};
    use chrono::NaiveDate;

    fn schedule() -> InMemorySchedule {
        InMemorySchedule::demo(NaiveDate::from_ymd_opt(2025, 10, 13).unwrap(), 2)
    }

    async fn run(slots: Slots, backend: &InMemorySchedule) -> (ConversationState, HandlerOutcome) {
        let mut state = ConversationState::new(PatientId(1234567), "default");
        state.slots = slots;
        let ctx = HandlerContext {
            backend,
            single_shot_booking: false,
        };
        let outcome = AvailabilityHandler.handle(&state, &ctx).await.unwrap();
        (state, outcome)
    }

    #[tokio::test]
    async fn test_requires_doctor_or_specialization_and_date() {
        let (state, outcome) = run(Slots::default(), &schedule()).await;
        assert!(outcome.reply.contains("doctor"));
        assert!(outcome.reply.contains("date"));
        assert_eq!(outcome.state, state);
    }

    #[tokio::test]
    async fn test_doctor_on_date_lists_times() {
        let slots = Slots::default()
            .with(SlotField::Doctor, "susan davis")
            .with(SlotField::Date, "14-10-2025");
        let (state, outcome) = run(slots, &schedule()).await;

        assert!(outcome.reply.starts_with("Dr. Susan Davis has free time on 14-10-2025: 08:00"));
        assert_eq!(outcome.state, state);
    }

    #[tokio::test]
    async fn test_specific_time_taken() {
        let backend = schedule();
        backend
            .book(PatientId(7654321), &SlotRef::new("susan davis", "14-10-2025", "08:00"))
            .await
            .unwrap();

        let slots = Slots::default()
            .with(SlotField::Doctor, "susan davis")
            .with(SlotField::Date, "14-10-2025")
            .with(SlotField::Time, "08:00");
        let (_, outcome) = run(slots, &backend).await;

        assert!(outcome.reply.contains("is not free"));
        assert!(outcome.reply.contains("08:30"));
    }

    #[tokio::test]
    async fn test_by_specialization() {
        let slots = Slots::default()
            .with(SlotField::Specialization, "pediatric_dentist")
            .with(SlotField::Date, "13-10-2025");
        let (_, outcome) = run(slots, &schedule()).await;

        assert!(outcome.reply.contains("Dr. Daniel Miller"));
        assert!(outcome.reply.contains("Dr. Emily Johnson"));
    }

    #[tokio::test]
    async fn test_date_outside_schedule() {
        let slots = Slots::default()
            .with(SlotField::Specialization, "oral_surgeon")
            .with(SlotField::Date, "01-01-2030");
        let (_, outcome) = run(slots, &schedule()).await;
        assert_eq!(outcome.reply, "No oral surgeon has free time on 01-01-2030.");
    }
}
