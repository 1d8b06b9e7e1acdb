use async_trait::async_trait;

use super::{
    CapabilityHandler, HandlerContext, HandlerOutcome, ask_for, doctor_title, find_doctor,
    format_problem, list_times, unknown_doctor_reply,
};
use crate::backend::{BackendError, RescheduleOutcome, SlotRef};
use crate::models::{Intent, SlotField};
use crate::orchestrator::ConversationState;

/// Cancels or reschedules an existing appointment, depending on the
/// classified intent.
pub struct AppointmentsHandler;

#[async_trait]
impl CapabilityHandler for AppointmentsHandler {
    async fn handle(
        &self,
        state: &ConversationState,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, BackendError> {
        let rescheduling = state.intent == Some(Intent::Reschedule);
        let mut working = state.clone();

        // A known reference fills in whichever original details are missing.
        if let Some(reference) = state.slots.appointment_reference.as_deref()
            && !state
                .slots
                .missing(&[SlotField::Doctor, SlotField::Date, SlotField::Time])
                .is_empty()
            && let Some(found) = ctx
                .backend
                .appointments_for(state.patient_id)
                .await?
                .into_iter()
                .find(|a| a.reference.eq_ignore_ascii_case(reference))
        {
            working.slots.doctor.get_or_insert(found.doctor);
            working.slots.date.get_or_insert(found.date);
            working.slots.time.get_or_insert(found.time);
        }

        let mut required = vec![SlotField::Doctor, SlotField::Date, SlotField::Time];
        if rescheduling {
            required.extend([SlotField::NewDate, SlotField::NewTime]);
        }
        let missing = working.slots.missing(&required);
        if !missing.is_empty() {
            let purpose = if rescheduling {
                "reschedule your appointment"
            } else {
                "cancel your appointment"
            };
            return Ok(HandlerOutcome::reply_only(state, ask_for(purpose, &missing)));
        }

        if let Some(problem) = format_problem(&working.slots, &required) {
            return Ok(HandlerOutcome::reply_only(state, problem));
        }

        let name = working.slots.doctor.clone().unwrap_or_default();
        let Some(doctor) = find_doctor(ctx.backend, &name).await? else {
            let reply = unknown_doctor_reply(ctx.backend, &name).await?;
            return Ok(HandlerOutcome::reply_only(state, reply));
        };

        let original = SlotRef::new(
            &doctor.name,
            working.slots.date.clone().unwrap_or_default(),
            working.slots.time.clone().unwrap_or_default(),
        );
        let no_action = format!(
            "I couldn't find an appointment for patient {} with {} on {} at {}, so no action was taken.",
            state.patient_id,
            doctor_title(&doctor.name),
            original.date,
            original.time
        );

        if !rescheduling {
            let Some(cancelled) = ctx.backend.cancel(state.patient_id, &original).await? else {
                return Ok(HandlerOutcome::reply_only(state, no_action));
            };

            working.slots.appointment_reference = None;
            tracing::info!(
                patient = %state.patient_id,
                reference = %cancelled.reference,
                "Appointment cancelled"
            );
            let reply = format!(
                "Your appointment {} with {} on {} at {} has been cancelled.",
                cancelled.reference,
                doctor_title(&cancelled.doctor),
                cancelled.date,
                cancelled.time
            );
            return Ok(HandlerOutcome {
                state: working,
                reply,
            });
        }

        let new_date = working.slots.new_date.clone().unwrap_or_default();
        let new_time = working.slots.new_time.clone().unwrap_or_default();

        match ctx
            .backend
            .reschedule(state.patient_id, &original, &new_date, &new_time)
            .await?
        {
            RescheduleOutcome::Rescheduled(appointment) => {
                working.slots.date = Some(appointment.date.clone());
                working.slots.time = Some(appointment.time.clone());
                working.slots.new_date = None;
                working.slots.new_time = None;
                working.slots.appointment_reference = Some(appointment.reference.clone());
                tracing::info!(
                    patient = %state.patient_id,
                    reference = %appointment.reference,
                    "Appointment rescheduled"
                );
                let reply = format!(
                    "Your appointment with {} has been moved from {} at {} to {} at {}. Your new reference is {}.",
                    doctor_title(&appointment.doctor),
                    original.date,
                    original.time,
                    appointment.date,
                    appointment.time,
                    appointment.reference
                );
                Ok(HandlerOutcome {
                    state: working,
                    reply,
                })
            }
            RescheduleOutcome::NoSuchAppointment => Ok(HandlerOutcome::reply_only(state, no_action)),
            RescheduleOutcome::TargetUnavailable { alternatives } => {
                let mut reply = format!(
                    "{} is not available on {} at {}, so your appointment on {} at {} is unchanged.",
                    doctor_title(&doctor.name),
                    new_date,
                    new_time,
                    original.date,
                    original.time
                );
                if !alternatives.is_empty() {
                    reply.push_str(&format!(
                        " Free times on {}: {}.",
                        new_date,
                        list_times(&alternatives)
                    ));
                }
                Ok(HandlerOutcome::reply_only(state, reply))
            }
        }
    }
}
