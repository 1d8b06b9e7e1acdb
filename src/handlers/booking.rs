use async_trait::async_trait;

use super::{
    CapabilityHandler, HandlerContext, HandlerOutcome, ask_for, doctor_title, find_doctor,
    format_problem, list_times, unknown_doctor_reply,
};
use crate::backend::{BackendError, BookingOutcome, SlotRef};
use crate::models::{SlotField, display_name};
use crate::orchestrator::{ConversationState, FinishReason};

/// Books a new appointment once doctor (or specialization), date and time
/// are known.
pub struct BookingHandler;

#[async_trait]
impl CapabilityHandler for BookingHandler {
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
        missing.extend(slots.missing(&[SlotField::Date, SlotField::Time]));
        if !missing.is_empty() {
            return Ok(HandlerOutcome::reply_only(
                state,
                ask_for("book an appointment", &missing),
            ));
        }

        if let Some(problem) = format_problem(slots, &[SlotField::Date, SlotField::Time]) {
            return Ok(HandlerOutcome::reply_only(state, problem));
        }

        // Filled per the checks above.
        let date = slots.date.clone().unwrap_or_default();
        let time = slots.time.clone().unwrap_or_default();

        let doctor = match slots.doctor.as_deref() {
            Some(name) => match find_doctor(ctx.backend, name).await? {
                Some(doctor) => doctor.name,
                None => {
                    let reply = unknown_doctor_reply(ctx.backend, name).await?;
                    return Ok(HandlerOutcome::reply_only(state, reply));
                }
            },
            None => {
                let specialization = slots.specialization.clone().unwrap_or_default();
                let candidates = ctx
                    .backend
                    .available_by_specialization(&specialization, &date)
                    .await?;
                match candidates.iter().find(|c| c.times.contains(&time)) {
                    Some(candidate) => candidate.doctor.clone(),
                    None => {
                        let reply = if candidates.is_empty() {
                            format!(
                                "No {} has free time on {}. Would you like another date?",
                                display_name(&specialization).to_lowercase(),
                                date
                            )
                        } else {
                            let offers: Vec<String> = candidates
                                .iter()
                                .map(|c| format!("{}: {}", doctor_title(&c.doctor), list_times(&c.times)))
                                .collect();
                            format!(
                                "No {} is free at {} on {}. Free times that day: {}.",
                                display_name(&specialization).to_lowercase(),
                                time,
                                date,
                                offers.join("; ")
                            )
                        };
                        return Ok(HandlerOutcome::reply_only(state, reply));
                    }
                }
            }
        };

        let slot = SlotRef::new(&doctor, &date, &time);
        match ctx.backend.book(state.patient_id, &slot).await? {
            BookingOutcome::Booked(appointment) => {
                let mut next = state.clone();
                next.slots.doctor = Some(appointment.doctor.clone());
                next.slots.appointment_reference = Some(appointment.reference.clone());
                if ctx.single_shot_booking {
                    next.finish(FinishReason::Completed);
                }
                tracing::info!(
                    patient = %state.patient_id,
                    reference = %appointment.reference,
                    "Appointment booked"
                );

                let reply = format!(
                    "Your appointment with {} on {} at {} is confirmed. Your reference is {}.",
                    doctor_title(&appointment.doctor),
                    appointment.date,
                    appointment.time,
                    appointment.reference
                );
                Ok(HandlerOutcome { state: next, reply })
            }
            BookingOutcome::Unavailable { alternatives } => {
                let reply = if alternatives.is_empty() {
                    format!(
                        "{} has no free time on {}. Would you like another date?",
                        doctor_title(&doctor),
                        date
                    )
                } else {
                    format!(
                        "{} is not available on {} at {}. Free times that day: {}.",
                        doctor_title(&doctor),
                        date,
                        time,
                        list_times(&alternatives)
                    )
                };
                Ok(HandlerOutcome::reply_only(state, reply))
            }
        }
    }
}
