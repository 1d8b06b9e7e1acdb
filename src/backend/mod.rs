//! Scheduling backend port.
//!
//! Handlers never touch appointment data directly; everything goes through
//! [`SchedulingBackend`]. Dates are `DD-MM-YYYY` and times `HH:MM`, the same
//! canonical forms carried in slots.

pub mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::PatientId;

pub use in_memory::InMemorySchedule;

/// A bookable doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    /// Lowercase full name, e.g. `jane smith`
    pub name: String,
    /// snake_case specialization, e.g. `general_dentist`
    pub specialization: String,
}

impl Doctor {
    pub fn new(name: impl Into<String>, specialization: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specialization: specialization.into(),
        }
    }
}

/// Identifies one appointment slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub doctor: String,
    pub date: String,
    pub time: String,
}

impl SlotRef {
    pub fn new(doctor: impl Into<String>, date: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            doctor: doctor.into(),
            date: date.into(),
            time: time.into(),
        }
    }
}

/// A booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Stable reference handed to the patient, e.g. `APT-00042`
    pub reference: String,
    pub patient_id: PatientId,
    pub doctor: String,
    pub date: String,
    pub time: String,
}

/// Free times of one doctor on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorAvailability {
    pub doctor: String,
    pub specialization: String,
    pub times: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Booked(Appointment),
    /// Slot taken or not offered; `alternatives` are other free times that day
    Unavailable { alternatives: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleOutcome {
    Rescheduled(Appointment),
    /// The patient holds no appointment at the original slot
    NoSuchAppointment,
    /// Target slot is not free; the original booking is untouched
    TargetUnavailable { alternatives: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("unknown doctor: {0}")]
    UnknownDoctor(String),
    #[error("invalid date '{0}', expected DD-MM-YYYY")]
    InvalidDate(String),
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("scheduling backend unavailable: {0}")]
    Unavailable(String),
}

/// Appointment data source used by the capability handlers.
#[async_trait]
pub trait SchedulingBackend: Send + Sync {
    /// All doctors, in a stable order.
    async fn directory(&self) -> Result<Vec<Doctor>, BackendError>;

    /// Free times for a doctor on a date, ascending.
    async fn available_times(&self, doctor: &str, date: &str)
    -> Result<Vec<String>, BackendError>;

    /// Free times per doctor of a specialization on a date. Doctors with no
    /// free time are omitted.
    async fn available_by_specialization(
        &self,
        specialization: &str,
        date: &str,
    ) -> Result<Vec<DoctorAvailability>, BackendError>;

    async fn book(&self, patient: PatientId, slot: &SlotRef)
    -> Result<BookingOutcome, BackendError>;

    /// Cancel the patient's appointment at `slot`. `None` when there is none.
    async fn cancel(
        &self,
        patient: PatientId,
        slot: &SlotRef,
    ) -> Result<Option<Appointment>, BackendError>;

    /// Move the patient's appointment at `from` to `new_date`/`new_time`
    /// with the same doctor. Either both sides change or neither does.
    async fn reschedule(
        &self,
        patient: PatientId,
        from: &SlotRef,
        new_date: &str,
        new_time: &str,
    ) -> Result<RescheduleOutcome, BackendError>;

    /// Appointments held by a patient, earliest first.
    async fn appointments_for(&self, patient: PatientId)
    -> Result<Vec<Appointment>, BackendError>;
}
