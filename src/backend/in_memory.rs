use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    Appointment, BackendError, BookingOutcome, Doctor, DoctorAvailability, RescheduleOutcome,
    SchedulingBackend, SlotRef,
};
use crate::config::ScheduleConfig;
use crate::models::{DATE_FORMAT, PatientId, TIME_FORMAT, normalize_name, normalize_specialization};

/// Doctors of the demonstration clinic.
pub const DEMO_DOCTORS: &[(&str, &str)] = &[
    ("kevin anderson", "general_dentist"),
    ("robert martinez", "cosmetic_dentist"),
    ("susan davis", "prosthodontist"),
    ("daniel miller", "pediatric_dentist"),
    ("sarah wilson", "emergency_dentist"),
    ("michael green", "oral_surgeon"),
    ("lisa brown", "orthodontist"),
    ("jane smith", "general_dentist"),
    ("emily johnson", "pediatric_dentist"),
    ("john doe", "orthodontist"),
];

/// Demo opening hours: half-hour slots from 08:00, last slot at 16:30.
const DEMO_FIRST_SLOT: (u32, u32) = (8, 0);
const DEMO_SLOTS_PER_DAY: i64 = 18;

/// Alternatives offered when a requested slot is taken.
const MAX_ALTERNATIVES: usize = 5;

#[derive(Debug, Clone)]
struct Booking {
    patient_id: PatientId,
    reference: String,
}

type SlotKey = (String, NaiveDate, NaiveTime);

#[derive(Debug, Clone, Default)]
struct ScheduleInner {
    /// `None` = open, `Some` = booked
    slots: BTreeMap<SlotKey, Option<Booking>>,
    next_reference: u64,
}

impl ScheduleInner {
    fn free_times(&self, doctor: &str, date: NaiveDate) -> Vec<String> {
        self.slots
            .iter()
            .filter(|((d, day, _), booking)| d == doctor && *day == date && booking.is_none())
            .map(|((_, _, time), _)| time.format(TIME_FORMAT).to_string())
            .collect()
    }

    fn issue_reference(&mut self) -> String {
        self.next_reference += 1;
        format!("APT-{:05}", self.next_reference)
    }

    fn bookings_file(&self) -> BookingsFile {
        BookingsFile {
            next_reference: self.next_reference,
            bookings: self
                .slots
                .iter()
                .filter_map(|(key, booking)| {
                    booking.as_ref().map(|b| InMemorySchedule::appointment(key, b))
                })
                .collect(),
        }
    }
}

/// Persisted bookings: every booked slot plus the reference counter, so
/// references stay unique across restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BookingsFile {
    next_reference: u64,
    #[serde(default)]
    bookings: Vec<Appointment>,
}

/// Numeric part of an `APT-nnnnn` reference.
fn reference_number(reference: &str) -> Option<u64> {
    reference.strip_prefix("APT-")?.parse().ok()
}

async fn write_bookings(path: &Path, file: &BookingsFile) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(file)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, json).await?;
    tokio::fs::rename(&temp, path).await
}

/// YAML schedule file layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleFile {
    pub doctors: Vec<Doctor>,
    #[serde(default)]
    pub slots: Vec<ScheduleFileDay>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleFileDay {
    pub doctor: String,
    /// `DD-MM-YYYY`
    pub date: String,
    /// `HH:MM` entries
    pub times: Vec<String>,
}

/// Process-local schedule guarded by a single async lock.
///
/// Every mutating operation runs under one write guard, which makes
/// reschedule all-or-nothing. With a bookings file attached, each change is
/// written through before the guard is released; a failed write rolls the
/// change back.
pub struct InMemorySchedule {
    doctors: Vec<Doctor>,
    inner: RwLock<ScheduleInner>,
    bookings_file: Option<PathBuf>,
}

fn parse_date(raw: &str) -> Result<NaiveDate, BackendError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| BackendError::InvalidDate(raw.to_string()))
}

fn parse_time(raw: &str) -> Result<NaiveTime, BackendError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| BackendError::InvalidTime(raw.to_string()))
}

impl InMemorySchedule {
    /// A schedule with the given directory and no open slots.
    pub fn new(doctors: Vec<Doctor>) -> Self {
        let doctors = doctors
            .into_iter()
            .map(|d| Doctor::new(normalize_name(&d.name), normalize_specialization(&d.specialization)))
            .collect();
        Self {
            doctors,
            inner: RwLock::new(ScheduleInner::default()),
            bookings_file: None,
        }
    }

    /// The demonstration clinic with every slot open for `days` days from
    /// `start`.
    pub fn demo(start: NaiveDate, days: u32) -> Self {
        let mut schedule = Self::new(
            DEMO_DOCTORS
                .iter()
                .map(|(name, spec)| Doctor::new(*name, *spec))
                .collect(),
        );

        let (hour, minute) = DEMO_FIRST_SLOT;
        let first = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
        let inner = schedule.inner.get_mut();
        for doctor in &schedule.doctors {
            for day in 0..days {
                let date = start + Duration::days(i64::from(day));
                for n in 0..DEMO_SLOTS_PER_DAY {
                    let time = first + Duration::minutes(30 * n);
                    inner.slots.insert((doctor.name.clone(), date, time), None);
                }
            }
        }
        schedule
    }

    /// Load a schedule from a YAML file.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule file: {}", path.display()))?;
        let file: ScheduleFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse schedule file: {}", path.display()))?;

        let mut schedule = Self::new(file.doctors);
        for day in &file.slots {
            for time in &day.times {
                schedule
                    .open_slot(&SlotRef::new(&day.doctor, &day.date, time))
                    .with_context(|| format!("Invalid slot in {}", path.display()))?;
            }
        }
        Ok(schedule)
    }

    /// Schedule file if configured, otherwise the demo clinic from today.
    pub fn from_config(config: &ScheduleConfig) -> anyhow::Result<Self> {
        match &config.schedule_file {
            Some(path) => Self::from_yaml_file(path),
            None => Ok(Self::demo(
                chrono::Local::now().date_naive(),
                config.demo_days,
            )),
        }
    }

    /// Restore bookings from `path` and write every later change back to it.
    ///
    /// A missing file means no bookings yet. Bookings for doctors no longer
    /// in the directory are dropped with a warning.
    pub fn with_bookings_file(mut self, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file: BookingsFile = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse bookings file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BookingsFile::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read bookings file: {}", path.display()));
            }
        };

        let mut restored = Vec::new();
        for appointment in file.bookings {
            let slot = SlotRef::new(&appointment.doctor, &appointment.date, &appointment.time);
            match self.key(&slot) {
                Ok(key) => restored.push((key, appointment)),
                Err(e) => tracing::warn!("Dropping booking {}: {}", appointment.reference, e),
            }
        }

        let inner = self.inner.get_mut();
        inner.next_reference = file.next_reference;
        for (key, appointment) in restored {
            let number = reference_number(&appointment.reference).unwrap_or(0);
            inner.next_reference = inner.next_reference.max(number);
            inner.slots.insert(
                key,
                Some(Booking {
                    patient_id: appointment.patient_id,
                    reference: appointment.reference,
                }),
            );
        }
        tracing::debug!("Restored bookings from {}", path.display());

        self.bookings_file = Some(path);
        Ok(self)
    }

    /// Write the bookings through, restoring `backup` if that fails.
    async fn commit(
        &self,
        inner: &mut ScheduleInner,
        backup: Option<ScheduleInner>,
    ) -> Result<(), BackendError> {
        let (Some(path), Some(backup)) = (&self.bookings_file, backup) else {
            return Ok(());
        };
        if let Err(e) = write_bookings(path, &inner.bookings_file()).await {
            tracing::warn!("Failed to write bookings to {}: {}", path.display(), e);
            *inner = backup;
            return Err(BackendError::Unavailable(format!("bookings not saved: {}", e)));
        }
        Ok(())
    }

    fn backup(&self, inner: &ScheduleInner) -> Option<ScheduleInner> {
        self.bookings_file.as_ref().map(|_| inner.clone())
    }

    /// Open a bookable slot. Opening an existing slot is a no-op.
    pub fn open_slot(&mut self, slot: &SlotRef) -> Result<(), BackendError> {
        let key = self.key(slot)?;
        self.inner.get_mut().slots.entry(key).or_insert(None);
        Ok(())
    }

    fn doctor(&self, name: &str) -> Result<&Doctor, BackendError> {
        let wanted = normalize_name(name);
        self.doctors
            .iter()
            .find(|d| d.name == wanted)
            .ok_or_else(|| BackendError::UnknownDoctor(name.to_string()))
    }

    fn key(&self, slot: &SlotRef) -> Result<SlotKey, BackendError> {
        let doctor = self.doctor(&slot.doctor)?;
        Ok((
            doctor.name.clone(),
            parse_date(&slot.date)?,
            parse_time(&slot.time)?,
        ))
    }

    fn appointment(key: &SlotKey, booking: &Booking) -> Appointment {
        let (doctor, date, time) = key;
        Appointment {
            reference: booking.reference.clone(),
            patient_id: booking.patient_id,
            doctor: doctor.clone(),
            date: date.format(DATE_FORMAT).to_string(),
            time: time.format(TIME_FORMAT).to_string(),
        }
    }
}

#[async_trait]
impl SchedulingBackend for InMemorySchedule {
    async fn directory(&self) -> Result<Vec<Doctor>, BackendError> {
        Ok(self.doctors.clone())
    }

    async fn available_times(
        &self,
        doctor: &str,
        date: &str,
    ) -> Result<Vec<String>, BackendError> {
        let doctor = self.doctor(doctor)?;
        let date = parse_date(date)?;
        Ok(self.inner.read().await.free_times(&doctor.name, date))
    }

    async fn available_by_specialization(
        &self,
        specialization: &str,
        date: &str,
    ) -> Result<Vec<DoctorAvailability>, BackendError> {
        let wanted = normalize_specialization(specialization);
        let date = parse_date(date)?;
        let inner = self.inner.read().await;

        Ok(self
            .doctors
            .iter()
            .filter(|d| d.specialization == wanted)
            .map(|d| DoctorAvailability {
                doctor: d.name.clone(),
                specialization: d.specialization.clone(),
                times: inner.free_times(&d.name, date),
            })
            .filter(|a| !a.times.is_empty())
            .collect())
    }

    async fn book(
        &self,
        patient: PatientId,
        slot: &SlotRef,
    ) -> Result<BookingOutcome, BackendError> {
        let key = self.key(slot)?;
        let mut inner = self.inner.write().await;

        if !matches!(inner.slots.get(&key), Some(None)) {
            let (doctor, date, _) = &key;
            let mut alternatives = inner.free_times(doctor, *date);
            alternatives.truncate(MAX_ALTERNATIVES);
            return Ok(BookingOutcome::Unavailable { alternatives });
        }

        let backup = self.backup(&inner);
        let booking = Booking {
            patient_id: patient,
            reference: inner.issue_reference(),
        };
        let appointment = Self::appointment(&key, &booking);
        inner.slots.insert(key, Some(booking));
        self.commit(&mut inner, backup).await?;
        tracing::debug!("Booked {} for patient {}", appointment.reference, patient);
        Ok(BookingOutcome::Booked(appointment))
    }

    async fn cancel(
        &self,
        patient: PatientId,
        slot: &SlotRef,
    ) -> Result<Option<Appointment>, BackendError> {
        let key = self.key(slot)?;
        let mut inner = self.inner.write().await;

        let held = matches!(
            inner.slots.get(&key),
            Some(Some(booking)) if booking.patient_id == patient
        );
        if !held {
            return Ok(None);
        }

        let backup = self.backup(&inner);
        let booking = inner.slots.insert(key.clone(), None).flatten();
        self.commit(&mut inner, backup).await?;
        Ok(booking.map(|b| Self::appointment(&key, &b)))
    }

    async fn reschedule(
        &self,
        patient: PatientId,
        from: &SlotRef,
        new_date: &str,
        new_time: &str,
    ) -> Result<RescheduleOutcome, BackendError> {
        let from_key = self.key(from)?;
        let to_key = self.key(&SlotRef::new(&from.doctor, new_date, new_time))?;
        let mut inner = self.inner.write().await;

        let holds_original = matches!(
            inner.slots.get(&from_key),
            Some(Some(booking)) if booking.patient_id == patient
        );
        if !holds_original {
            return Ok(RescheduleOutcome::NoSuchAppointment);
        }

        if !matches!(inner.slots.get(&to_key), Some(None)) {
            let (doctor, date, _) = &to_key;
            let mut alternatives = inner.free_times(doctor, *date);
            alternatives.truncate(MAX_ALTERNATIVES);
            return Ok(RescheduleOutcome::TargetUnavailable { alternatives });
        }

        let backup = self.backup(&inner);
        let booking = Booking {
            patient_id: patient,
            reference: inner.issue_reference(),
        };
        let appointment = Self::appointment(&to_key, &booking);
        inner.slots.insert(from_key, None);
        inner.slots.insert(to_key, Some(booking));
        self.commit(&mut inner, backup).await?;
        Ok(RescheduleOutcome::Rescheduled(appointment))
    }

    async fn appointments_for(
        &self,
        patient: PatientId,
    ) -> Result<Vec<Appointment>, BackendError> {
        let inner = self.inner.read().await;
        let mut appointments: Vec<(NaiveDate, NaiveTime, Appointment)> = inner
            .slots
            .iter()
            .filter_map(|(key, booking)| {
                booking
                    .as_ref()
                    .filter(|b| b.patient_id == patient)
                    .map(|b| (key.1, key.2, Self::appointment(key, b)))
            })
            .collect();
        appointments.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Ok(appointments.into_iter().map(|(_, _, a)| a).collect())
    }
}
