use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Names of the structured fields carried through a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotField {
    Doctor,
    Specialization,
    Date,
    Time,
    NewDate,
    NewTime,
    AppointmentReference,
}

impl SlotField {
    pub const ALL: [SlotField; 7] = [
        SlotField::Doctor,
        SlotField::Specialization,
        SlotField::Date,
        SlotField::Time,
        SlotField::NewDate,
        SlotField::NewTime,
        SlotField::AppointmentReference,
    ];

    /// Human-readable label used in clarifying replies.
    pub fn label(&self) -> &'static str {
        match self {
            SlotField::Doctor => "doctor",
            SlotField::Specialization => "specialization",
            SlotField::Date => "date (DD-MM-YYYY)",
            SlotField::Time => "time (HH:MM)",
            SlotField::NewDate => "new date (DD-MM-YYYY)",
            SlotField::NewTime => "new time (HH:MM)",
            SlotField::AppointmentReference => "appointment reference",
        }
    }

    /// Parse a field name as accepted on the CLI and over MCP.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().replace('-', "_").as_str() {
            "doctor" | "doctor_name" => Some(SlotField::Doctor),
            "specialization" | "specialisation" => Some(SlotField::Specialization),
            "date" => Some(SlotField::Date),
            "time" => Some(SlotField::Time),
            "new_date" => Some(SlotField::NewDate),
            "new_time" => Some(SlotField::NewTime),
            "appointment_reference" | "reference" | "appointment_id" => {
                Some(SlotField::AppointmentReference)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for SlotField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SlotField::Doctor => "doctor",
            SlotField::Specialization => "specialization",
            SlotField::Date => "date",
            SlotField::Time => "time",
            SlotField::NewDate => "new_date",
            SlotField::NewTime => "new_time",
            SlotField::AppointmentReference => "appointment_reference",
        };
        write!(f, "{}", name)
    }
}

/// Structured fields resolved from the conversation so far.
///
/// Every field is independently optional. Extraction results are merged with
/// [`Slots::merge`], which never clears a field that already holds a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    /// Appointment date, `DD-MM-YYYY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Appointment time, `HH:MM` (24h)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Target date when rescheduling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_date: Option<String>,
    /// Target time when rescheduling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_reference: Option<String>,
}

impl Slots {
    pub fn get(&self, field: SlotField) -> Option<&str> {
        match field {
            SlotField::Doctor => self.doctor.as_deref(),
            SlotField::Specialization => self.specialization.as_deref(),
            SlotField::Date => self.date.as_deref(),
            SlotField::Time => self.time.as_deref(),
            SlotField::NewDate => self.new_date.as_deref(),
            SlotField::NewTime => self.new_time.as_deref(),
            SlotField::AppointmentReference => self.appointment_reference.as_deref(),
        }
    }

    fn slot_mut(&mut self, field: SlotField) -> &mut Option<String> {
        match field {
            SlotField::Doctor => &mut self.doctor,
            SlotField::Specialization => &mut self.specialization,
            SlotField::Date => &mut self.date,
            SlotField::Time => &mut self.time,
            SlotField::NewDate => &mut self.new_date,
            SlotField::NewTime => &mut self.new_time,
            SlotField::AppointmentReference => &mut self.appointment_reference,
        }
    }

    /// Set a field directly. Used by handlers, which own the field after
    /// completing an action (e.g. clearing a cancelled reference).
    pub fn set(&mut self, field: SlotField, value: Option<String>) {
        *self.slot_mut(field) = value;
    }

    /// Builder-style setter, mostly for tests and explicit caller slots.
    pub fn with(mut self, field: SlotField, value: impl Into<String>) -> Self {
        self.set(field, Some(value.into()));
        self
    }

    /// Build slots from `(field name, value)` pairs as supplied by a caller.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> anyhow::Result<Self>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut slots = Slots::default();
        for (key, value) in pairs {
            let field = SlotField::from_key(key.as_ref())
                .ok_or_else(|| anyhow::anyhow!("unknown slot '{}'", key.as_ref()))?;
            slots.set(field, Some(value.into()));
        }
        Ok(slots)
    }

    pub fn is_filled(&self, field: SlotField) -> bool {
        self.get(field).is_some_and(|v| !v.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        SlotField::ALL.iter().all(|f| !self.is_filled(*f))
    }

    /// Fields from `required` that are not yet filled, in the given order.
    pub fn missing(&self, required: &[SlotField]) -> Vec<SlotField> {
        required
            .iter()
            .copied()
            .filter(|f| !self.is_filled(*f))
            .collect()
    }

    /// Merge an extraction result into these slots.
    ///
    /// Only non-empty values in `update` are applied; a `None` or blank value
    /// never erases an existing field. Returns the fields whose value changed.
    pub fn merge(&mut self, update: &Slots) -> Vec<SlotField> {
        let mut changed = Vec::new();
        for field in SlotField::ALL {
            let Some(value) = update.get(field).map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let slot = self.slot_mut(field);
            if slot.as_deref() != Some(value) {
                *slot = Some(value.to_string());
                changed.push(field);
            }
        }
        changed
    }

    /// Canonicalize date and time fields where they parse; other values are
    /// kept verbatim so the backend can reject them with a clear reply.
    pub fn normalized(&self) -> Slots {
        let mut slots = self.clone();
        for field in [SlotField::Date, SlotField::NewDate] {
            if let Some(date) = self.get(field).and_then(normalize_date) {
                slots.set(field, Some(date));
            }
        }
        for field in [SlotField::Time, SlotField::NewTime] {
            if let Some(time) = self.get(field).and_then(normalize_time) {
                slots.set(field, Some(time));
            }
        }
        if let Some(doctor) = &self.doctor {
            slots.doctor = Some(normalize_name(doctor));
        }
        if let Some(spec) = &self.specialization {
            slots.specialization = Some(normalize_specialization(spec));
        }
        slots
    }
}

/// Canonical date format used in slots and by the scheduling backend.
pub const DATE_FORMAT: &str = "%d-%m-%Y";
/// Canonical time format used in slots and by the scheduling backend.
pub const TIME_FORMAT: &str = "%H:%M";

/// Normalize a date to `DD-MM-YYYY`. Accepts `DD-MM-YYYY`, `DD/MM/YYYY`,
/// `DD.MM.YYYY` and ISO `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    ["%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|d| d.format(DATE_FORMAT).to_string())
}

/// Normalize a time to 24h `HH:MM`. Accepts `14:30`, `9:05`, `2:30 pm`,
/// `10am` and `10 AM`.
pub fn normalize_time(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase().replace('.', "");
    let (body, meridiem) = if let Some(body) = lowered.strip_suffix("am") {
        (body.trim(), Some(false))
    } else if let Some(body) = lowered.strip_suffix("pm") {
        (body.trim(), Some(true))
    } else {
        (lowered.as_str(), None)
    };

    let (hours, minutes) = match body.split_once(':') {
        Some((h, m)) => (h.trim().parse::<u32>().ok()?, m.trim().parse::<u32>().ok()?),
        None => (body.parse::<u32>().ok()?, 0),
    };

    let hours = match meridiem {
        Some(pm) if (1..=12).contains(&hours) => (hours % 12) + if pm { 12 } else { 0 },
        Some(_) => return None,
        // a bare hour without am/pm is too ambiguous to accept
        None if !body.contains(':') => return None,
        None => hours,
    };

    NaiveTime::from_hms_opt(hours, minutes, 0).map(|t| t.format(TIME_FORMAT).to_string())
}

/// Lowercase, strip an honorific, and collapse whitespace.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = lowered
        .strip_prefix("dr.")
        .or_else(|| lowered.strip_prefix("dr "))
        .or_else(|| lowered.strip_prefix("doctor "))
        .unwrap_or(&lowered);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Specializations are stored in `snake_case` (`oral_surgeon`).
pub fn normalize_specialization(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// `kevin anderson` -> `Kevin Anderson`, `oral_surgeon` -> `Oral Surgeon`
pub fn display_name(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '_')
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
