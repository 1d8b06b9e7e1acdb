use serde::{Deserialize, Serialize};

/// Classified action for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Book,
    CheckAvailability,
    Cancel,
    Reschedule,
    GeneralInfo,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::Book,
        Intent::CheckAvailability,
        Intent::Cancel,
        Intent::Reschedule,
        Intent::GeneralInfo,
    ];

    /// Parse a classifier tag.
    ///
    /// Accepts the canonical tags plus the long-form names classifiers tend to
    /// produce (`book_appointment`, `general_inquiry`, ...). Returns `None`
    /// for anything outside the enumerated set; the router decides what to do
    /// with those.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "book" | "book_appointment" | "booking" => Some(Intent::Book),
            "check_availability" | "availability" => Some(Intent::CheckAvailability),
            "cancel" | "cancel_appointment" => Some(Intent::Cancel),
            "reschedule" | "reschedule_appointment" => Some(Intent::Reschedule),
            "general_info" | "general_inquiry" | "info_request" | "greeting" => {
                Some(Intent::GeneralInfo)
            }
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Intent::Book => "book",
            Intent::CheckAvailability => "check_availability",
            Intent::Cancel => "cancel",
            Intent::Reschedule => "reschedule",
            Intent::GeneralInfo => "general_info",
        }
    }

    /// The handler that serves this intent.
    pub fn capability(&self) -> Capability {
        match self {
            Intent::Book => Capability::Booking,
            Intent::CheckAvailability => Capability::Availability,
            Intent::Cancel | Intent::Reschedule => Capability::Appointments,
            Intent::GeneralInfo => Capability::GeneralInfo,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

/// Dispatch targets. The set is closed; the router matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Booking,
    Availability,
    /// Cancel and reschedule of an existing appointment
    Appointments,
    GeneralInfo,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Booking => write!(f, "booking"),
            Capability::Availability => write!(f, "availability"),
            Capability::Appointments => write!(f, "appointments"),
            Capability::GeneralInfo => write!(f, "general_info"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_accepts_aliases() {
        assert_eq!(Intent::from_tag("book_appointment"), Some(Intent::Book));
        assert_eq!(Intent::from_tag(" Check-Availability "), Some(Intent::CheckAvailability));
        assert_eq!(Intent::from_tag("greeting"), Some(Intent::GeneralInfo));
        assert_eq!(Intent::from_tag("order_pizza"), None);
        assert_eq!(Intent::from_tag(""), None);
    }

    #[test]
    fn test_tags_round_trip() {
        for intent in Intent::ALL {
            assert_eq!(Intent::from_tag(intent.as_tag()), Some(intent));
        }
    }

    #[test]
    fn test_cancel_and_reschedule_share_capability() {
        assert_eq!(Intent::Cancel.capability(), Capability::Appointments);
        assert_eq!(Intent::Reschedule.capability(), Capability::Appointments);
        assert_ne!(Intent::Book.capability(), Intent::CheckAvailability.capability());
    }
}
