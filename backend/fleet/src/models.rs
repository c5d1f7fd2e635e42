use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Position;

pub type Id = i64;

/// Enums stored as TEXT columns and sent as PascalCase JSON strings.
macro_rules! text_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

text_enum!(TripStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
});

text_enum!(AttendanceStatus {
    Present,
    Absent,
    Late,
});

text_enum!(ViolationType {
    RouteDeviation,
    SpeedViolation,
    RestrictedArea,
    StudentNotBoarded,
});

text_enum!(Severity { Medium, High });

text_enum!(PaymentStatus { Completed, Declined });

text_enum!(RiskLevel { Low, Medium, High });

text_enum!(SecurityCheckType {
    PciCompliance,
    CardSecurity,
    FraudDetection,
    RateLimit,
    AddressVerification,
});

impl TripStatus {
    /// Allowed lifecycle moves: Scheduled -> InProgress -> Completed, and
    /// cancellation from any state that has not finished.
    pub fn can_transition_to(self, next: TripStatus) -> bool {
        use TripStatus::*;

        matches!(
            (self, next),
            (Scheduled, InProgress)
                | (InProgress, Completed)
                | (Scheduled, Cancelled)
                | (InProgress, Cancelled)
        )
    }
}

impl ViolationType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RouteDeviation => "Route Deviation",
            Self::SpeedViolation => "Speed Violation",
            Self::RestrictedArea => "Restricted Area",
            Self::StudentNotBoarded => "Student Not Boarded",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: Id,
    pub route_id: Id,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sequence: u32,
}

impl Stop {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: Id,
    pub name: String,
    pub stops: Vec<Stop>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Id,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: Option<String>,
    pub parent_id: Id,
    pub stop_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: Id,
    pub name: String,
    pub license_number: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Id,
    pub registration: String,
    pub model: Option<String>,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: Id,
    pub route_id: Id,
    pub vehicle_id: Id,
    pub driver_id: Id,
    pub scheduled_date: NaiveDate,
    pub status: TripStatus,
    pub last_latitude: Option<f64>,
    pub last_longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: Id,
    pub student_id: Id,
    pub trip_id: Id,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceAlert {
    /// Unset until the alert is written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub trip_id: Id,
    pub student_id: Option<Id>,
    pub stop_id: Option<Id>,
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub description: String,
    pub distance_km: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Id,
    pub student_id: Id,
    pub amount_cents: i64,
    pub currency: String,
    pub card_last4: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub risk_score: i32,
    pub risk_level: RiskLevel,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCheckResult {
    pub check_type: SecurityCheckType,
    pub passed: bool,
    pub risk_score: i32,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityValidation {
    pub checks: Vec<SecurityCheckResult>,
    pub risk_score: i32,
    pub risk_level: RiskLevel,
    pub is_valid: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Id,
    pub entity: String,
    pub entity_id: Id,
    pub action: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_round_trip() {
        assert_eq!(TripStatus::InProgress.as_str(), "InProgress");
        assert_eq!("Late".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Late);
        assert!("Boarded".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_enum_json_is_pascal_case() {
        let json = serde_json::to_string(&ViolationType::StudentNotBoarded).unwrap();
        assert_eq!(json, "\"StudentNotBoarded\"");
    }

    #[test]
    fn test_trip_transitions() {
        use TripStatus::*;

        assert!(Scheduled.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(InProgress));
    }
}
