//! Core domain types for the Psyche matching system.
//!
//! This module defines the fundamental records the engine works on:
//! - Profiles (patients, psychologists) and their characteristics
//! - Price ranges and the offerings psychologists publish under them
//! - Treatments and the appointments they generate
//! - Cooldowns, cached affinities and queued mail

use crate::recurrence::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Profiles
// ============================================================================

/// Which side of the relationship a profile belongs to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileType {
    Patient,
    Psychologist,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Psychologist {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Result of resolving a bare profile id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    Patient(Uuid),
    Psychologist(Uuid),
    NotFound,
}

impl Profile {
    pub fn profile_type(&self) -> Option<ProfileType> {
        match self {
            Profile::Patient(_) => Some(ProfileType::Patient),
            Profile::Psychologist(_) => Some(ProfileType::Psychologist),
            Profile::NotFound => None,
        }
    }
}

/// Values a profile selected for one characteristic (e.g. `income = [LOW]`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CharacteristicChoice {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub profile_type: ProfileType,
    pub characteristic: String,
    pub values: Vec<String>,
}

/// Weighted wish a profile holds about the other party
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preference {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub profile_type: ProfileType,
    pub characteristic: String,
    pub value: String,
    pub weight: i64,
}

// ============================================================================
// Price ranges
// ============================================================================

/// A price tier and the income codes that qualify for it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceRange {
    pub id: Uuid,
    pub name: String,
    /// Comma-separated income codes, e.g. `"LOW,MEDIUM"`
    pub eligible_incomes: String,
}

impl PriceRange {
    /// Whether a patient with the given income code may be treated in this range
    pub fn accepts(&self, income: &str) -> bool {
        self.eligible_incomes
            .split(',')
            .map(str::trim)
            .any(|code| !code.is_empty() && code == income)
    }
}

/// Standing offer of a psychologist to take one pending treatment under a price range.
/// Consumed when a treatment under it is assigned.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceRangeOffering {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub price_range_name: String,
}

// ============================================================================
// Treatments
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreatmentStatus {
    Pending,
    Active,
    Finalized,
    InterruptedByPatient,
    InterruptedByPsychologist,
}

impl TreatmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentStatus::Pending => "PENDING",
            TreatmentStatus::Active => "ACTIVE",
            TreatmentStatus::Finalized => "FINALIZED",
            TreatmentStatus::InterruptedByPatient => "INTERRUPTED_BY_PATIENT",
            TreatmentStatus::InterruptedByPsychologist => "INTERRUPTED_BY_PSYCHOLOGIST",
        }
    }

    /// Pending and active treatments occupy the psychologist's calendar
    pub fn occupies_schedule(&self) -> bool {
        matches!(self, TreatmentStatus::Pending | TreatmentStatus::Active)
    }
}

impl fmt::Display for TreatmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A psychologist's recurring offer to treat one patient
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Treatment {
    pub id: Uuid,
    pub psychologist_id: Uuid,
    pub patient_id: Option<Uuid>,
    #[serde(flatten)]
    pub schedule: Schedule,
    /// Empty exactly while the treatment is pending
    pub price_range_name: Option<String>,
    pub status: TreatmentStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

// ============================================================================
// Appointments
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Created,
    ConfirmedByPatient,
    ConfirmedByPsychologist,
    ConfirmedByBoth,
    EditedByPatient,
    EditedByPsychologist,
    CanceledByPatient,
    CanceledByPsychologist,
    TreatmentInterruptedByPatient,
    TreatmentInterruptedByPsychologist,
    TreatmentFinalized,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Created => "CREATED",
            AppointmentStatus::ConfirmedByPatient => "CONFIRMED_BY_PATIENT",
            AppointmentStatus::ConfirmedByPsychologist => "CONFIRMED_BY_PSYCHOLOGIST",
            AppointmentStatus::ConfirmedByBoth => "CONFIRMED_BY_BOTH",
            AppointmentStatus::EditedByPatient => "EDITED_BY_PATIENT",
            AppointmentStatus::EditedByPsychologist => "EDITED_BY_PSYCHOLOGIST",
            AppointmentStatus::CanceledByPatient => "CANCELED_BY_PATIENT",
            AppointmentStatus::CanceledByPsychologist => "CANCELED_BY_PSYCHOLOGIST",
            AppointmentStatus::TreatmentInterruptedByPatient => {
                "TREATMENT_INTERRUPTED_BY_PATIENT"
            }
            AppointmentStatus::TreatmentInterruptedByPsychologist => {
                "TREATMENT_INTERRUPTED_BY_PSYCHOLOGIST"
            }
            AppointmentStatus::TreatmentFinalized => "TREATMENT_FINALIZED",
        }
    }

    /// States only a treatment-level cascade can produce
    pub fn is_treatment_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::TreatmentInterruptedByPatient
                | AppointmentStatus::TreatmentInterruptedByPsychologist
                | AppointmentStatus::TreatmentFinalized
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::CanceledByPatient | AppointmentStatus::CanceledByPsychologist
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete session generated from a treatment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Appointment {
    pub id: Uuid,
    pub treatment_id: Uuid,
    pub patient_id: Uuid,
    pub psychologist_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub price_range_name: String,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
}

// ============================================================================
// Cooldowns and affinities
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CooldownType {
    /// Patient interrupted a treatment and may not take a new one yet
    TreatmentInterrupted,
    /// Cached affinities are still fresh
    TopAffinitiesSet,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cooldown {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub profile_type: ProfileType,
    pub cooldown_type: CooldownType,
    pub valid_until: DateTime<Utc>,
}

/// Cached bilateral compatibility of one patient/psychologist pair
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Affinity {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub psychologist_id: Uuid,
    pub score_for_patient: i64,
    pub score_for_psychologist: i64,
    pub created_at: DateTime<Utc>,
}

impl Affinity {
    pub fn combined_score(&self) -> i64 {
        self.score_for_patient
            .saturating_add(self.score_for_psychologist)
    }
}

// ============================================================================
// Mail and callers
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailStatus {
    Pending,
    Sent,
}

/// A rendered notification waiting in (or already out of) the outbox
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mail {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub status: MailStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Psychologist,
    Automation,
}

/// Identity invoking an operation, used for role checks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub roles: Vec<Role>,
}

impl Caller {
    pub fn automation(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: vec![Role::Automation],
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}
