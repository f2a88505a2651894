#![forbid(unsafe_code)]

//! Core domain model and business logic for the Psyche matching system.
//!
//! This crate provides:
//! - Domain types (profiles, treatments, appointments, cooldowns, affinities)
//! - Recurrence grid and schedule collision checks
//! - Treatment and appointment lifecycles
//! - Cooldown ledger and affinity ranking
//! - Persistence (locked JSON store, CSV import/export, mail outbox)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod store;
pub mod recurrence;
pub mod cooldown;
pub mod eligibility;
pub mod mail;
pub mod appointment;
pub mod treatment;
pub mod matching;
pub mod import;
pub mod export;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use store::{CharacteristicSource, Database, ProfileLookup, Record, Table};
pub use recurrence::{Recurrence, Schedule};
pub use cooldown::CooldownLedger;
pub use mail::{dispatch_pending, JsonlMailSink, MailSink, Notifier, TreatmentEvent};
pub use appointment::{
    next_status, Action, AppointmentLifecycle, Party, PatientEdit, PsychologistEdit,
};
pub use treatment::{NewTreatment, TreatmentLifecycle, TreatmentUpdate};
pub use matching::MatchingEngine;
pub use import::{import_characteristics, ImportSummary};
pub use export::export_appointments;
pub use engine::Engine;
