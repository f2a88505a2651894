//! Appointment generation and negotiation.
//!
//! The generator materializes the next occurrence of every active treatment
//! that has nothing scheduled in the future. Each appointment is then
//! negotiated by the two parties through confirm/edit/cancel transitions.
//! Treatment-level endings are pushed onto future appointments by
//! [`end_future_appointments`].

use crate::recurrence::Recurrence;
use crate::{
    Appointment, AppointmentStatus, Caller, Database, Error, Result, Role, TreatmentStatus,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Side of the appointment acting on it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Party {
    Patient,
    Psychologist,
}

impl Party {
    fn owns(&self, appointment: &Appointment, profile_id: Uuid) -> bool {
        match self {
            Party::Patient => appointment.patient_id == profile_id,
            Party::Psychologist => appointment.psychologist_id == profile_id,
        }
    }
}

/// Requested change of a single appointment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Confirm,
    Edit,
    Cancel,
}

/// Status the appointment moves to when `party` performs `action` from `from`
pub fn next_status(
    from: AppointmentStatus,
    party: Party,
    action: Action,
) -> Result<AppointmentStatus> {
    use AppointmentStatus::*;

    let (to, forbidden) = match (action, party) {
        (Action::Confirm, Party::Patient) => {
            let to = if matches!(
                from,
                EditedByPsychologist | ConfirmedByPsychologist | ConfirmedByBoth
            ) {
                ConfirmedByBoth
            } else {
                ConfirmedByPatient
            };
            let forbidden = matches!(
                from,
                EditedByPatient | ConfirmedByPatient | CanceledByPsychologist
            );
            (to, forbidden)
        }
        (Action::Confirm, Party::Psychologist) => {
            let to = if matches!(from, EditedByPatient | ConfirmedByPatient | ConfirmedByBoth) {
                ConfirmedByBoth
            } else {
                ConfirmedByPsychologist
            };
            let forbidden = matches!(
                from,
                EditedByPsychologist | ConfirmedByPsychologist | CanceledByPatient
            );
            (to, forbidden)
        }
        (Action::Edit, Party::Patient) => (EditedByPatient, from == CanceledByPsychologist),
        (Action::Edit, Party::Psychologist) => (EditedByPsychologist, from == CanceledByPatient),
        (Action::Cancel, Party::Patient) => (CanceledByPatient, from.is_canceled()),
        (Action::Cancel, Party::Psychologist) => (CanceledByPsychologist, from.is_canceled()),
    };

    if forbidden || from.is_treatment_terminal() {
        return Err(Error::InvalidTransition { from, to });
    }
    Ok(to)
}

/// Patient-side reschedule; the session keeps its length
#[derive(Clone, Debug)]
pub struct PatientEdit {
    pub start: DateTime<Utc>,
    pub reason: String,
}

/// Psychologist-side reschedule; bounds and price may change independently
#[derive(Clone, Debug)]
pub struct PsychologistEdit {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub price_range_name: Option<String>,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct AppointmentLifecycle {
    recurrence: Recurrence,
}

impl AppointmentLifecycle {
    pub fn new(recurrence: Recurrence) -> Self {
        Self { recurrence }
    }

    /// Create the next appointment for each active treatment lacking a future one.
    ///
    /// Restricted to the automation identity. Overlapping invocations must be
    /// serialized by the caller.
    pub fn generate_pending(
        &self,
        db: &mut Database,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        if !caller.has_role(Role::Automation) {
            return Err(Error::Unauthorized(format!(
                "{} may not generate appointments",
                caller.id
            )));
        }

        let scheduled: HashSet<Uuid> = db
            .appointments
            .iter()
            .filter(|a| a.start > now)
            .map(|a| a.treatment_id)
            .collect();

        let mut generated = Vec::new();
        for treatment in db
            .treatments
            .find(|t| t.status == TreatmentStatus::Active && !scheduled.contains(&t.id))
        {
            let (Some(patient_id), Some(price_range_name)) =
                (treatment.patient_id, treatment.price_range_name.clone())
            else {
                tracing::warn!(
                    "Active treatment {} lacks a patient or price range, skipping",
                    treatment.id
                );
                continue;
            };

            let start = self.recurrence.next_start(&treatment.schedule, now)?;
            let length = chrono::Duration::try_seconds(treatment.schedule.duration)
                .ok_or_else(|| Error::Validation("duration is out of range".into()))?;
            let end = start
                .checked_add_signed(length)
                .ok_or_else(|| Error::Validation("appointment end is out of range".into()))?;

            tracing::debug!("Treatment {} next occurrence at {}", treatment.id, start);
            generated.push(Appointment {
                id: Uuid::new_v4(),
                treatment_id: treatment.id,
                patient_id,
                psychologist_id: treatment.psychologist_id,
                start,
                end,
                price_range_name,
                status: AppointmentStatus::Created,
                reason: None,
            });
        }

        db.appointments.insert_many(generated.clone())?;
        tracing::info!("Generated {} appointments", generated.len());
        Ok(generated)
    }

    pub fn confirm(
        &self,
        db: &mut Database,
        party: Party,
        profile_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Appointment> {
        let mut appointment = owned(db, party, profile_id, appointment_id)?;
        let to = next_status(appointment.status, party, Action::Confirm)?;

        tracing::info!(
            "Appointment {} confirmed by {:?}: {} -> {}",
            appointment.id,
            party,
            appointment.status,
            to
        );
        appointment.status = to;
        appointment.reason = None;
        db.appointments.update(appointment.clone())?;
        Ok(appointment)
    }

    pub fn edit_by_patient(
        &self,
        db: &mut Database,
        patient_id: Uuid,
        appointment_id: Uuid,
        edit: PatientEdit,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let mut appointment = owned(db, Party::Patient, patient_id, appointment_id)?;
        let to = next_status(appointment.status, Party::Patient, Action::Edit)?;

        if edit.start <= now {
            return Err(Error::Validation(
                "appointment start cannot be in the past".into(),
            ));
        }

        let shift = edit.start - appointment.start;
        appointment.end += shift;
        appointment.start = edit.start;
        appointment.status = to;
        appointment.reason = Some(edit.reason);
        db.appointments.update(appointment.clone())?;

        tracing::info!(
            "Appointment {} moved by patient to {}",
            appointment.id,
            appointment.start
        );
        Ok(appointment)
    }

    pub fn edit_by_psychologist(
        &self,
        db: &mut Database,
        psychologist_id: Uuid,
        appointment_id: Uuid,
        edit: PsychologistEdit,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let mut appointment = owned(db, Party::Psychologist, psychologist_id, appointment_id)?;
        let to = next_status(appointment.status, Party::Psychologist, Action::Edit)?;

        if edit.start <= now {
            return Err(Error::Validation(
                "appointment start cannot be in the past".into(),
            ));
        }
        if edit.start >= edit.end {
            return Err(Error::Validation(
                "appointment start must be before its end".into(),
            ));
        }
        if let Some(name) = &edit.price_range_name {
            if db.price_range(name).is_none() {
                return Err(Error::Validation(format!(
                    "price range {} does not exist",
                    name
                )));
            }
        }

        appointment.start = edit.start;
        appointment.end = edit.end;
        if let Some(name) = edit.price_range_name {
            appointment.price_range_name = name;
        }
        appointment.status = to;
        appointment.reason = Some(edit.reason);
        db.appointments.update(appointment.clone())?;

        tracing::info!(
            "Appointment {} rescheduled by psychologist to {} - {}",
            appointment.id,
            appointment.start,
            appointment.end
        );
        Ok(appointment)
    }

    pub fn cancel(
        &self,
        db: &mut Database,
        party: Party,
        profile_id: Uuid,
        appointment_id: Uuid,
        reason: String,
    ) -> Result<Appointment> {
        let mut appointment = owned(db, party, profile_id, appointment_id)?;
        let to = next_status(appointment.status, party, Action::Cancel)?;

        appointment.status = to;
        appointment.reason = Some(reason);
        db.appointments.update(appointment.clone())?;

        tracing::info!("Appointment {} canceled by {:?}", appointment.id, party);
        Ok(appointment)
    }

    /// Appointments where the profile takes part, earliest first
    pub fn list_for_profile(&self, db: &Database, profile_id: Uuid) -> Vec<Appointment> {
        let mut appointments = db
            .appointments
            .find(|a| a.patient_id == profile_id || a.psychologist_id == profile_id);
        appointments.sort_by_key(|a| a.start);
        appointments
    }
}

/// Fetch an appointment the profile takes part in as `party`.
/// Someone else's appointment is reported exactly like a missing one.
fn owned(
    db: &Database,
    party: Party,
    profile_id: Uuid,
    appointment_id: Uuid,
) -> Result<Appointment> {
    db.appointments
        .get(appointment_id)
        .filter(|a| party.owns(a, profile_id))
        .ok_or(Error::NotFound)
}

/// Move every future appointment of a treatment that the patient has not
/// canceled into `status`. Past appointments are left alone.
///
/// Rows are updated one by one; an error stops the cascade without undoing
/// the rows already written.
pub fn end_future_appointments(
    db: &mut Database,
    treatment_id: Uuid,
    status: AppointmentStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let affected = db.appointments.find(|a| {
        a.treatment_id == treatment_id
            && a.start > now
            && a.status != AppointmentStatus::CanceledByPatient
    });

    for mut appointment in affected.iter().cloned() {
        appointment.status = status;
        appointment.reason = Some(reason.to_string());
        db.appointments.update(appointment)?;
    }

    tracing::info!(
        "Set {} future appointments of treatment {} to {}",
        affected.len(),
        treatment_id,
        status
    );
    Ok(affected.len())
}
