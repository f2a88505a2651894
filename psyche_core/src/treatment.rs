//! Treatment lifecycle.
//!
//! ```text
//! PENDING --assign--> ACTIVE --finalize--> FINALIZED
//!                       |----interrupt by patient------> INTERRUPTED_BY_PATIENT
//!                       '----interrupt by psychologist-> INTERRUPTED_BY_PSYCHOLOGIST
//! ```
//!
//! Leaving ACTIVE pushes the matching terminal status onto the treatment's
//! future appointments and queues a notification for the other party.

use crate::appointment::end_future_appointments;
use crate::cooldown::CooldownLedger;
use crate::eligibility::Eligibility;
use crate::mail::{Envelope, Notifier, TreatmentEvent};
use crate::recurrence::{Recurrence, Schedule};
use crate::{
    AppointmentStatus, CooldownType, Database, Error, Profile, ProfileLookup, ProfileType,
    PriceRangeOffering, Result, Treatment, TreatmentStatus,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

const FINALIZED_REASON: &str = "The treatment was finalized";
const INTERRUPTED_BY_PATIENT_REASON: &str = "The treatment was interrupted by the patient";
const INTERRUPTED_BY_PSYCHOLOGIST_REASON: &str =
    "The treatment was interrupted by the psychologist";

/// Input for a new pending treatment
#[derive(Clone, Debug)]
pub struct NewTreatment {
    pub schedule: Schedule,
    /// Price range the pending treatment is offered under
    pub price_range_name: String,
}

/// Structural fields of an existing treatment
#[derive(Clone, Debug)]
pub struct TreatmentUpdate {
    pub schedule: Schedule,
    /// Must be empty for pending treatments and set for all others
    pub price_range_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TreatmentLifecycle {
    recurrence: Recurrence,
    ledger: CooldownLedger,
    eligibility: Eligibility,
    notifier: Notifier,
}

impl TreatmentLifecycle {
    pub fn new(
        recurrence: Recurrence,
        ledger: CooldownLedger,
        eligibility: Eligibility,
        notifier: Notifier,
    ) -> Self {
        Self {
            recurrence,
            ledger,
            eligibility,
            notifier,
        }
    }

    /// Publish a pending treatment together with its price range offering
    pub fn create(
        &self,
        db: &mut Database,
        psychologist_id: Uuid,
        input: NewTreatment,
    ) -> Result<Treatment> {
        if db.lookup(psychologist_id) != Profile::Psychologist(psychologist_id) {
            return Err(Error::NotFound);
        }

        let own = db.treatments.find(|t| t.psychologist_id == psychologist_id);
        self.recurrence
            .check_collisions(&input.schedule, &own, None)?;

        if db.price_range(&input.price_range_name).is_none() {
            return Err(Error::Validation(format!(
                "price range {} does not exist",
                input.price_range_name
            )));
        }

        let treatment = Treatment {
            id: Uuid::new_v4(),
            psychologist_id,
            patient_id: None,
            schedule: input.schedule,
            price_range_name: None,
            status: TreatmentStatus::Pending,
            start_date: None,
            end_date: None,
            reason: None,
        };
        db.treatments.insert(treatment.clone())?;
        db.offerings.insert(PriceRangeOffering {
            id: Uuid::new_v4(),
            psychologist_id,
            price_range_name: input.price_range_name.clone(),
        })?;

        tracing::info!(
            "Psychologist {} created treatment {} under price range {}",
            psychologist_id,
            treatment.id,
            input.price_range_name
        );
        Ok(treatment)
    }

    /// Change the schedule (and price range of a started treatment)
    pub fn update(
        &self,
        db: &mut Database,
        psychologist_id: Uuid,
        treatment_id: Uuid,
        input: TreatmentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Treatment> {
        let mut treatment = owned_by_psychologist(db, psychologist_id, treatment_id)?;

        if !treatment.status.occupies_schedule() {
            return Err(Error::Conflict(format!(
                "treatment cannot be updated, current status is {}",
                treatment.status
            )));
        }
        match (&treatment.status, &input.price_range_name) {
            (TreatmentStatus::Pending, Some(_)) => {
                return Err(Error::Validation(
                    "a pending treatment cannot have a price range".into(),
                ));
            }
            (TreatmentStatus::Active, None) => {
                return Err(Error::Validation(
                    "an active treatment must have a price range".into(),
                ));
            }
            (_, Some(name)) if db.price_range(name).is_none() => {
                return Err(Error::Validation(format!(
                    "price range {} does not exist",
                    name
                )));
            }
            _ => {}
        }

        let own = db.treatments.find(|t| t.psychologist_id == psychologist_id);
        self.recurrence
            .check_collisions(&input.schedule, &own, Some(treatment.id))?;

        treatment.schedule = input.schedule;
        treatment.price_range_name = input.price_range_name;
        db.treatments.update(treatment.clone())?;
        tracing::info!("Treatment {} updated to {:?}", treatment.id, treatment.schedule);

        if treatment.status == TreatmentStatus::Active {
            self.notify(db, &treatment, ProfileType::Patient, TreatmentEvent::Modified, now)?;
        }
        Ok(treatment)
    }

    /// Withdraw a pending treatment along with its offering
    pub fn delete(
        &self,
        db: &mut Database,
        psychologist_id: Uuid,
        treatment_id: Uuid,
        price_range_name: &str,
    ) -> Result<()> {
        let treatment = owned_by_psychologist(db, psychologist_id, treatment_id)?;
        if treatment.status != TreatmentStatus::Pending {
            return Err(Error::Conflict(format!(
                "treatment cannot be deleted, current status is {}",
                treatment.status
            )));
        }

        let offering = find_offering(db, psychologist_id, price_range_name)?;
        db.offerings.delete(offering.id);
        db.treatments.delete(treatment.id);

        tracing::info!("Deleted pending treatment {}", treatment.id);
        Ok(())
    }

    /// Patient takes a pending treatment under one of its offered price ranges
    pub fn assign(
        &self,
        db: &mut Database,
        patient_id: Uuid,
        treatment_id: Uuid,
        price_range_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Treatment> {
        if db.lookup(patient_id) != Profile::Patient(patient_id) {
            return Err(Error::NotFound);
        }
        self.ledger.ensure_clear(
            db,
            patient_id,
            ProfileType::Patient,
            CooldownType::TreatmentInterrupted,
            now,
        )?;

        if let Some(active) = self.active_for_patient(db, patient_id) {
            if active.id != treatment_id {
                return Err(Error::Conflict(format!(
                    "patient already has an active treatment ({})",
                    active.id
                )));
            }
        }

        let mut treatment = db.treatments.get(treatment_id).ok_or(Error::NotFound)?;
        if treatment.status != TreatmentStatus::Pending {
            return Err(Error::Conflict(format!(
                "treatment cannot be assigned, current status is {}",
                treatment.status
            )));
        }

        let offering = find_offering(db, treatment.psychologist_id, price_range_name)?;
        let price_range = db.price_range(price_range_name).ok_or_else(|| {
            Error::Validation(format!("price range {} does not exist", price_range_name))
        })?;
        self.eligibility
            .ensure_eligible(db, patient_id, &price_range)?;

        treatment.status = TreatmentStatus::Active;
        treatment.patient_id = Some(patient_id);
        treatment.price_range_name = Some(price_range.name);
        treatment.start_date = Some(now);
        db.treatments.update(treatment.clone())?;
        db.offerings.delete(offering.id);

        tracing::info!(
            "Treatment {} assigned to patient {} under {}",
            treatment.id,
            patient_id,
            price_range_name
        );
        Ok(treatment)
    }

    pub fn finalize(
        &self,
        db: &mut Database,
        psychologist_id: Uuid,
        treatment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Treatment> {
        let mut treatment = owned_by_psychologist(db, psychologist_id, treatment_id)?;
        ensure_active(&treatment, TreatmentStatus::Finalized)?;

        treatment.status = TreatmentStatus::Finalized;
        treatment.end_date = Some(now);
        db.treatments.update(treatment.clone())?;

        end_future_appointments(
            db,
            treatment.id,
            AppointmentStatus::TreatmentFinalized,
            FINALIZED_REASON,
            now,
        )?;
        self.notify(db, &treatment, ProfileType::Patient, TreatmentEvent::Finalized, now)?;

        tracing::info!("Treatment {} finalized", treatment.id);
        Ok(treatment)
    }

    /// Patient ends the treatment; they may not take another until the cooldown lapses
    pub fn interrupt_by_patient(
        &self,
        db: &mut Database,
        patient_id: Uuid,
        treatment_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Treatment> {
        let mut treatment = db
            .treatments
            .get(treatment_id)
            .filter(|t| t.patient_id == Some(patient_id))
            .ok_or(Error::NotFound)?;
        ensure_active(&treatment, TreatmentStatus::InterruptedByPatient)?;

        treatment.status = TreatmentStatus::InterruptedByPatient;
        treatment.end_date = Some(now);
        treatment.reason = Some(reason.to_string());
        db.treatments.update(treatment.clone())?;

        end_future_appointments(
            db,
            treatment.id,
            AppointmentStatus::TreatmentInterruptedByPatient,
            INTERRUPTED_BY_PATIENT_REASON,
            now,
        )?;
        self.ledger.save(
            db,
            patient_id,
            ProfileType::Patient,
            CooldownType::TreatmentInterrupted,
            now,
        )?;
        self.notify(
            db,
            &treatment,
            ProfileType::Psychologist,
            TreatmentEvent::Interrupted,
            now,
        )?;

        tracing::info!("Treatment {} interrupted by patient", treatment.id);
        Ok(treatment)
    }

    pub fn interrupt_by_psychologist(
        &self,
        db: &mut Database,
        psychologist_id: Uuid,
        treatment_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Treatment> {
        let mut treatment = owned_by_psychologist(db, psychologist_id, treatment_id)?;
        ensure_active(&treatment, TreatmentStatus::InterruptedByPsychologist)?;

        treatment.status = TreatmentStatus::InterruptedByPsychologist;
        treatment.end_date = Some(now);
        treatment.reason = Some(reason.to_string());
        db.treatments.update(treatment.clone())?;

        end_future_appointments(
            db,
            treatment.id,
            AppointmentStatus::TreatmentInterruptedByPsychologist,
            INTERRUPTED_BY_PSYCHOLOGIST_REASON,
            now,
        )?;
        self.notify(
            db,
            &treatment,
            ProfileType::Patient,
            TreatmentEvent::Interrupted,
            now,
        )?;

        tracing::info!("Treatment {} interrupted by psychologist", treatment.id);
        Ok(treatment)
    }

    pub fn list_for_psychologist(&self, db: &Database, psychologist_id: Uuid) -> Vec<Treatment> {
        db.treatments.find(|t| t.psychologist_id == psychologist_id)
    }

    pub fn active_for_patient(&self, db: &Database, patient_id: Uuid) -> Option<Treatment> {
        db.treatments.find_one(|t| {
            t.patient_id == Some(patient_id) && t.status == TreatmentStatus::Active
        })
    }

    /// Pending treatments whose psychologist offers a price range the patient qualifies for
    pub fn available_for_patient(&self, db: &Database, patient_id: Uuid) -> Result<Vec<Treatment>> {
        if db.lookup(patient_id) != Profile::Patient(patient_id) {
            return Err(Error::NotFound);
        }
        let income = self.eligibility.income_of(db, patient_id)?;
        let eligible: HashSet<String> = self
            .eligibility
            .ranges_for_income(db, &income)
            .into_iter()
            .map(|p| p.name)
            .collect();
        let offering: HashSet<Uuid> = db
            .offerings
            .iter()
            .filter(|o| eligible.contains(&o.price_range_name))
            .map(|o| o.psychologist_id)
            .collect();

        Ok(db.treatments.find(|t| {
            t.status == TreatmentStatus::Pending && offering.contains(&t.psychologist_id)
        }))
    }

    fn notify(
        &self,
        db: &mut Database,
        treatment: &Treatment,
        recipient: ProfileType,
        event: TreatmentEvent,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let psychologist = db.psychologists.get(treatment.psychologist_id);
        let patient = treatment.patient_id.and_then(|id| db.patients.get(id));
        let (Some(psychologist), Some(patient)) = (psychologist, patient) else {
            tracing::warn!(
                "Treatment {} is missing a profile, {:?} mail not queued",
                treatment.id,
                event
            );
            return Ok(());
        };

        let recipient = match recipient {
            ProfileType::Patient => patient.email.as_str(),
            ProfileType::Psychologist => psychologist.email.as_str(),
        };
        let envelope = Envelope {
            recipient,
            patient_name: &patient.name,
            psychologist_name: &psychologist.name,
        };
        self.notifier.queue(db, event, &envelope, now)?;
        Ok(())
    }
}

fn owned_by_psychologist(
    db: &Database,
    psychologist_id: Uuid,
    treatment_id: Uuid,
) -> Result<Treatment> {
    db.treatments
        .get(treatment_id)
        .filter(|t| t.psychologist_id == psychologist_id)
        .ok_or(Error::NotFound)
}

fn ensure_active(treatment: &Treatment, target: TreatmentStatus) -> Result<()> {
    if treatment.status != TreatmentStatus::Active {
        return Err(Error::Conflict(format!(
            "treatment cannot become {}, current status is {}",
            target, treatment.status
        )));
    }
    Ok(())
}

fn find_offering(
    db: &Database,
    psychologist_id: Uuid,
    price_range_name: &str,
) -> Result<PriceRangeOffering> {
    db.offerings
        .find_one(|o| o.psychologist_id == psychologist_id && o.price_range_name == price_range_name)
        .ok_or_else(|| {
            Error::Conflict(format!(
                "no offering for price range {} from this psychologist",
                price_range_name
            ))
        })
}
