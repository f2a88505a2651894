//! Patient/psychologist affinity ranking.
//!
//! Each side scores the other by summing the weights of its own preferences
//! that the other side's characteristic choices satisfy. Rankings are cached
//! per patient and only recomputed once the `TopAffinitiesSet` cooldown lapses.

use crate::config::MatchingConfig;
use crate::cooldown::CooldownLedger;
use crate::eligibility::Eligibility;
use crate::{
    Affinity, CharacteristicChoice, CharacteristicSource, CooldownType, Database, Error,
    Preference, Profile, ProfileLookup, ProfileType, Result,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct MatchingEngine {
    ledger: CooldownLedger,
    eligibility: Eligibility,
    max_affinities: usize,
}

impl MatchingEngine {
    pub fn new(ledger: CooldownLedger, config: &MatchingConfig) -> Self {
        Self {
            ledger,
            eligibility: Eligibility::new(config.income_characteristic.clone()),
            max_affinities: config.max_affinities,
        }
    }

    /// Cached ranking for a patient, refreshed when stale
    pub fn get_top_affinities(
        &self,
        db: &mut Database,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Affinity>> {
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

        let fresh = self
            .ledger
            .get(
                db,
                patient_id,
                ProfileType::Patient,
                CooldownType::TopAffinitiesSet,
                now,
            )
            .is_some();
        if fresh {
            tracing::debug!("Affinities for patient {} are fresh, using cache", patient_id);
        } else {
            self.recompute(db, patient_id, now)?;
            self.ledger.save(
                db,
                patient_id,
                ProfileType::Patient,
                CooldownType::TopAffinitiesSet,
                now,
            )?;
        }

        Ok(db.affinities.find(|a| a.patient_id == patient_id))
    }

    /// Rebuild and replace the stored ranking for a patient
    pub fn recompute(
        &self,
        db: &mut Database,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Affinity>> {
        let income = self.eligibility.income_of(db, patient_id)?;
        let eligible: HashSet<String> = self
            .eligibility
            .ranges_for_income(db, &income)
            .into_iter()
            .map(|p| p.name)
            .collect();

        let mut candidates: Vec<Uuid> = Vec::new();
        for offering in db.offerings.iter() {
            if eligible.contains(&offering.price_range_name)
                && !candidates.contains(&offering.psychologist_id)
            {
                candidates.push(offering.psychologist_id);
            }
        }

        let patient_choices = db.choices(patient_id, ProfileType::Patient);
        let patient_preferences = db.preferences(patient_id, ProfileType::Patient);

        let mut ranking = Vec::new();
        for psychologist_id in candidates {
            let score_for_psychologist = score(
                &db.preferences(psychologist_id, ProfileType::Psychologist),
                &patient_choices,
            );
            let score_for_patient = score(
                &patient_preferences,
                &db.choices(psychologist_id, ProfileType::Psychologist),
            );

            if score_for_patient < 0 || score_for_psychologist < 0 {
                tracing::debug!(
                    "Dropping psychologist {} for patient {} ({}, {})",
                    psychologist_id,
                    patient_id,
                    score_for_patient,
                    score_for_psychologist
                );
                continue;
            }
            ranking.push(Affinity {
                id: Uuid::new_v4(),
                patient_id,
                psychologist_id,
                score_for_patient,
                score_for_psychologist,
                created_at: now,
            });
        }

        // sort_by is stable: ties keep discovery order
        ranking.sort_by(|a, b| b.combined_score().cmp(&a.combined_score()));
        ranking.truncate(self.max_affinities);

        let replaced = db.affinities.delete_where(|a| a.patient_id == patient_id);
        db.affinities.insert_many(ranking.clone())?;

        tracing::info!(
            "Recomputed affinities for patient {}: {} rows (replaced {})",
            patient_id,
            ranking.len(),
            replaced
        );
        Ok(ranking)
    }
}

/// Sum of preference weights satisfied by the other profile's choices
fn score(preferences: &[Preference], choices: &[CharacteristicChoice]) -> i64 {
    preferences
        .iter()
        .filter(|pref| {
            choices.iter().any(|choice| {
                choice.characteristic == pref.characteristic && choice.values.contains(&pref.value)
            })
        })
        .fold(0i64, |acc, pref| acc.saturating_add(pref.weight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CooldownConfig;
    use crate::{Patient, PriceRange, PriceRangeOffering, Psychologist};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        db: Database,
        engine: MatchingEngine,
        patient: Uuid,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
    }

    fn engine(max_affinities: usize) -> MatchingEngine {
        MatchingEngine::new(
            CooldownLedger::new(CooldownConfig {
                treatment_interrupted_secs: 86_400,
                top_affinities_set_secs: 3600,
            }),
            &MatchingConfig {
                max_affinities,
                income_characteristic: "income".into(),
            },
        )
    }

    fn choose(db: &mut Database, id: Uuid, kind: ProfileType, characteristic: &str, values: &[&str]) {
        db.characteristic_choices
            .insert(CharacteristicChoice {
                id: Uuid::new_v4(),
                profile_id: id,
                profile_type: kind,
                characteristic: characteristic.into(),
                values: values.iter().map(|v| v.to_string()).collect(),
            })
            .unwrap();
    }

    fn prefer(db: &mut Database, id: Uuid, kind: ProfileType, characteristic: &str, value: &str, weight: i64) {
        db.preferences
            .insert(Preference {
                id: Uuid::new_v4(),
                profile_id: id,
                profile_type: kind,
                characteristic: characteristic.into(),
                value: value.into(),
                weight,
            })
            .unwrap();
    }

    fn psychologist(db: &mut Database, name: &str, price_range: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.psychologists
            .insert(Psychologist {
                id,
                name: name.into(),
                email: format!("{}@example.com", name),
            })
            .unwrap();
        db.offerings
            .insert(PriceRangeOffering {
                id: Uuid::new_v4(),
                psychologist_id: id,
                price_range_name: price_range.into(),
            })
            .unwrap();
        id
    }

    fn fixture(max_affinities: usize) -> Fixture {
        let mut db = Database::default();
        for (name, eligible) in [("social", "LOW"), ("premium", "HIGH")] {
            db.price_ranges
                .insert(PriceRange {
                    id: Uuid::new_v4(),
                    name: name.into(),
                    eligible_incomes: eligible.into(),
                })
                .unwrap();
        }

        let patient = Uuid::new_v4();
        db.patients
            .insert(Patient {
                id: patient,
                name: "Ana".into(),
                email: "ana@example.com".into(),
            })
            .unwrap();
        choose(&mut db, patient, ProfileType::Patient, "income", &["LOW"]);
        choose(&mut db, patient, ProfileType::Patient, "language", &["pt", "en"]);

        Fixture {
            db,
            engine: engine(max_affinities),
            patient,
        }
    }

    #[test]
    fn test_score_sums_matching_weights() {
        let id = Uuid::new_v4();
        let prefs = vec![
            Preference {
                id: Uuid::new_v4(),
                profile_id: id,
                profile_type: ProfileType::Patient,
                characteristic: "language".into(),
                value: "pt".into(),
                weight: 3,
            },
            Preference {
                id: Uuid::new_v4(),
                profile_id: id,
                profile_type: ProfileType::Patient,
                characteristic: "approach".into(),
                value: "cbt".into(),
                weight: 5,
            },
        ];
        let choices = vec![CharacteristicChoice {
            id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            profile_type: ProfileType::Psychologist,
            characteristic: "language".into(),
            values: vec!["en".into(), "pt".into()],
        }];
        assert_eq!(score(&prefs, &choices), 3);
        assert_eq!(score(&prefs, &[]), 0);
    }

    #[test]
    fn test_score_saturates_on_huge_weights() {
        let id = Uuid::new_v4();
        let prefs: Vec<Preference> = ["pt", "en"]
            .iter()
            .map(|value| Preference {
                id: Uuid::new_v4(),
                profile_id: id,
                profile_type: ProfileType::Patient,
                characteristic: "language".into(),
                value: (*value).into(),
                weight: i64::MAX - 1,
            })
            .collect();
        let choices = vec![CharacteristicChoice {
            id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            profile_type: ProfileType::Psychologist,
            characteristic: "language".into(),
            values: vec!["en".into(), "pt".into()],
        }];
        assert_eq!(score(&prefs, &choices), i64::MAX);
    }

    #[test]
    fn test_recompute_ranks_eligible_candidates() {
        let mut f = fixture(10);
        let p = f.patient;
        let bia = psychologist(&mut f.db, "bia", "social");
        let caio = psychologist(&mut f.db, "caio", "social");
        let rich = psychologist(&mut f.db, "rich", "premium");

        // Bia wants Portuguese speakers; the patient wants CBT, which Caio practices
        prefer(&mut f.db, bia, ProfileType::Psychologist, "language", "pt", 2);
        choose(&mut f.db, caio, ProfileType::Psychologist, "approach", &["cbt"]);
        prefer(&mut f.db, p, ProfileType::Patient, "approach", "cbt", 5);
        choose(&mut f.db, rich, ProfileType::Psychologist, "approach", &["cbt"]);

        let ranking = f.engine.recompute(&mut f.db, p, now()).unwrap();
        let order: Vec<_> = ranking.iter().map(|a| a.psychologist_id).collect();
        assert_eq!(order, [caio, bia]);
        assert_eq!(ranking[0].score_for_patient, 5);
        assert_eq!(ranking[0].score_for_psychologist, 0);
        assert_eq!(ranking[1].score_for_psychologist, 2);
        assert_eq!(f.db.affinities.len(), 2);
    }

    #[test]
    fn test_recompute_drops_negative_and_truncates() {
        let mut f = fixture(2);
        let p = f.patient;
        let ids: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| psychologist(&mut f.db, n, "social"))
            .collect();
        // a dislikes English speakers more than it likes Portuguese ones
        prefer(&mut f.db, ids[0], ProfileType::Psychologist, "language", "pt", 1);
        prefer(&mut f.db, ids[0], ProfileType::Psychologist, "language", "en", -4);

        let ranking = f.engine.recompute(&mut f.db, p, now()).unwrap();
        assert!(ranking
            .iter()
            .all(|a| a.score_for_patient >= 0 && a.score_for_psychologist >= 0));
        // All ties: discovery order kept after dropping a
        let order: Vec<_> = ranking.iter().map(|a| a.psychologist_id).collect();
        assert_eq!(order, [ids[1], ids[2]]);
    }

    #[test]
    fn test_recompute_replaces_previous_rows() {
        let mut f = fixture(10);
        let p = f.patient;
        psychologist(&mut f.db, "bia", "social");
        f.engine.recompute(&mut f.db, p, now()).unwrap();
        psychologist(&mut f.db, "caio", "social");
        f.engine.recompute(&mut f.db, p, now()).unwrap();
        assert_eq!(f.db.affinities.find(|a| a.patient_id == p).len(), 2);
    }

    #[test]
    fn test_recompute_requires_income() {
        let mut f = fixture(10);
        let other = Uuid::new_v4();
        let err = f.engine.recompute(&mut f.db, other, now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_get_top_affinities_uses_cache_until_cooldown_lapses() {
        let mut f = fixture(10);
        let p = f.patient;
        psychologist(&mut f.db, "bia", "social");

        let first = f.engine.get_top_affinities(&mut f.db, p, now()).unwrap();
        assert_eq!(first.len(), 1);

        // New candidate is invisible while the cache is fresh
        psychologist(&mut f.db, "caio", "social");
        let cached = f
            .engine
            .get_top_affinities(&mut f.db, p, now() + Duration::minutes(30))
            .unwrap();
        assert_eq!(cached, first);

        let refreshed = f
            .engine
            .get_top_affinities(&mut f.db, p, now() + Duration::hours(1))
            .unwrap();
        assert_eq!(refreshed.len(), 2);
    }

    #[test]
    fn test_get_top_affinities_blocked_after_interruption() {
        let mut f = fixture(10);
        let p = f.patient;
        let cooldown = f
            .engine
            .ledger
            .save(
                &mut f.db,
                p,
                ProfileType::Patient,
                CooldownType::TreatmentInterrupted,
                now(),
            )
            .unwrap();

        let err = f.engine.get_top_affinities(&mut f.db, p, now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            Error::RateLimited {
                until: cooldown.valid_until
            }
            .to_string()
        );
        assert!(f.db.affinities.is_empty());
    }

    #[test]
    fn test_get_top_affinities_unknown_patient() {
        let mut f = fixture(10);
        let bia = psychologist(&mut f.db, "bia", "social");
        assert!(matches!(
            f.engine.get_top_affinities(&mut f.db, bia, now()),
            Err(Error::NotFound)
        ));
    }
}
