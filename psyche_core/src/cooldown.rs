//! Keyed cooldown ledger.
//!
//! A cooldown is live while `valid_until > now`. Rows are only ever appended;
//! expired rows are ignored by reads and may be pruned.

use crate::config::CooldownConfig;
use crate::{Cooldown, CooldownType, Database, Error, ProfileType, Result};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct CooldownLedger {
    durations: CooldownConfig,
}

impl CooldownLedger {
    pub fn new(durations: CooldownConfig) -> Self {
        Self { durations }
    }

    pub fn duration_of(&self, cooldown_type: CooldownType) -> Duration {
        let secs = match cooldown_type {
            CooldownType::TreatmentInterrupted => self.durations.treatment_interrupted_secs,
            CooldownType::TopAffinitiesSet => self.durations.top_affinities_set_secs,
        };
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::days(365_000))
    }

    /// Record a new cooldown starting at `now`
    pub fn save(
        &self,
        db: &mut Database,
        profile_id: Uuid,
        profile_type: ProfileType,
        cooldown_type: CooldownType,
        now: DateTime<Utc>,
    ) -> Result<Cooldown> {
        let valid_until = now
            .checked_add_signed(self.duration_of(cooldown_type))
            .ok_or_else(|| Error::Config(format!("{:?} cooldown is too long", cooldown_type)))?;

        let cooldown = Cooldown {
            id: Uuid::new_v4(),
            profile_id,
            profile_type,
            cooldown_type,
            valid_until,
        };
        db.cooldowns.insert(cooldown.clone())?;

        tracing::info!(
            "Cooldown {:?} set for {:?} {} until {}",
            cooldown_type,
            profile_type,
            profile_id,
            valid_until
        );
        Ok(cooldown)
    }

    /// Most recently written live cooldown, if any
    pub fn get(
        &self,
        db: &Database,
        profile_id: Uuid,
        profile_type: ProfileType,
        cooldown_type: CooldownType,
        now: DateTime<Utc>,
    ) -> Option<Cooldown> {
        db.cooldowns
            .find(|c| {
                c.profile_id == profile_id
                    && c.profile_type == profile_type
                    && c.cooldown_type == cooldown_type
                    && c.valid_until > now
            })
            .pop()
    }

    /// Fail with `RateLimited` while a cooldown is live
    pub fn ensure_clear(
        &self,
        db: &Database,
        profile_id: Uuid,
        profile_type: ProfileType,
        cooldown_type: CooldownType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.get(db, profile_id, profile_type, cooldown_type, now) {
            Some(cooldown) => Err(Error::RateLimited {
                until: cooldown.valid_until,
            }),
            None => Ok(()),
        }
    }

    /// Drop rows that can no longer be live
    pub fn prune_expired(&self, db: &mut Database, now: DateTime<Utc>) -> usize {
        let removed = db.cooldowns.delete_where(|c| c.valid_until <= now);
        if removed > 0 {
            tracing::info!("Pruned {} expired cooldowns", removed);
        }
        removed
    }
}
