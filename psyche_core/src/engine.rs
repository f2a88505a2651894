//! Wiring of the scheduling and matching components.
//!
//! `Engine` builds every component from one `Config` so callers never
//! assemble intervals, cooldown durations or templates by hand:
//! - Recurrence grid from `[schedule]`
//! - Cooldown ledger from `[cooldowns]`
//! - Treatment and appointment lifecycles
//! - Affinity ranking from `[matching]`

use crate::appointment::AppointmentLifecycle;
use crate::cooldown::CooldownLedger;
use crate::eligibility::Eligibility;
use crate::mail::Notifier;
use crate::matching::MatchingEngine;
use crate::recurrence::Recurrence;
use crate::treatment::TreatmentLifecycle;
use crate::{Caller, Config};

#[derive(Clone, Debug)]
pub struct Engine {
    pub recurrence: Recurrence,
    pub cooldowns: CooldownLedger,
    pub treatments: TreatmentLifecycle,
    pub appointments: AppointmentLifecycle,
    pub matching: MatchingEngine,
    automation_identity: String,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        let recurrence = Recurrence::new(config.schedule.base_interval_secs);
        let cooldowns = CooldownLedger::new(config.cooldowns.clone());
        let eligibility = Eligibility::new(config.matching.income_characteristic.clone());
        let notifier = Notifier::new(config.notifications.clone());

        tracing::debug!(
            "Engine configured with base interval {}s",
            recurrence.base_interval()
        );

        Self {
            recurrence,
            treatments: TreatmentLifecycle::new(
                recurrence,
                cooldowns.clone(),
                eligibility,
                notifier,
            ),
            appointments: AppointmentLifecycle::new(recurrence),
            matching: MatchingEngine::new(cooldowns.clone(), &config.matching),
            cooldowns,
            automation_identity: config.automation.identity.clone(),
        }
    }

    /// Identity the batch scheduler runs under
    pub fn automation_caller(&self) -> Caller {
        Caller::automation(self.automation_identity.clone())
    }
}
