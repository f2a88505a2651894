//! Periodic schedule algebra.
//!
//! A schedule repeats every `base_interval * frequency` seconds, anchored at the
//! Unix epoch, and each occurrence occupies `[start, start + duration)`:
//!
//! ```text
//! start(n) = base_interval * frequency * n + phase
//! ```
//!
//! Two schedules of different frequencies are compared over one super-period
//! of `lcm(f1, f2)` base intervals, after which both patterns repeat.

use crate::{Error, Result, Treatment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recurrence parameters of a treatment, all times in seconds
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    /// Number of base intervals between occurrences
    pub frequency: u32,
    /// Offset into the repeating interval, `0 <= phase < base_interval * frequency`
    pub phase: i64,
    pub duration: i64,
}

/// Occurrence window inside a super-period; `end <= start` means it wraps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Window {
    start: i64,
    end: i64,
}

/// Schedule arithmetic bound to one base interval length
#[derive(Clone, Copy, Debug)]
pub struct Recurrence {
    base_interval: i64,
}

impl Recurrence {
    pub fn new(base_interval_secs: u64) -> Self {
        Self {
            base_interval: i64::try_from(base_interval_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn base_interval(&self) -> i64 {
        self.base_interval
    }

    /// Length of one repetition of the schedule
    pub fn interval(&self, schedule: &Schedule) -> Result<i64> {
        self.base_interval
            .checked_mul(i64::from(schedule.frequency))
            .ok_or_else(|| Error::Validation("frequency is too large".into()))
    }

    /// Reject schedules that cannot be laid out on the grid
    pub fn validate(&self, schedule: &Schedule) -> Result<()> {
        if schedule.frequency == 0 {
            return Err(Error::Validation(
                "frequency must be a positive integer".into(),
            ));
        }
        if schedule.phase < 0 {
            return Err(Error::Validation("phase cannot be negative".into()));
        }
        if schedule.duration <= 0 {
            return Err(Error::Validation("duration must be positive".into()));
        }
        let interval = self.interval(schedule)?;
        if schedule.phase >= interval {
            return Err(Error::Validation(
                "phase cannot be bigger than the schedule interval".into(),
            ));
        }
        // A longer session would overlap its own next occurrence
        if schedule.duration > interval {
            return Err(Error::Validation(
                "duration cannot be longer than the schedule interval".into(),
            ));
        }
        Ok(())
    }

    /// Whether any occurrence of `a` overlaps any occurrence of `b`
    pub fn collides(&self, a: &Schedule, b: &Schedule) -> Result<bool> {
        self.validate(a)?;
        self.validate(b)?;

        let cycles = lcm(u64::from(a.frequency), u64::from(b.frequency));
        let cycles = i64::try_from(cycles)
            .map_err(|_| Error::Validation("frequency is too large".into()))?;
        let period = self
            .base_interval
            .checked_mul(cycles)
            .ok_or_else(|| Error::Validation("frequency is too large".into()))?;

        let mut ours = Vec::new();
        let mut theirs = Vec::new();
        for counter in 0..cycles {
            let offset = counter * self.base_interval;
            if counter % i64::from(a.frequency) == 0 {
                ours.push(window(offset + a.phase, a.duration, period)?);
            }
            if counter % i64::from(b.frequency) == 0 {
                theirs.push(window(offset + b.phase, b.duration, period)?);
            }
        }

        Ok(ours
            .iter()
            .any(|x| theirs.iter().any(|y| !windows_clear(x, y))))
    }

    /// Validate `candidate` and check it against every calendar-occupying
    /// treatment in `existing`, skipping the one with id `exclude`.
    pub fn check_collisions<'a, I>(
        &self,
        candidate: &Schedule,
        existing: I,
        exclude: Option<Uuid>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a Treatment>,
    {
        self.validate(candidate)?;

        for other in existing {
            if Some(other.id) == exclude || !other.status.occupies_schedule() {
                continue;
            }
            if self.collides(candidate, &other.schedule)? {
                tracing::debug!(
                    "Schedule {:?} collides with treatment {}",
                    candidate,
                    other.id
                );
                return Err(Error::Conflict(format!(
                    "there is another treatment in the same period (treatment {})",
                    other.id
                )));
            }
        }
        Ok(())
    }

    /// First occurrence strictly after `now`
    pub fn next_start(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let interval = self.interval(schedule)?;
        if interval <= 0 {
            return Err(Error::Validation(
                "frequency must be a positive integer".into(),
            ));
        }
        let now_secs = now.timestamp();
        let bucket = now_secs.div_euclid(interval);
        let mut start = interval * bucket + schedule.phase;
        if start <= now_secs {
            start += interval;
        }
        DateTime::from_timestamp(start, 0)
            .ok_or_else(|| Error::Validation(format!("start {} is out of range", start)))
    }
}

fn window(start: i64, duration: i64, period: i64) -> Result<Window> {
    let end = start
        .checked_add(duration)
        .ok_or_else(|| Error::Validation("duration is out of range".into()))?;
    Ok(Window {
        start,
        end: end.rem_euclid(period),
    })
}

/// Windows are clear of each other when at least three of the four
/// orderings hold. Touching boundaries (`a.end == b.start`) do not clash.
fn windows_clear(a: &Window, b: &Window) -> bool {
    let conditions = [
        a.start < a.end,
        a.end <= b.start,
        b.start < b.end,
        b.end <= a.start,
    ];
    conditions.iter().filter(|&&held| held).count() >= 3
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TreatmentStatus;
    use chrono::TimeZone;

    const WEEK: u64 = 604_800;

    fn schedule(frequency: u32, phase: i64, duration: i64) -> Schedule {
        Schedule {
            frequency,
            phase,
            duration,
        }
    }

    fn treatment(schedule: Schedule, status: TreatmentStatus) -> Treatment {
        Treatment {
            id: Uuid::new_v4(),
            psychologist_id: Uuid::new_v4(),
            patient_id: None,
            schedule,
            price_range_name: None,
            status,
            start_date: None,
            end_date: None,
            reason: None,
        }
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(2, 3), 6);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(1, 1), 1);
    }

    #[test]
    fn test_phase_must_fit_interval() {
        let rec = Recurrence::new(WEEK);
        for frequency in 1..5u32 {
            let interval = WEEK as i64 * i64::from(frequency);
            let err = rec
                .validate(&schedule(frequency, interval, 3600))
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "phase cannot be bigger than the schedule interval"
            );
            assert!(rec.validate(&schedule(frequency, interval - 1, 3600)).is_ok());
        }
    }

    #[test]
    fn test_rejects_zero_frequency_and_duration() {
        let rec = Recurrence::new(WEEK);
        assert!(rec.validate(&schedule(0, 0, 3600)).is_err());
        assert!(rec.validate(&schedule(1, 0, 0)).is_err());
        assert!(rec.validate(&schedule(1, -5, 3600)).is_err());
    }

    #[test]
    fn test_duration_must_fit_interval() {
        let rec = Recurrence::new(100);
        let err = rec.validate(&schedule(1, 0, 150)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "duration cannot be longer than the schedule interval"
        );
        assert!(rec.validate(&schedule(1, 0, 100)).is_ok());
        assert!(rec.validate(&schedule(2, 0, 150)).is_ok());
    }

    #[test]
    fn test_collides_rejects_oversized_durations() {
        let rec = Recurrence::new(100);
        // Would wrap to [0, 50) and slip past [50, 60)
        assert!(matches!(
            rec.collides(&schedule(1, 0, 150), &schedule(1, 50, 10)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            rec.collides(&schedule(1, 10, i64::MAX - 5), &schedule(1, 0, 3600)),
            Err(Error::Validation(_))
        ));
        // A session filling the whole period meets everything
        assert!(rec.collides(&schedule(1, 0, 100), &schedule(1, 50, 10)).unwrap());
    }

    #[test]
    fn test_window_end_overflow_is_an_error() {
        assert!(window(10, i64::MAX - 5, 100).is_err());
        assert_eq!(
            window(90, 20, 100).unwrap(),
            Window { start: 90, end: 10 }
        );
    }

    #[test]
    fn test_touching_windows_do_not_collide() {
        let rec = Recurrence::new(WEEK);
        let first = schedule(2, 226_800, 3600);
        let second = schedule(2, 230_400, 3600);
        assert!(!rec.collides(&first, &second).unwrap());
        assert!(!rec.collides(&second, &first).unwrap());
    }

    #[test]
    fn test_overlapping_windows_collide() {
        let rec = Recurrence::new(WEEK);
        let first = schedule(2, 226_800, 3600);
        let overlapping = schedule(2, 228_600, 3600);
        assert!(rec.collides(&first, &overlapping).unwrap());
    }

    #[test]
    fn test_mixed_frequencies() {
        let rec = Recurrence::new(WEEK);
        let biweekly = schedule(2, 226_800, 3600);
        // Weekly series hits the biweekly slot every other week
        let weekly = schedule(1, 226_800, 3600);
        assert!(rec.collides(&weekly, &biweekly).unwrap());

        // Biweekly slot in the second week, weekly slot lines up with it
        let second_week = schedule(2, 226_800 + WEEK as i64, 3600);
        assert!(rec.collides(&weekly, &second_week).unwrap());

        // Biweekly series in opposite weeks never meet
        assert!(!rec.collides(&biweekly, &second_week).unwrap());
    }

    #[test]
    fn test_wrapping_window() {
        let rec = Recurrence::new(100);
        // Occupies [90, 100) and [0, 10)
        let wrapping = schedule(1, 90, 20);
        assert!(rec.collides(&wrapping, &schedule(1, 5, 10)).unwrap());
        assert!(!rec.collides(&wrapping, &schedule(1, 10, 10)).unwrap());
        assert!(!rec.collides(&schedule(1, 10, 10), &wrapping).unwrap());
        // Two wrapping windows always meet at the period boundary
        assert!(rec.collides(&wrapping, &schedule(1, 95, 10)).unwrap());
    }

    #[test]
    fn test_check_collisions_names_conflict_and_excludes_self() {
        let rec = Recurrence::new(WEEK);
        let first = treatment(schedule(2, 226_800, 3600), TreatmentStatus::Pending);
        let second = treatment(schedule(2, 230_400, 3600), TreatmentStatus::Active);
        let existing = vec![first.clone(), second];

        let err = rec
            .check_collisions(&schedule(1, 226_800, 3600), &existing, None)
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("there is another treatment in the same period"));
        assert!(err.to_string().contains(&first.id.to_string()));

        // Updating the first treatment in place only compares against the second
        rec.check_collisions(&schedule(2, 226_800, 3600), &existing, Some(first.id))
            .unwrap();
    }

    #[test]
    fn test_finished_treatments_do_not_occupy_calendar() {
        let rec = Recurrence::new(WEEK);
        let done = treatment(schedule(1, 226_800, 3600), TreatmentStatus::Finalized);
        rec.check_collisions(&schedule(1, 226_800, 3600), [&done], None)
            .unwrap();
    }

    #[test]
    fn test_next_start_in_current_bucket() {
        let rec = Recurrence::new(100);
        let now = Utc.timestamp_opt(1_050, 0).unwrap();
        let next = rec.next_start(&schedule(1, 70, 10), now).unwrap();
        assert_eq!(next.timestamp(), 1_070);
    }

    #[test]
    fn test_next_start_rolls_to_next_bucket() {
        let rec = Recurrence::new(100);
        let now = Utc.timestamp_opt(1_070, 0).unwrap();
        let next = rec.next_start(&schedule(1, 70, 10), now).unwrap();
        assert_eq!(next.timestamp(), 1_170);

        // Buckets of 300: 900..1200, slot at 1150 already passed
        let later = Utc.timestamp_opt(1_160, 0).unwrap();
        let next = rec.next_start(&schedule(3, 250, 10), later).unwrap();
        assert_eq!(next.timestamp(), 1_450);
    }
}
