//! Income-based price range eligibility.

use crate::{CharacteristicSource, Database, Error, PriceRange, ProfileType, Result};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Eligibility {
    income_characteristic: String,
}

impl Eligibility {
    pub fn new(income_characteristic: impl Into<String>) -> Self {
        Self {
            income_characteristic: income_characteristic.into(),
        }
    }

    /// The income code the patient selected
    pub fn income_of(&self, db: &Database, patient_id: Uuid) -> Result<String> {
        db.choices(patient_id, ProfileType::Patient)
            .into_iter()
            .find(|c| c.characteristic == self.income_characteristic)
            .and_then(|c| c.values.into_iter().next())
            .ok_or_else(|| Error::Validation("patient has no income selection".into()))
    }

    /// Price ranges open to the given income code, in store order
    pub fn ranges_for_income(&self, db: &Database, income: &str) -> Vec<PriceRange> {
        db.price_ranges.find(|p| p.accepts(income))
    }

    /// Fail unless the patient's income qualifies for `price_range`
    pub fn ensure_eligible(
        &self,
        db: &Database,
        patient_id: Uuid,
        price_range: &PriceRange,
    ) -> Result<()> {
        let income = self.income_of(db, patient_id)?;
        if !price_range.accepts(&income) {
            return Err(Error::Validation(format!(
                "income {} is not eligible for price range {}",
                income, price_range.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CharacteristicChoice;

    fn seed(income: Option<&str>) -> (Database, Uuid) {
        let mut db = Database::default();
        let patient = Uuid::new_v4();
        for (name, eligible) in [("social", "LOW"), ("standard", "LOW,MEDIUM"), ("premium", "HIGH")] {
            db.price_ranges
                .insert(PriceRange {
                    id: Uuid::new_v4(),
                    name: name.into(),
                    eligible_incomes: eligible.into(),
                })
                .unwrap();
        }
        if let Some(income) = income {
            db.characteristic_choices
                .insert(CharacteristicChoice {
                    id: Uuid::new_v4(),
                    profile_id: patient,
                    profile_type: ProfileType::Patient,
                    characteristic: "income".into(),
                    values: vec![income.into()],
                })
                .unwrap();
        }
        (db, patient)
    }

    #[test]
    fn test_ranges_for_income() {
        let (db, patient) = seed(Some("LOW"));
        let eligibility = Eligibility::new("income");
        let income = eligibility.income_of(&db, patient).unwrap();
        let names: Vec<_> = eligibility
            .ranges_for_income(&db, &income)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["social", "standard"]);
    }

    #[test]
    fn test_missing_income_is_validation_error() {
        let (db, patient) = seed(None);
        let err = Eligibility::new("income").income_of(&db, patient).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_ensure_eligible() {
        let (db, patient) = seed(Some("MEDIUM"));
        let eligibility = Eligibility::new("income");
        let standard = db.price_range("standard").unwrap();
        let premium = db.price_range("premium").unwrap();
        assert!(eligibility.ensure_eligible(&db, patient, &standard).is_ok());
        assert!(eligibility.ensure_eligible(&db, patient, &premium).is_err());
    }
}
