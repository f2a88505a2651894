//! Characteristic import from CSV.
//!
//! Rows are `profile_id,kind,characteristic,value,weight` where `kind` is
//! `choice` or `preference`. Choice rows for the same profile and
//! characteristic are merged into one selection; `weight` is required for
//! preferences only.

use crate::{CharacteristicChoice, Database, Error, Preference, ProfileLookup, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct CsvRow {
    profile_id: String,
    kind: String,
    characteristic: String,
    value: String,
    weight: Option<i64>,
}

/// Counts of rows written by an import
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub choices: usize,
    pub preferences: usize,
}

/// Import characteristics from a CSV file into the store.
///
/// Imported selections replace existing ones for the same profile and
/// characteristic; preferences replace the same `(characteristic, value)`.
/// The store is untouched when any row is invalid.
pub fn import_characteristics(db: &mut Database, path: &Path) -> Result<ImportSummary> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut choices: Vec<CharacteristicChoice> = Vec::new();
    let mut preferences: Vec<Preference> = Vec::new();

    for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row?;
        // header is line 1
        let line = index + 2;

        let profile_id = Uuid::parse_str(&row.profile_id)
            .map_err(|e| Error::Validation(format!("line {}: invalid profile id: {}", line, e)))?;
        let profile_type = db.lookup(profile_id).profile_type().ok_or_else(|| {
            Error::Validation(format!("line {}: unknown profile {}", line, profile_id))
        })?;
        if row.characteristic.is_empty() || row.value.is_empty() {
            return Err(Error::Validation(format!(
                "line {}: characteristic and value are required",
                line
            )));
        }

        match row.kind.as_str() {
            "choice" => {
                let existing = choices.iter_mut().find(|c| {
                    c.profile_id == profile_id && c.characteristic == row.characteristic
                });
                match existing {
                    Some(choice) if !choice.values.contains(&row.value) => {
                        choice.values.push(row.value)
                    }
                    Some(_) => {}
                    None => choices.push(CharacteristicChoice {
                        id: Uuid::new_v4(),
                        profile_id,
                        profile_type,
                        characteristic: row.characteristic,
                        values: vec![row.value],
                    }),
                }
            }
            "preference" => {
                let weight = row.weight.ok_or_else(|| {
                    Error::Validation(format!("line {}: preference needs a weight", line))
                })?;
                preferences.retain(|p| {
                    !(p.profile_id == profile_id
                        && p.characteristic == row.characteristic
                        && p.value == row.value)
                });
                preferences.push(Preference {
                    id: Uuid::new_v4(),
                    profile_id,
                    profile_type,
                    characteristic: row.characteristic,
                    value: row.value,
                    weight,
                });
            }
            other => {
                return Err(Error::Validation(format!(
                    "line {}: unknown kind {:?}, expected choice or preference",
                    line, other
                )));
            }
        }
    }

    for choice in &choices {
        db.characteristic_choices.delete_where(|c| {
            c.profile_id == choice.profile_id && c.characteristic == choice.characteristic
        });
    }
    for pref in &preferences {
        db.preferences.delete_where(|p| {
            p.profile_id == pref.profile_id
                && p.characteristic == pref.characteristic
                && p.value == pref.value
        });
    }

    let summary = ImportSummary {
        choices: choices.len(),
        preferences: preferences.len(),
    };
    db.characteristic_choices.insert_many(choices)?;
    db.preferences.insert_many(preferences)?;

    tracing::info!(
        "Imported {} choices and {} preferences from {:?}",
        summary.choices,
        summary.preferences,
        path
    );
    Ok(summary)
}
