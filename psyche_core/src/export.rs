//! Appointment calendar export to CSV.

use crate::{Appointment, Database, Result};
use std::fs::File;
use std::path::Path;
use uuid::Uuid;

/// A row in the calendar file
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    treatment_id: String,
    patient_id: String,
    psychologist_id: String,
    start: String,
    end: String,
    price_range: String,
    status: String,
    reason: Option<String>,
}

impl From<&Appointment> for CsvRow {
    fn from(appointment: &Appointment) -> Self {
        CsvRow {
            id: appointment.id.to_string(),
            treatment_id: appointment.treatment_id.to_string(),
            patient_id: appointment.patient_id.to_string(),
            psychologist_id: appointment.psychologist_id.to_string(),
            start: appointment.start.to_rfc3339(),
            end: appointment.end.to_rfc3339(),
            price_range: appointment.price_range_name.clone(),
            status: appointment.status.to_string(),
            reason: appointment.reason.clone(),
        }
    }
}

/// Write appointments ordered by start, optionally only those `profile`
/// takes part in. Overwrites `csv_path` and returns the row count.
pub fn export_appointments(
    db: &Database,
    profile: Option<Uuid>,
    csv_path: &Path,
) -> Result<usize> {
    let mut appointments = db.appointments.find(|a| match profile {
        Some(id) => a.patient_id == id || a.psychologist_id == id,
        None => true,
    });
    appointments.sort_by_key(|a| a.start);

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(csv_path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);
    for appointment in &appointments {
        writer.serialize(CsvRow::from(appointment))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!(
        "Exported {} appointments to {:?}",
        appointments.len(),
        csv_path
    );
    Ok(appointments.len())
}
