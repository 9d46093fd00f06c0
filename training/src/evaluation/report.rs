//! Patient prediction report (CSV).

use std::path::Path;

use lungfusion_core::{write_atomic, LungFusionError, PredictionRecord, Result};

pub const REPORT_HEADER: [&str; 2] = ["patient_id", "covid_status"];

/// Render the report: header, then one row per record in the given order.
pub fn render_report(records: &[PredictionRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REPORT_HEADER).map_err(report_error)?;
    for record in records {
        writer
            .write_record([record.patient_id.as_str(), record.status.label()])
            .map_err(report_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| LungFusionError::Report(format!("Failed to flush report: {e}")))
}

/// Write the report to `path`, creating parent directories as needed.
pub fn write_report(path: &Path, records: &[PredictionRecord]) -> Result<()> {
    let bytes = render_report(records)?;
    write_atomic(path, &bytes).map_err(|e| {
        LungFusionError::Report(format!("Failed to write {}: {e}", path.display()))
    })?;
    tracing::info!(path = %path.display(), patients = records.len(), "Prediction report written");
    Ok(())
}

fn report_error(e: csv::Error) -> LungFusionError {
    LungFusionError::Report(format!("Failed to encode report row: {e}"))
}
