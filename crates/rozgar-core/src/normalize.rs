use serde_json::Value;
use thiserror::Error;

use crate::{NewStatRecord, RawRecord, StatMetrics, DEFAULT_REMARKS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("raw record is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Coerce a raw field into a finite number.
///
/// Absent, null, blank, non-numeric and non-finite values all become `0.0`.
pub fn to_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn required(raw: &RawRecord, field: &'static str) -> Result<String, NormalizeError> {
    raw.text(field).ok_or(NormalizeError::MissingField(field))
}

/// Convert one statistics-source record into the typed, persistable shape.
pub fn normalize_record(raw: &RawRecord) -> Result<NewStatRecord, NormalizeError> {
    Ok(NewStatRecord {
        region_code: required(raw, "district_code")?,
        region_name: required(raw, "district_name")?,
        state_code: required(raw, "state_code")?,
        state_name: required(raw, "state_name")?,
        fiscal_year: required(raw, "fin_year")?,
        month: required(raw, "month")?,
        metrics: StatMetrics::from_raw(raw),
        remarks: raw
            .text("Remarks")
            .unwrap_or_else(|| DEFAULT_REMARKS.to_string()),
    })
}
