use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A single lab result for one patient.
///
/// `value` is `None` when the upstream record had no numeric quantity and
/// `effective` is `None` when the timestamp was missing or could not be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub patient_id: String,
    pub code: String, // e.g., "Hemoglobin A1c", "Cholesterol"
    pub value: Option<f64>,
    pub unit: String,
    pub effective: Option<DateTime<Utc>>,
    pub status: String, // e.g., "final", "preliminary"
}

impl Observation {
    pub fn new(
        id: impl Into<String>,
        patient_id: impl Into<String>,
        code: impl Into<String>,
        value: f64,
        effective: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            patient_id: patient_id.into(),
            code: code.into(),
            value: Some(value),
            unit: String::new(),
            effective,
            status: "final".to_string(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// The numeric value, if present and finite.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite())
    }
}
