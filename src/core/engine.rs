//! Risk engine: observation table in, risk table out.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Deserialize};
use tracing::{info, instrument, warn};

use crate::core::aggregate::{aggregate, CategoryBounds, RiskAssessment, RiskCategory};
use crate::core::extract::{extract_all, Extraction, SkipCounts};
use crate::core::rules::{evaluate, RuleSet};
use crate::error::Result;
use crate::models::{Observation, Patient};

/// One tracked marker's outcome for a patient. All fields are `None` when the
/// patient has no usable observation for the marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerResult {
    pub marker: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub effective: Option<DateTime<Utc>>,
    pub triggered: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRow {
    pub patient_id: String,
    pub full_name: String,
    pub gender: String,
    pub age: Option<u32>,
    pub markers: Vec<MarkerResult>, // rule-declaration order
    #[serde(flatten)]
    pub assessment: RiskAssessment,
}

impl RiskRow {
    pub fn score(&self) -> u32 {
        self.assessment.score
    }

    pub fn category(&self) -> RiskCategory {
        self.assessment.category
    }

    pub fn marker(&self, marker: &str) -> Option<&MarkerResult> {
        self.markers.iter().find(|m| m.marker.eq_ignore_ascii_case(marker))
    }

    /// Reasons flattened for tabular output, e.g. `"Elevated HbA1c (≥6.5%); Elevated Cholesterol (≥240 mg/dL)"`.
    pub fn reasons_joined(&self) -> String {
        self.assessment.reasons.join("; ")
    }

    /// True when no tracked marker had any data for this patient.
    pub fn has_no_marker_data(&self) -> bool {
        self.markers.iter().all(|m| m.value.is_none())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskTable {
    pub rows: Vec<RiskRow>,
    pub skipped: SkipCounts,
    /// Usable observations whose patient is not in the patient table.
    pub orphaned_observations: usize,
}

impl RiskTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, patient_id: &str) -> Option<&RiskRow> {
        self.rows.iter().find(|row| row.patient_id == patient_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    rules: RuleSet,
    bounds: CategoryBounds,
}

impl RiskEngine {
    pub fn new(rules: RuleSet, bounds: CategoryBounds) -> Result<Self> {
        bounds.check()?;
        Ok(Self { rules, bounds })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn bounds(&self) -> &CategoryBounds {
        &self.bounds
    }

    /// Scores every patient of the patient table, in table order.
    ///
    /// `as_of` is the date ages are computed on; it has no effect on scoring.
    #[instrument(skip_all, fields(patients = patients.len(), observations = observations.len()))]
    pub fn score(&self, patients: &[Patient], observations: &[Observation], as_of: NaiveDate) -> RiskTable {
        let extraction = extract_all(observations, &self.rules);

        let known: HashSet<&str> = patients.iter().map(|p| p.id.as_str()).collect();
        let orphaned_observations = observations
            .iter()
            .filter(|obs| !obs.patient_id.is_empty() && !known.contains(obs.patient_id.as_str()))
            .filter(|obs| self.rules.position(&obs.code).is_some() && obs.numeric_value().is_some())
            .count();
        if orphaned_observations > 0 {
            warn!(orphaned_observations, "observations reference patients missing from the patient table");
        }

        #[cfg(feature = "parallel")]
        let rows: Vec<RiskRow> = {
            use rayon::prelude::*;
            patients
                .par_iter()
                .map(|patient| self.row(patient, &extraction, as_of))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<RiskRow> = patients
            .iter()
            .map(|patient| self.row(patient, &extraction, as_of))
            .collect();

        let at_risk = rows.iter().filter(|row| row.score() > 0).count();
        info!(
            patients = rows.len(),
            at_risk,
            skipped = extraction.skipped.total(),
            "scored patients"
        );

        RiskTable {
            rows,
            skipped: extraction.skipped,
            orphaned_observations,
        }
    }

    /// Flags and assessment for one patient from an existing extraction.
    pub fn assess(&self, extraction: &Extraction, patient_id: &str) -> (Vec<MarkerResult>, RiskAssessment) {
        let mut markers = Vec::with_capacity(self.rules.len());
        let mut flags = Vec::with_capacity(self.rules.len());

        for (index, rule) in self.rules.rules().iter().enumerate() {
            let latest = extraction.get(index, patient_id);
            let flag = evaluate(latest, rule);
            markers.push(MarkerResult {
                marker: rule.marker.clone(),
                value: latest.map(|l| l.value),
                unit: latest.map(|l| l.unit.clone()),
                effective: latest.and_then(|l| l.effective),
                triggered: flag.as_ref().map(|f| f.triggered),
            });
            flags.extend(flag);
        }

        (markers, aggregate(&flags, &self.bounds))
    }

    fn row(&self, patient: &Patient, extraction: &Extraction, as_of: NaiveDate) -> RiskRow {
        let (markers, assessment) = self.assess(extraction, &patient.id);
        RiskRow {
            patient_id: patient.id.clone(),
            full_name: patient.full_name.clone(),
            gender: patient.gender.clone(),
            age: patient.age_on(as_of),
            markers,
            assessment,
        }
    }
}
