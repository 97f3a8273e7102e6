//! Latest-value extraction.
//!
//! For each patient and tracked marker the observation history is reduced to
//! one value: the one with the greatest effective timestamp. An observation
//! without a timestamp sorts below every timestamped one. Among observations
//! sharing the greatest timestamp (or all lacking one) the first in input row
//! order wins, so the result never depends on anything but the input.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::{debug, instrument};

use crate::core::rules::{MarkerRule, RuleSet};
use crate::models::Observation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestValue {
    pub observation_id: String,
    pub value: f64,
    pub unit: String,
    pub effective: Option<DateTime<Utc>>,
}

impl LatestValue {
    fn from_observation(obs: &Observation, value: f64) -> Self {
        Self {
            observation_id: obs.id.clone(),
            value,
            unit: obs.unit.clone(),
            effective: obs.effective,
        }
    }
}

/// Rows ignored during extraction, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub unrecognized_code: usize,
    pub missing_value: usize,
    pub missing_patient: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.unrecognized_code + self.missing_value + self.missing_patient
    }
}

/// Latest value per patient for a single marker, keyed by patient id.
pub fn extract_latest(observations: &[Observation], rule: &MarkerRule) -> BTreeMap<String, LatestValue> {
    let mut latest = BTreeMap::new();
    for obs in observations.iter().filter(|obs| rule.matches(&obs.code)) {
        if obs.patient_id.is_empty() {
            continue;
        }
        if let Some(value) = obs.numeric_value() {
            offer(&mut latest, obs, value);
        }
    }
    latest
}

// Replaces the current candidate only when strictly newer; `None < Some(_)`.
fn offer(latest: &mut BTreeMap<String, LatestValue>, obs: &Observation, value: f64) {
    match latest.entry(obs.patient_id.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(LatestValue::from_observation(obs, value));
        }
        Entry::Occupied(mut slot) => {
            if obs.effective > slot.get().effective {
                slot.insert(LatestValue::from_observation(obs, value));
            }
        }
    }
}

/// Latest values for every marker of a rule set, computed in one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    by_marker: Vec<BTreeMap<String, LatestValue>>,
    pub skipped: SkipCounts,
}

impl Extraction {
    /// Latest value for the rule at `rule_index` and `patient_id`.
    pub fn get(&self, rule_index: usize, patient_id: &str) -> Option<&LatestValue> {
        self.by_marker.get(rule_index)?.get(patient_id)
    }
}

#[instrument(skip_all, fields(observations = observations.len(), markers = rules.len()))]
pub fn extract_all(observations: &[Observation], rules: &RuleSet) -> Extraction {
    let mut extraction = Extraction {
        by_marker: vec![BTreeMap::new(); rules.len()],
        skipped: SkipCounts::default(),
    };

    for obs in observations {
        let Some(index) = rules.position(&obs.code) else {
            extraction.skipped.unrecognized_code += 1;
            continue;
        };
        if obs.patient_id.is_empty() {
            extraction.skipped.missing_patient += 1;
            continue;
        }
        let Some(value) = obs.numeric_value() else {
            extraction.skipped.missing_value += 1;
            continue;
        };
        offer(&mut extraction.by_marker[index], obs, value);
    }

    debug!(
        skipped = extraction.skipped.total(),
        unrecognized_code = extraction.skipped.unrecognized_code,
        missing_value = extraction.skipped.missing_value,
        missing_patient = extraction.skipped.missing_patient,
        "extracted latest marker values"
    );
    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).single()
    }

    fn hba1c(id: &str, patient: &str, value: f64, effective: Option<DateTime<Utc>>) -> Observation {
        Observation::new(id, patient, "Hemoglobin A1c", value, effective).with_unit("%")
    }

    #[test]
    fn picks_greatest_timestamp_regardless_of_row_order() {
        let observations = vec![
            hba1c("o1", "p1", 6.0, day(1)),
            hba1c("o2", "p1", 7.0, day(3)),
            hba1c("o3", "p1", 6.8, day(2)),
        ];
        let latest = extract_latest(&observations, &MarkerRule::hba1c());
        assert_eq!(latest["p1"].value, 7.0);
        assert_eq!(latest["p1"].effective, day(3));
        assert_eq!(latest["p1"].observation_id, "o2");
    }

    #[test]
    fn equal_timestamps_keep_first_row() {
        let observations = vec![
            hba1c("first", "p4", 6.0, day(5)),
            hba1c("second", "p4", 7.0, day(5)),
        ];
        for _ in 0..3 {
            let latest = extract_latest(&observations, &MarkerRule::hba1c());
            assert_eq!(latest["p4"].observation_id, "first");
            assert_eq!(latest["p4"].value, 6.0);
        }
    }

    #[test]
    fn missing_timestamp_never_beats_a_timestamp() {
        let observations = vec![
            hba1c("dated", "p1", 5.0, day(1)),
            hba1c("undated", "p1", 9.0, None),
        ];
        let latest = extract_latest(&observations, &MarkerRule::hba1c());
        assert_eq!(latest["p1"].observation_id, "dated");

        let reversed: Vec<_> = observations.into_iter().rev().collect();
        let latest = extract_latest(&reversed, &MarkerRule::hba1c());
        assert_eq!(latest["p1"].observation_id, "dated");
    }

    #[test]
    fn undated_observation_used_when_alone() {
        let observations = vec![hba1c("undated", "p1", 9.0, None)];
        let latest = extract_latest(&observations, &MarkerRule::hba1c());
        assert_eq!(latest["p1"].value, 9.0);
        assert_eq!(latest["p1"].effective, None);
    }

    #[test]
    fn absent_patient_has_no_entry() {
        let observations = vec![Observation::new("o1", "p1", "Cholesterol", 180.0, day(1))];
        let latest = extract_latest(&observations, &MarkerRule::hba1c());
        assert!(latest.is_empty());
    }

    #[test]
    fn extract_all_counts_skipped_rows() {
        let mut no_value = hba1c("o3", "p1", 0.0, day(4));
        no_value.value = None;
        let observations = vec![
            hba1c("o1", "p1", 6.1, day(1)),
            Observation::new("o2", "p1", "Blood pressure", 120.0, day(1)),
            no_value,
            hba1c("o4", "", 8.0, day(1)),
            hba1c("o5", "p2", f64::NAN, day(1)),
            Observation::new("o6", "p2", "cholesterol", 250.0, None),
        ];
        let extraction = extract_all(&observations, &RuleSet::shipped());

        assert_eq!(
            extraction.skipped,
            SkipCounts {
                unrecognized_code: 1,
                missing_value: 2,
                missing_patient: 1,
            }
        );
        assert_eq!(extraction.get(0, "p1").map(|v| v.value), Some(6.1));
        assert_eq!(extraction.get(0, "p2"), None);
        assert_eq!(extraction.get(1, "p2").map(|v| v.value), Some(250.0));
    }

    #[test]
    fn skipped_nonnumeric_value_does_not_hide_older_numeric_one() {
        let mut newer = hba1c("new", "p1", 0.0, day(9));
        newer.value = None;
        let observations = vec![hba1c("old", "p1", 6.9, day(1)), newer];
        let extraction = extract_all(&observations, &RuleSet::shipped());
        assert_eq!(extraction.get(0, "p1").map(|v| v.observation_id.as_str()), Some("old"));
    }
}
