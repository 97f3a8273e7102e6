//! Summary statistics and JSON reports over a scored risk table.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Serialize, Deserialize};
use tracing::{info, instrument};

use crate::core::{RiskCategory, RiskRow, RiskTable, RuleSet};
use crate::error::{Result, RiskError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSummary {
    pub condition: String, // e.g., "diabetes"
    pub marker: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_patients: usize,
    pub conditions: Vec<ConditionSummary>,
    pub risk_category_counts: BTreeMap<RiskCategory, usize>,
    /// Patients with no data for any tracked marker; counted under "No Risk" too.
    pub no_data_patients: usize,
}

impl RiskSummary {
    pub fn from_table(table: &RiskTable, rules: &RuleSet) -> Self {
        let total_patients = table.len();

        let conditions = rules
            .rules()
            .iter()
            .map(|rule| {
                let count = table
                    .rows
                    .iter()
                    .filter(|row| row.marker(&rule.marker).and_then(|m| m.triggered) == Some(true))
                    .count();
                ConditionSummary {
                    condition: rule.condition.clone(),
                    marker: rule.marker.clone(),
                    count,
                    percentage: percentage(count, total_patients),
                }
            })
            .collect();

        let mut risk_category_counts: BTreeMap<RiskCategory, usize> =
            RiskCategory::ALL.iter().map(|&category| (category, 0)).collect();
        for row in &table.rows {
            *risk_category_counts.entry(row.category()).or_default() += 1;
        }

        Self {
            total_patients,
            conditions,
            risk_category_counts,
            no_data_patients: table.rows.iter().filter(|row| row.has_no_marker_data()).count(),
        }
    }

    pub fn category_count(&self, category: RiskCategory) -> usize {
        self.risk_category_counts.get(&category).copied().unwrap_or(0)
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Patients with at least one triggered rule, highest score first.
/// Equal scores keep table order.
pub fn high_risk(table: &RiskTable) -> Vec<&RiskRow> {
    let mut rows: Vec<&RiskRow> = table.rows.iter().filter(|row| row.score() > 0).collect();
    rows.sort_by(|a, b| b.score().cmp(&a.score()));
    rows
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonReport<'a> {
    pub report_date: NaiveDate,
    pub summary: RiskSummary,
    pub high_risk_patients: Vec<&'a RiskRow>,
    /// Every patient in table order; only present in the full report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_patients: Option<Vec<&'a RiskRow>>,
}

impl<'a> JsonReport<'a> {
    pub fn new(table: &'a RiskTable, rules: &RuleSet, report_date: NaiveDate) -> Self {
        Self {
            report_date,
            summary: RiskSummary::from_table(table, rules),
            high_risk_patients: high_risk(table),
            all_patients: None,
        }
    }

    /// Same report with an `all_patients` list next to the flagged ones.
    pub fn with_all_patients(table: &'a RiskTable, rules: &RuleSet, report_date: NaiveDate) -> Self {
        Self {
            all_patients: Some(table.rows.iter().collect()),
            ..Self::new(table, rules, report_date)
        }
    }
}

const CSV_COLUMNS: [&str; 7] = [
    "patient_id",
    "full_name",
    "gender",
    "age",
    "risk_category",
    "risk_score",
    "risk_reasons",
];

/// Writes rows as CSV: demographics, category, score, `"; "`-joined reasons,
/// then one `<marker>_value` column per rule (e.g. `hba1c_value`).
/// Missing values are empty cells.
#[instrument(skip_all, fields(path = %path.display(), rows = rows.len()))]
pub fn write_csv(path: &Path, rows: &[&RiskRow], rules: &RuleSet) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| RiskError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| RiskError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    let header = CSV_COLUMNS
        .iter()
        .map(|column| column.to_string())
        .chain(rules.rules().iter().map(|rule| format!("{}_value", rule.marker.to_lowercase())));
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(csv_record(row, rules))?;
    }
    writer.flush().map_err(|e| RiskError::io(path, e))?;
    info!("wrote report");
    Ok(())
}

fn csv_record(row: &RiskRow, rules: &RuleSet) -> Vec<String> {
    let mut record = vec![
        row.patient_id.clone(),
        row.full_name.clone(),
        row.gender.clone(),
        row.age.map(|age| age.to_string()).unwrap_or_default(),
        row.category().to_string(),
        row.score().to_string(),
        row.reasons_joined(),
    ];
    record.extend(rules.rules().iter().map(|rule| {
        row.marker(&rule.marker)
            .and_then(|m| m.value)
            .map(|value| value.to_string())
            .unwrap_or_default()
    }));
    record
}

/// Writes `value` as pretty JSON, creating parent directories as needed.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| RiskError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| RiskError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|e| RiskError::io(path, e))?;
    info!("wrote report");
    Ok(())
}
