//! Bundle parsing: FHIR-shaped JSON into `Patient` and `Observation` records.
//!
//! Each resource is decoded on its own so a malformed record is reported as a
//! [`ParseIssue`] instead of failing the whole bundle. Only a document that is
//! not JSON at all (or whose resource lists are not arrays) is an error.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::{Result, RiskError};
use crate::models::{Address, Observation, Patient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Patient,
    Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// Record is not an object of the expected shape. Dropped.
    MalformedRecord,
    /// No `id`. Dropped.
    MissingId,
    /// Observation without a subject reference. Dropped.
    MissingSubject,
    /// Patient id seen before. The later record is dropped.
    DuplicatePatient,
    /// Observation without `code.text`. Kept; scoring ignores it.
    MissingCode,
    /// Observation without a quantity value. Kept; scoring ignores it.
    MissingValue,
    /// Quantity value that is not a number. Kept without a value.
    NonNumericValue,
    /// `effectiveDateTime` that could not be read. Kept without a timestamp.
    UnreadableTimestamp,
    /// `birthDate` that could not be read. Kept without a birth date.
    UnreadableBirthDate,
}

impl IssueKind {
    pub fn drops_record(self) -> bool {
        matches!(
            self,
            IssueKind::MalformedRecord
                | IssueKind::MissingId
                | IssueKind::MissingSubject
                | IssueKind::DuplicatePatient
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub resource: ResourceKind,
    pub index: usize,
    pub id: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} #{}", self.resource, self.index)?;
        if let Some(id) = &self.id {
            write!(f, " ({id})")?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBundle {
    pub patients: Vec<Patient>,
    pub observations: Vec<Observation>,
    pub issues: Vec<ParseIssue>,
}

impl ParsedBundle {
    pub fn dropped(&self) -> usize {
        self.issues.iter().filter(|issue| issue.kind.drops_record()).count()
    }
}

// ===== Wire shapes =====

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBundle {
    patients: Vec<Value>,
    observations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPatient {
    id: Option<String>,
    #[serde(default)]
    name: Vec<RawName>,
    gender: Option<String>,
    birth_date: Option<String>,
    #[serde(default)]
    address: Vec<RawAddress>,
}

#[derive(Debug, Deserialize)]
struct RawName {
    family: Option<String>,
    #[serde(default)]
    given: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAddress {
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObservation {
    id: Option<String>,
    status: Option<String>,
    code: Option<RawCode>,
    value_quantity: Option<RawQuantity>,
    effective_date_time: Option<String>,
    subject: Option<RawReference>,
}

#[derive(Debug, Deserialize)]
struct RawCode {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuantity {
    value: Option<Value>,
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReference {
    reference: Option<String>,
}

// ===== Parsing =====

pub fn load_bundle(path: impl AsRef<Path>) -> Result<ParsedBundle> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|e| RiskError::io(path, e))?;
    parse_bundle(&json)
}

#[instrument(skip_all, fields(bytes = json.len()))]
pub fn parse_bundle(json: &str) -> Result<ParsedBundle> {
    let raw: RawBundle = serde_json::from_str(json)?;
    let mut parser = Parser::default();

    for (index, value) in raw.patients.into_iter().enumerate() {
        parser.patient(index, value);
    }
    for (index, value) in raw.observations.into_iter().enumerate() {
        parser.observation(index, value);
    }

    let bundle = parser.bundle;
    for issue in &bundle.issues {
        debug!(%issue, "bundle record issue");
    }
    info!(
        patients = bundle.patients.len(),
        observations = bundle.observations.len(),
        issues = bundle.issues.len(),
        dropped = bundle.dropped(),
        "parsed bundle"
    );
    Ok(bundle)
}

#[derive(Default)]
struct Parser {
    bundle: ParsedBundle,
    seen_patients: HashSet<String>,
}

impl Parser {
    fn issue(&mut self, resource: ResourceKind, index: usize, id: Option<&str>, kind: IssueKind, message: impl Into<String>) {
        self.bundle.issues.push(ParseIssue {
            resource,
            index,
            id: id.map(str::to_string),
            kind,
            message: message.into(),
        });
    }

    fn patient(&mut self, index: usize, value: Value) {
        const KIND: ResourceKind = ResourceKind::Patient;
        let raw: RawPatient = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => return self.issue(KIND, index, None, IssueKind::MalformedRecord, e.to_string()),
        };
        let Some(id) = non_empty(raw.id) else {
            return self.issue(KIND, index, None, IssueKind::MissingId, "patient has no id");
        };
        if !self.seen_patients.insert(id.clone()) {
            return self.issue(KIND, index, Some(&id), IssueKind::DuplicatePatient, "patient id already seen");
        }

        let birth_date = match non_empty(raw.birth_date) {
            Some(text) => match NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(_) => {
                    self.issue(KIND, index, Some(&id), IssueKind::UnreadableBirthDate, format!("unreadable birthDate {text:?}"));
                    None
                }
            },
            None => None,
        };

        let (family_name, given) = raw
            .name
            .into_iter()
            .next()
            .map(|name| (name.family.unwrap_or_default(), name.given))
            .unwrap_or_default();
        let full_name = given
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(family_name.as_str()))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let address = raw
            .address
            .into_iter()
            .next()
            .map(|a| Address {
                city: a.city.unwrap_or_default(),
                state: a.state.unwrap_or_default(),
                postal_code: a.postal_code.unwrap_or_default(),
            })
            .unwrap_or_default();

        self.bundle.patients.push(Patient {
            id,
            full_name,
            given_name: given.into_iter().next().unwrap_or_default(),
            family_name,
            gender: raw.gender.unwrap_or_default(),
            birth_date,
            address,
        });
    }

    fn observation(&mut self, index: usize, value: Value) {
        const KIND: ResourceKind = ResourceKind::Observation;
        let raw: RawObservation = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => return self.issue(KIND, index, None, IssueKind::MalformedRecord, e.to_string()),
        };
        let Some(id) = non_empty(raw.id) else {
            return self.issue(KIND, index, None, IssueKind::MissingId, "observation has no id");
        };
        let Some(patient_id) = raw
            .subject
            .and_then(|s| s.reference)
            .as_deref()
            .and_then(patient_id_from_reference)
        else {
            return self.issue(KIND, index, Some(&id), IssueKind::MissingSubject, "observation has no subject reference");
        };

        let code = raw.code.and_then(|c| c.text).unwrap_or_default();
        if code.trim().is_empty() {
            self.issue(KIND, index, Some(&id), IssueKind::MissingCode, "observation has no code text");
        }

        let (quantity, unit) = match raw.value_quantity {
            Some(q) => (q.value, q.unit.unwrap_or_default()),
            None => (None, String::new()),
        };
        let value = match quantity {
            None | Some(Value::Null) => {
                self.issue(KIND, index, Some(&id), IssueKind::MissingValue, "observation has no quantity value");
                None
            }
            Some(v) => {
                let number = match &v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
                    _ => None,
                };
                if number.is_none() {
                    self.issue(KIND, index, Some(&id), IssueKind::NonNumericValue, format!("non-numeric value {v}"));
                }
                number
            }
        };

        let effective = match non_empty(raw.effective_date_time) {
            Some(text) => {
                let parsed = parse_effective(&text);
                if parsed.is_none() {
                    self.issue(KIND, index, Some(&id), IssueKind::UnreadableTimestamp, format!("unreadable effectiveDateTime {text:?}"));
                }
                parsed
            }
            None => None,
        };

        self.bundle.observations.push(Observation {
            id,
            patient_id,
            code,
            value,
            unit,
            effective,
            status: raw.status.unwrap_or_default(),
        });
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

/// `"Patient/patient-1"` → `"patient-1"`.
pub fn patient_id_from_reference(reference: &str) -> Option<String> {
    reference
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Reads an effective timestamp: RFC 3339, a naive date-time (taken as UTC),
/// a bare date (midnight UTC) or a partial date. `"2024"` and `"2024-05"` map
/// to the first instant of that year or month.
pub fn parse_effective(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    parse_date(text)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let padded = match text.len() {
        4 => format!("{text}-01-01"),
        7 => format!("{text}-01"),
        10 => text.to_string(),
        _ => return None,
    };
    if !padded.bytes().enumerate().all(|(i, b)| if i == 4 || i == 7 { b == b'-' } else { b.is_ascii_digit() }) {
        return None;
    }
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{extract_latest, MarkerRule};

    const BUNDLE: &str = r#"{
        "patients": [
            {
                "id": "patient-1",
                "name": [{ "family": "Smith", "given": ["John", "Q"] }],
                "gender": "male",
                "birthDate": "1970-04-12",
                "address": [{ "city": "Boston", "state": "MA", "postalCode": "02118" }]
            },
            { "name": [{ "family": "Nobody" }] },
            { "id": "patient-1" },
            "not an object",
            { "id": "patient-2", "birthDate": "12/04/1970" }
        ],
        "observations": [
            {
                "id": "obs-1", "status": "final",
                "code": { "text": "Hemoglobin A1c" },
                "valueQuantity": { "value": 7.1, "unit": "%" },
                "effectiveDateTime": "2023-05-01T10:00:00Z",
                "subject": { "reference": "Patient/patient-1" }
            },
            {
                "id": "obs-2",
                "code": { "text": "Cholesterol" },
                "valueQuantity": { "value": "high", "unit": "mg/dL" },
                "effectiveDateTime": "sometime in May",
                "subject": { "reference": "Patient/patient-1" }
            },
            { "id": "obs-3", "code": { "text": "Cholesterol" } },
            {
                "id": "obs-4",
                "code": { "text": "Cholesterol" },
                "valueQuantity": { "value": "245.5" },
                "effectiveDateTime": "2023-05-02",
                "subject": { "reference": "Patient/patient-2" }
            }
        ],
        "medications": [{ "id": "med-1" }]
    }"#;

    #[test]
    fn parses_patients_and_reports_bad_ones() {
        let bundle = parse_bundle(BUNDLE).unwrap();
        let ids: Vec<_> = bundle.patients.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["patient-1", "patient-2"]);

        let smith = &bundle.patients[0];
        assert_eq!(smith.full_name, "John Q Smith");
        assert_eq!(smith.given_name, "John");
        assert_eq!(smith.family_name, "Smith");
        assert_eq!(smith.birth_date, NaiveDate::from_ymd_opt(1970, 4, 12));
        assert_eq!(smith.address.postal_code, "02118");

        let kinds: Vec<_> = bundle
            .issues
            .iter()
            .filter(|i| i.resource == ResourceKind::Patient)
            .map(|i| i.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::MissingId,
                IssueKind::DuplicatePatient,
                IssueKind::MalformedRecord,
                IssueKind::UnreadableBirthDate,
            ]
        );
    }

    #[test]
    fn parses_observations_and_keeps_unscorable_ones() {
        let bundle = parse_bundle(BUNDLE).unwrap();
        let ids: Vec<_> = bundle.observations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["obs-1", "obs-2", "obs-4"]);

        let first = &bundle.observations[0];
        assert_eq!(first.patient_id, "patient-1");
        assert_eq!(first.value, Some(7.1));
        assert_eq!(first.unit, "%");
        assert_eq!(first.effective, parse_effective("2023-05-01T10:00:00+00:00"));

        let second = &bundle.observations[1];
        assert_eq!(second.value, None);
        assert_eq!(second.effective, None);

        assert_eq!(bundle.observations[2].value, Some(245.5));

        let kinds: Vec<_> = bundle
            .issues
            .iter()
            .filter(|i| i.resource == ResourceKind::Observation)
            .map(|i| i.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::NonNumericValue,
                IssueKind::UnreadableTimestamp,
                IssueKind::MissingSubject,
            ]
        );
        assert_eq!(bundle.dropped(), 4);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(parse_bundle("{ not json"), Err(RiskError::Json(_))));
    }

    #[test]
    fn empty_document_is_an_empty_bundle() {
        let bundle = parse_bundle("{}").unwrap();
        assert!(bundle.patients.is_empty());
        assert!(bundle.observations.is_empty());
        assert!(bundle.issues.is_empty());
    }

    #[test]
    fn effective_timestamp_formats() {
        let midnight = Utc.with_ymd_and_hms(2023, 5, 2, 0, 0, 0).single();
        assert_eq!(parse_effective("2023-05-02"), midnight);
        assert_eq!(parse_effective("2023-05-02T00:00:00"), midnight);
        assert_eq!(parse_effective("2023-05-02 00:00:00"), midnight);
        assert_eq!(parse_effective("2023-05-02T02:00:00+02:00"), midnight);
        assert_eq!(parse_effective("May 2nd"), None);
    }

    #[test]
    fn partial_dates_start_their_period() {
        assert_eq!(parse_effective("2024-05"), Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single());
        assert_eq!(parse_effective("2024"), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single());
        assert_eq!(parse_effective("2024-13"), None);
        assert_eq!(parse_effective("2024-5"), None);
        assert_eq!(parse_effective("24-05"), None);
    }

    #[test]
    fn month_precision_reading_beats_older_full_date() {
        let bundle = parse_bundle(
            r#"{
                "patients": [{ "id": "p1" }],
                "observations": [
                    {
                        "id": "old", "code": { "text": "HbA1c" },
                        "valueQuantity": { "value": 5.0 },
                        "effectiveDateTime": "2019-01-01",
                        "subject": { "reference": "Patient/p1" }
                    },
                    {
                        "id": "recent", "code": { "text": "HbA1c" },
                        "valueQuantity": { "value": 8.0 },
                        "effectiveDateTime": "2024-05",
                        "subject": { "reference": "Patient/p1" }
                    }
                ]
            }"#,
        )
        .unwrap();
        assert!(bundle.issues.is_empty());

        let latest = extract_latest(&bundle.observations, &MarkerRule::hba1c());
        assert_eq!(latest["p1"].observation_id, "recent");
        assert_eq!(latest["p1"].value, 8.0);
    }

    #[test]
    fn non_finite_strings_are_non_numeric() {
        let bundle = parse_bundle(
            r#"{
                "observations": [
                    { "id": "a", "code": { "text": "HbA1c" }, "valueQuantity": { "value": "NaN" }, "subject": { "reference": "Patient/p1" } },
                    { "id": "b", "code": { "text": "HbA1c" }, "valueQuantity": { "value": "inf" }, "subject": { "reference": "Patient/p1" } }
                ]
            }"#,
        )
        .unwrap();
        assert!(bundle.observations.iter().all(|o| o.value.is_none()));
        let kinds: Vec<_> = bundle.issues.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::NonNumericValue, IssueKind::NonNumericValue]);
    }

    #[test]
    fn reference_to_patient_id() {
        assert_eq!(patient_id_from_reference("Patient/patient-7"), Some("patient-7".to_string()));
        assert_eq!(patient_id_from_reference("patient-7"), Some("patient-7".to_string()));
        assert_eq!(patient_id_from_reference("Patient/"), None);
    }

    #[test]
    fn missing_bundle_file_reports_path() {
        let err = load_bundle("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
