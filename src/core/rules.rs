//! Threshold rules for tracked lab markers.
//!
//! Every tracked marker has exactly one [`MarkerRule`]. The rules live in a
//! [`RuleSet`] whose order is the rule-declaration order used for reasons and
//! report columns.

use std::fmt;

use serde::{Serialize, Deserialize};
use validator::Validate;

use crate::core::extract::LatestValue;
use crate::error::{Result, RiskError};

// Shipped thresholds
pub const HBA1C_THRESHOLD: f64 = 6.5; // %
pub const CHOLESTEROL_THRESHOLD: f64 = 240.0; // mg/dL

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "<")]
    Less,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::Greater => value > threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Less => value < threshold,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparison::GreaterOrEqual => ">=",
            Comparison::Greater => ">",
            Comparison::LessOrEqual => "<=",
            Comparison::Less => "<",
        };
        f.write_str(symbol)
    }
}

fn default_comparison() -> Comparison {
    Comparison::GreaterOrEqual
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MarkerRule {
    #[validate(length(min = 1))]
    pub marker: String, // e.g., "HbA1c"
    /// Other observation codes that denote the same marker.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[validate(length(min = 1))]
    pub condition: String, // e.g., "diabetes"
    pub threshold: f64,
    #[serde(default = "default_comparison")]
    pub comparison: Comparison,
    #[serde(default = "default_weight")]
    #[validate(range(min = 1))]
    pub weight: u32,
    #[validate(length(min = 1))]
    pub reason: String,
}

impl MarkerRule {
    pub fn hba1c() -> Self {
        Self {
            marker: "HbA1c".to_string(),
            aliases: vec!["Hemoglobin A1c".to_string(), "Glycated hemoglobin".to_string()],
            condition: "diabetes".to_string(),
            threshold: HBA1C_THRESHOLD,
            comparison: Comparison::GreaterOrEqual,
            weight: 1,
            reason: "Elevated HbA1c (≥6.5%)".to_string(),
        }
    }

    pub fn cholesterol() -> Self {
        Self {
            marker: "Cholesterol".to_string(),
            aliases: vec!["Total cholesterol".to_string()],
            condition: "cardiovascular".to_string(),
            threshold: CHOLESTEROL_THRESHOLD,
            comparison: Comparison::GreaterOrEqual,
            weight: 1,
            reason: "Elevated Cholesterol (≥240 mg/dL)".to_string(),
        }
    }

    /// Case-insensitive match of an observation code against the marker and its aliases.
    pub fn matches(&self, code: &str) -> bool {
        let code = code.trim();
        self.codes().any(|known| known.eq_ignore_ascii_case(code))
    }

    fn codes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.marker.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Ordered, validated collection of marker rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSet {
    rules: Vec<MarkerRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<MarkerRule>) -> Result<Self> {
        for (i, rule) in rules.iter().enumerate() {
            rule.validate()?;
            if !rule.threshold.is_finite() {
                return Err(RiskError::rule(&rule.marker, "threshold must be a finite number"));
            }
            // A code claimed by two rules would make extraction ambiguous.
            for earlier in &rules[..i] {
                if let Some(code) = rule.codes().find(|code| earlier.matches(code)) {
                    return Err(RiskError::rule(
                        &rule.marker,
                        format!("code {code:?} is already tracked by {}", earlier.marker),
                    ));
                }
            }
        }
        Ok(Self { rules })
    }

    /// HbA1c then Cholesterol.
    pub fn shipped() -> Self {
        Self {
            rules: vec![MarkerRule::hba1c(), MarkerRule::cholesterol()],
        }
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Index of the rule tracking `code`, if any.
    pub fn position(&self, code: &str) -> Option<usize> {
        self.rules.iter().position(|rule| rule.matches(code))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::shipped()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub marker: String,
    pub value: f64,
    pub threshold: f64,
    pub comparison: Comparison,
    pub weight: u32,
    pub triggered: bool,
    pub reason: String,
}

/// Applies `rule` to a patient's latest value for its marker.
///
/// No latest value means no flag: a missing measurement is unknown, not normal.
pub fn evaluate(latest: Option<&LatestValue>, rule: &MarkerRule) -> Option<RiskFlag> {
    let latest = latest?;
    Some(RiskFlag {
        marker: rule.marker.clone(),
        value: latest.value,
        threshold: rule.threshold,
        comparison: rule.comparison,
        weight: rule.weight,
        triggered: rule.comparison.holds(latest.value, rule.threshold),
        reason: rule.reason.clone(),
    })
}
