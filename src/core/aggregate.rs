//! Combines a patient's flags into a score, a category and reasons.

use std::fmt;

use serde::{Serialize, Deserialize};

use crate::core::rules::RiskFlag;
use crate::error::{Result, RiskError};

/// Lowest score classified as "Moderate Risk".
pub const MODERATE_RISK_MIN_SCORE: u32 = 1;
/// Lowest score classified as "High Risk".
pub const HIGH_RISK_MIN_SCORE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    #[serde(rename = "No Risk")]
    NoRisk,
    #[serde(rename = "Moderate Risk")]
    ModerateRisk,
    #[serde(rename = "High Risk")]
    HighRisk,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 3] = [
        RiskCategory::NoRisk,
        RiskCategory::ModerateRisk,
        RiskCategory::HighRisk,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RiskCategory::NoRisk => "No Risk",
            RiskCategory::ModerateRisk => "Moderate Risk",
            RiskCategory::HighRisk => "High Risk",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Score boundaries between categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBounds {
    #[serde(default = "default_moderate")]
    pub moderate_min_score: u32,
    #[serde(default = "default_high")]
    pub high_min_score: u32,
}

fn default_moderate() -> u32 {
    MODERATE_RISK_MIN_SCORE
}

fn default_high() -> u32 {
    HIGH_RISK_MIN_SCORE
}

impl Default for CategoryBounds {
    fn default() -> Self {
        Self {
            moderate_min_score: MODERATE_RISK_MIN_SCORE,
            high_min_score: HIGH_RISK_MIN_SCORE,
        }
    }
}

impl CategoryBounds {
    pub fn new(moderate_min_score: u32, high_min_score: u32) -> Result<Self> {
        let bounds = Self {
            moderate_min_score,
            high_min_score,
        };
        bounds.check()?;
        Ok(bounds)
    }

    /// Score 0 must stay "No Risk" and the bands must not overlap.
    pub fn check(&self) -> Result<()> {
        if self.moderate_min_score == 0 || self.moderate_min_score >= self.high_min_score {
            return Err(RiskError::InvalidBounds {
                moderate: self.moderate_min_score,
                high: self.high_min_score,
            });
        }
        Ok(())
    }

    pub fn categorize(&self, score: u32) -> RiskCategory {
        if score >= self.high_min_score {
            RiskCategory::HighRisk
        } else if score >= self.moderate_min_score {
            RiskCategory::ModerateRisk
        } else {
            RiskCategory::NoRisk
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub category: RiskCategory,
    pub reasons: Vec<String>,
}

/// Aggregates flags given in rule-declaration order.
///
/// An empty slice (no tracked data at all) yields score 0 and "No Risk".
/// The score saturates at `u32::MAX`.
pub fn aggregate(flags: &[RiskFlag], bounds: &CategoryBounds) -> RiskAssessment {
    let triggered = flags.iter().filter(|flag| flag.triggered);
    let score = triggered.clone().fold(0u32, |score, flag| score.saturating_add(flag.weight));
    let reasons = triggered.map(|flag| flag.reason.clone()).collect();
    RiskAssessment {
        score,
        category: bounds.categorize(score),
        reasons,
    }
}
