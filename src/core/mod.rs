//! Risk-scoring core: extraction, rule evaluation and aggregation.
//!
//! Every function here is pure over in-memory tables.

pub mod aggregate;
pub mod engine;
pub mod extract;
pub mod rules;

pub use aggregate::{aggregate, CategoryBounds, RiskAssessment, RiskCategory, HIGH_RISK_MIN_SCORE, MODERATE_RISK_MIN_SCORE};
pub use engine::{MarkerResult, RiskEngine, RiskRow, RiskTable};
pub use extract::{extract_all, extract_latest, Extraction, LatestValue, SkipCounts};
pub use rules::{evaluate, Comparison, MarkerRule, RiskFlag, RuleSet};
