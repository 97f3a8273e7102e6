//! Record types shared by the parser, the scoring engine and the reports.

pub mod observation;
pub mod patient;

pub use observation::Observation;
pub use patient::{Address, Patient};

/// Layout version of the `Patient` and `Observation` records produced by
/// [`crate::fhir::parse_bundle`].
pub const SCHEMA_VERSION: u32 = 1;
