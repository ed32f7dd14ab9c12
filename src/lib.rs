//! Incident scoring and rollup engine for mine-safety dashboards.
//!
//! Every calculation here is a pure function of the incident snapshot,
//! the reference data and an explicit `today`. Malformed records degrade to
//! zero contributions instead of failing the rollup.

pub mod config;
pub mod days_lost;
pub mod error;
pub mod import;
pub mod models;
pub mod period;
pub mod report;
pub mod rollup;
pub mod scoring;

pub use days_lost::DaysLostCalculator;
pub use error::RollupError;
pub use models::{Entity, Incident, IncidentStatus, IncidentType, Period, ReferenceData};
pub use period::{percent_change, MetricDef};
pub use rollup::{build_rollup, RollupFilter, RollupOptions};
pub use scoring::{score_all, ScoringRules};
