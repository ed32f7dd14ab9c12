use std::collections::BTreeMap;
use std::path::Path;

use chrono::Weekday;
use serde::Deserialize;
use tracing::debug;

use crate::days_lost::DaysLostCalculator;
use crate::error::RollupError;
use crate::models::{IncidentType, ReferenceData, ScoringRule};
use crate::scoring::ScoringRules;

fn default_non_working_day() -> Weekday {
    Weekday::Sun
}

/// Contents of the optional TOML configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "default_non_working_day")]
    pub non_working_day: Weekday,
    #[serde(flatten)]
    pub reference: ReferenceData,
    /// Per-type overrides of the built-in scoring table, keyed by label.
    #[serde(default)]
    pub scoring: BTreeMap<String, ScoringRule>,
}

impl Default for RollupConfig {
    fn default() -> Self {
        RollupConfig {
            non_working_day: default_non_working_day(),
            reference: ReferenceData::default(),
            scoring: BTreeMap::new(),
        }
    }
}

impl RollupConfig {
    pub fn parse(contents: &str) -> Result<Self, RollupError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self, RollupError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| RollupError::io(path, source))?;
        let config = RollupConfig::parse(&contents)?;
        debug!(
            path = %path.display(),
            mines = config.reference.mines.len(),
            scoring_overrides = config.scoring.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn calculator(&self) -> DaysLostCalculator {
        DaysLostCalculator::new(self.non_working_day)
    }

    /// Built-in scoring table with this file's overrides applied.
    pub fn scoring_rules(&self) -> ScoringRules {
        self.scoring
            .iter()
            .fold(ScoringRules::default(), |rules, (label, rule)| {
                rules.with_rule(IncidentType::from(label.as_str()), *rule)
            })
    }
}
