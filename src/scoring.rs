use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::debug;

use crate::models::{
    Breakdown, Entity, EntityScore, Incident, IncidentStatus, IncidentType, Period, ScoringRule,
};

pub const INCIDENT_FREE_DAYS: &str = "Incident-Free Days";
pub const CLOSURE_BONUSES: &str = "Closure Bonuses";
pub const CLOSURE_PENALTIES: &str = "Closure Penalties";

/// Points awarded per incident-free day.
const POINTS_PER_FREE_DAY: i64 = 2;

/// Scoring rule table keyed by incident type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringRules {
    rules: BTreeMap<IncidentType, ScoringRule>,
}

impl Default for ScoringRules {
    fn default() -> Self {
        let rules = [
            (IncidentType::NearMiss, ScoringRule::new(5, 7, 2, -2)),
            (IncidentType::HighPotentialIncident, ScoringRule::new(-5, 14, 5, -5)),
            (IncidentType::FirstAidInjury, ScoringRule::new(-5, 7, 3, -3)),
            (IncidentType::MedicalTreatmentInjury, ScoringRule::new(-10, 14, 5, -5)),
            (IncidentType::LostTimeInjury, ScoringRule::new(-15, 21, 10, -10)),
            (IncidentType::SeriousBodilyInjury, ScoringRule::new(-20, 30, 15, -15)),
            (IncidentType::FatalInjury, ScoringRule::new(-50, 60, 20, -25)),
        ];
        ScoringRules {
            rules: rules.into_iter().collect(),
        }
    }
}

impl ScoringRules {
    pub fn with_rule(mut self, incident_type: IncidentType, rule: ScoringRule) -> Self {
        self.rules.insert(incident_type, rule);
        self
    }

    pub fn rule_for(&self, incident_type: &IncidentType) -> Option<&ScoringRule> {
        self.rules.get(incident_type)
    }
}

/// Scores every entity over `period` and ranks them by normalised score,
/// highest first. Equal scores keep the order of `entities`.
pub fn score_all(
    incidents: &[Incident],
    entities: &[Entity],
    period: &Period,
    rules: &ScoringRules,
) -> Vec<EntityScore> {
    let in_period: Vec<(&Incident, NaiveDate)> = incidents
        .iter()
        .filter_map(|incident| {
            let occurred_on = incident.occurred_on()?;
            period
                .contains(occurred_on)
                .then_some((incident, occurred_on))
        })
        .collect();

    let mut scores: Vec<EntityScore> = entities
        .iter()
        .filter(|entity| {
            let named = !entity.name.trim().is_empty();
            if !named {
                debug!("skipping unnamed entity");
            }
            named
        })
        .map(|entity| score_entity(entity, &in_period, period, rules))
        .collect();

    let max_raw = scores
        .iter()
        .map(|score| score.raw_score)
        .max()
        .unwrap_or(0)
        .max(1);
    for score in scores.iter_mut() {
        score.normalized_score = score.raw_score as f64 / max_raw as f64 * 100.0;
    }

    scores.sort_by(|a, b| {
        b.normalized_score
            .partial_cmp(&a.normalized_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scores
}

/// Monthly leaderboard, the reference scoring window.
pub fn score_month(
    incidents: &[Incident],
    entities: &[Entity],
    year: i32,
    month: u32,
    rules: &ScoringRules,
) -> Vec<EntityScore> {
    match Period::month(year, month) {
        Some(period) => score_all(incidents, entities, &period, rules),
        None => Vec::new(),
    }
}

fn score_entity(
    entity: &Entity,
    in_period: &[(&Incident, NaiveDate)],
    period: &Period,
    rules: &ScoringRules,
) -> EntityScore {
    let name = entity.name.trim();
    let own: Vec<&(&Incident, NaiveDate)> = in_period
        .iter()
        .filter(|(incident, _)| incident.mine.trim() == name)
        .collect();

    let distinct_dates: BTreeSet<NaiveDate> = own.iter().map(|(_, date)| *date).collect();
    let incident_free_days = (period.days() - distinct_dates.len() as i64).max(0);

    let mut breakdown = Breakdown::default();
    breakdown.add(INCIDENT_FREE_DAYS, incident_free_days * POINTS_PER_FREE_DAY);

    for (incident, occurred_on) in own.iter() {
        let Some(rule) = rules.rule_for(&incident.incident_type) else {
            debug!(incident = %incident.id, incident_type = %incident.incident_type, "no scoring rule");
            continue;
        };
        breakdown.add(incident.incident_type.label(), rule.base_points);

        if incident.status != IncidentStatus::Closed {
            continue;
        }
        let Some(closed_on) = incident.closure_date() else {
            continue;
        };
        let closure_days = (closed_on - *occurred_on).num_days();
        if closure_days < 0 {
            debug!(incident = %incident.id, "closure precedes occurrence, no closure adjustment");
            continue;
        }
        if closure_days <= rule.benchmark_days {
            breakdown.add(CLOSURE_BONUSES, rule.bonus);
        } else {
            breakdown.add(CLOSURE_PENALTIES, rule.penalty);
        }
    }

    EntityScore {
        entity: name.to_string(),
        raw_score: breakdown.total(),
        normalized_score: 0.0,
        incident_free_days,
        incident_count: own.len(),
        breakdown,
    }
}
