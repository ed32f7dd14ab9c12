use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::days_lost::DaysLostCalculator;
use crate::models::{
    Entity, Incident, IncidentType, Kpi, Period, ReferenceData, Rollup, RollupComparison,
    TrendBucket, TypeCount,
};
use crate::period::{self, GroupBy, MetricDef};
use crate::scoring::{self, ScoringRules};

pub const KPI_TOTAL_INCIDENTS: &str = "Total Incidents";
pub const KPI_LTI_COUNT: &str = "LTI Count";
pub const KPI_DAYS_LOST: &str = "Total Days Lost";
pub const KPI_MAN_DAYS: &str = "Man-Days";
pub const KPI_LTIFR: &str = "LTIFR";

/// Groups shown in each of the most improved / needs attention lists.
const RANKING_SIZE: usize = 3;

/// Dashboard selection. Mines and incident types are explicit: an empty
/// selection selects nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupFilter {
    pub period: Period,
    pub mines: Vec<String>,
    pub incident_types: Vec<IncidentType>,
    pub compare_to: Option<Period>,
    pub man_days: Option<f64>,
}

impl RollupFilter {
    /// Every active mine and incident type from the reference data.
    pub fn all_active(period: Period, reference: &ReferenceData) -> Self {
        RollupFilter {
            period,
            mines: reference
                .active_entities()
                .iter()
                .map(|entity| entity.name.clone())
                .collect(),
            incident_types: reference.active_incident_types(),
            compare_to: None,
            man_days: None,
        }
    }

    pub fn compared_to(mut self, period: Period) -> Self {
        self.compare_to = Some(period);
        self
    }

    fn selects(&self, incident: &Incident) -> bool {
        self.mines.iter().any(|mine| mine.trim() == incident.mine.trim())
            && self.incident_types.contains(&incident.incident_type)
    }
}

/// Explicit configuration for a rollup call.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupOptions {
    pub today: NaiveDate,
    pub calculator: DaysLostCalculator,
    pub rules: ScoringRules,
}

impl RollupOptions {
    pub fn new(today: NaiveDate) -> Self {
        RollupOptions {
            today,
            calculator: DaysLostCalculator::default(),
            rules: ScoringRules::default(),
        }
    }
}

/// Builds the dashboard dataset for `filter`. An empty selection or empty
/// input produces an empty rollup, never an error.
pub fn build_rollup(
    incidents: &[Incident],
    reference: &ReferenceData,
    filter: &RollupFilter,
    options: &RollupOptions,
) -> Rollup {
    if filter.mines.is_empty() || filter.incident_types.is_empty() {
        debug!("empty mine or incident type selection");
        return Rollup::empty(filter.period);
    }

    let selected: Vec<Incident> = incidents
        .iter()
        .filter(|incident| filter.selects(incident))
        .cloned()
        .collect();
    let undated_incidents = selected
        .iter()
        .filter(|incident| incident.occurred_at.is_none())
        .count();
    if undated_incidents > 0 {
        debug!(undated_incidents, "incidents without a usable occurrence date");
    }

    let entities: Vec<Entity> = filter
        .mines
        .iter()
        .map(|name| {
            reference
                .entity(name)
                .cloned()
                .unwrap_or_else(|| Entity::named(name.as_str()))
        })
        .collect();

    let mut types = filter.incident_types.clone();
    types.sort();
    types.dedup();

    let in_period = period::partition(&selected, &filter.period);

    Rollup {
        period: filter.period,
        kpis: kpis(&in_period, &entities, filter, options),
        ranking: scoring::score_all(&selected, &entities, &filter.period, &options.rules),
        monthly_trend: monthly_trend(&in_period, &filter.period, &types),
        by_type: count_by_type(&in_period, &types),
        comparison: filter
            .compare_to
            .map(|against| compare_periods(&selected, filter, against, options)),
        undated_incidents,
    }
}

/// `lti × 1,000,000 / man_days`, zero when there is no exposure.
pub fn ltifr(lti_count: usize, man_days: f64) -> f64 {
    if man_days > 0.0 {
        lti_count as f64 * 1_000_000.0 / man_days
    } else {
        0.0
    }
}

/// Exposure over `period`: headcount times working days, per entity.
pub fn man_days(entities: &[Entity], period: &Period, calculator: &DaysLostCalculator) -> f64 {
    let working_days = f64::from(calculator.working_days_between(period.start, period.end));
    entities
        .iter()
        .filter_map(|entity| entity.workforce)
        .fold(0.0, |total, workforce| {
            total + f64::from(workforce) * working_days
        })
}

fn kpis(
    in_period: &[&Incident],
    entities: &[Entity],
    filter: &RollupFilter,
    options: &RollupOptions,
) -> Vec<Kpi> {
    let total = in_period.len();
    let lti_count = in_period
        .iter()
        .filter(|incident| incident.incident_type.is_lti())
        .count();
    let days_lost: u64 = in_period
        .iter()
        .map(|incident| u64::from(options.calculator.resolve(incident, options.today)))
        .sum();
    let exposure = filter
        .man_days
        .unwrap_or_else(|| man_days(entities, &filter.period, &options.calculator));

    vec![
        Kpi {
            name: KPI_TOTAL_INCIDENTS.to_string(),
            value: total as f64,
        },
        Kpi {
            name: KPI_LTI_COUNT.to_string(),
            value: lti_count as f64,
        },
        Kpi {
            name: KPI_DAYS_LOST.to_string(),
            value: days_lost as f64,
        },
        Kpi {
            name: KPI_MAN_DAYS.to_string(),
            value: exposure,
        },
        Kpi {
            name: KPI_LTIFR.to_string(),
            value: ltifr(lti_count, exposure),
        },
    ]
}

fn count_by_type(incidents: &[&Incident], types: &[IncidentType]) -> Vec<TypeCount> {
    types
        .iter()
        .map(|incident_type| TypeCount {
            incident_type: incident_type.label().to_string(),
            count: incidents
                .iter()
                .filter(|incident| &incident.incident_type == incident_type)
                .count(),
        })
        .collect()
}

fn monthly_trend(
    in_period: &[&Incident],
    period: &Period,
    types: &[IncidentType],
) -> Vec<TrendBucket> {
    period
        .months()
        .into_iter()
        .map(|(year, month)| {
            let in_month: Vec<&Incident> = in_period
                .iter()
                .copied()
                .filter(|incident| {
                    incident
                        .occurred_on()
                        .is_some_and(|date| date.year() == year && date.month() == month)
                })
                .collect();
            TrendBucket {
                month: format!("{year:04}-{month:02}"),
                total: in_month.len(),
                by_type: count_by_type(&in_month, types),
            }
        })
        .collect()
}

fn compare_periods(
    selected: &[Incident],
    filter: &RollupFilter,
    against: Period,
    options: &RollupOptions,
) -> RollupComparison {
    let metrics = period::compare(
        selected,
        &filter.period,
        &against,
        &MetricDef::standard(options.calculator, options.today),
    );
    let by_mine = period::compare_grouped(
        selected,
        &filter.period,
        &against,
        &MetricDef::total_incidents(),
        GroupBy::Mine,
        Some(filter.mines.as_slice()),
    );
    let ranking = period::rank_changes(&by_mine, RANKING_SIZE);
    RollupComparison {
        against,
        metrics,
        by_mine,
        ranking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersonCategory;
    use chrono::NaiveDateTime;
    use pretty_assertions::assert_eq;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(6, 45, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn reference() -> ReferenceData {
        let mut north = Entity::named("North");
        north.workforce = Some(100);
        north.sort_order = 1;
        let mut south = Entity::named("South");
        south.workforce = Some(50);
        south.sort_order = 2;
        let mut closed = Entity::named("Closed Shaft");
        closed.active = false;
        ReferenceData {
            mines: vec![north, south, closed],
            sections: Vec::new(),
            incident_types: ReferenceData::from_incidents(&[]).incident_types,
        }
    }

    fn incidents() -> Vec<Incident> {
        vec![
            Incident::new("1", IncidentType::NearMiss, "North", at(2026, 1, 7)),
            Incident::new("2", IncidentType::LostTimeInjury, "North", at(2026, 2, 2))
                .with_person("S. Khumalo", PersonCategory::Employee)
                .closed(at(2026, 2, 4))
                .with_recorded_days_lost(5),
            Incident::new("3", IncidentType::FirstAidInjury, "South", at(2026, 2, 16)),
            Incident::new("4", IncidentType::SeriousBodilyInjury, "South", at(2026, 3, 3))
                .with_person("L. Botha", PersonCategory::Contractor),
            Incident::new("5", IncidentType::NearMiss, "Closed Shaft", at(2026, 3, 3)),
            Incident::new("6", IncidentType::NearMiss, "North", at(2025, 12, 3)),
        ]
    }

    fn q1() -> Period {
        Period::new(date(2026, 1, 1), date(2026, 3, 31))
    }

    #[test]
    fn builds_kpis_ranking_and_trends() {
        let reference = reference();
        let filter = RollupFilter::all_active(q1(), &reference);
        let rollup = build_rollup(
            &incidents(),
            &reference,
            &filter,
            &RollupOptions::new(date(2026, 3, 5)),
        );

        assert_eq!(rollup.kpi(KPI_TOTAL_INCIDENTS), Some(4.0));
        assert_eq!(rollup.kpi(KPI_LTI_COUNT), Some(3.0));
        // Recorded 5 for the closed LTI, Tue 3 Mar to Thu 5 Mar live for the SBI.
        assert_eq!(rollup.kpi(KPI_DAYS_LOST), Some(8.0));

        // Q1 2026 has 90 days, 13 of them Sundays.
        let man_days = 150.0 * 77.0;
        assert_eq!(rollup.kpi(KPI_MAN_DAYS), Some(man_days));
        assert_eq!(rollup.kpi(KPI_LTIFR), Some(3.0 * 1_000_000.0 / man_days));

        let order: Vec<_> = rollup.ranking.iter().map(|s| s.entity.as_str()).collect();
        assert_eq!(order, vec!["North", "South"]);

        let months: Vec<_> = rollup
            .monthly_trend
            .iter()
            .map(|b| (b.month.as_str(), b.total))
            .collect();
        assert_eq!(months, vec![("2026-01", 1), ("2026-02", 2), ("2026-03", 1)]);
        assert_eq!(rollup.monthly_trend[0].by_type.len(), 7);
        assert_eq!(rollup.monthly_trend[0].by_type[0].count, 1);

        let near_miss = &rollup.by_type[0];
        assert_eq!(near_miss.incident_type, "Near Miss");
        assert_eq!(near_miss.count, 1);
        assert!(rollup.comparison.is_none());
    }

    #[test]
    fn comparison_adds_metric_deltas_and_mine_changes() {
        let reference = reference();
        let filter = RollupFilter::all_active(Period::month(2026, 3).unwrap(), &reference)
            .compared_to(Period::month(2026, 2).unwrap());
        let rollup = build_rollup(
            &incidents(),
            &reference,
            &filter,
            &RollupOptions::new(date(2026, 3, 31)),
        );

        let comparison = rollup.comparison.unwrap();
        assert_eq!(comparison.metrics[0].metric, period::TOTAL_INCIDENTS);
        assert_eq!(
            (comparison.metrics[0].value_a, comparison.metrics[0].value_b),
            (1.0, 2.0)
        );
        assert_eq!(comparison.metrics[0].percent_change, -50.0);

        let keys: Vec<_> = comparison.by_mine.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["North", "South"]);
        assert_eq!(comparison.ranking.most_improved[0].key, "North");
        assert_eq!(comparison.ranking.needs_attention[0].key, "South");
    }

    #[test]
    fn selection_narrows_incidents() {
        let reference = reference();
        let mut filter = RollupFilter::all_active(q1(), &reference);
        filter.mines = vec!["South".to_string()];
        filter.incident_types = vec![IncidentType::SeriousBodilyInjury];
        filter.man_days = Some(0.0);

        let rollup = build_rollup(
            &incidents(),
            &reference,
            &filter,
            &RollupOptions::new(date(2026, 3, 31)),
        );
        assert_eq!(rollup.kpi(KPI_TOTAL_INCIDENTS), Some(1.0));
        assert_eq!(rollup.kpi(KPI_LTIFR), Some(0.0));
        assert_eq!(rollup.ranking.len(), 1);
        assert_eq!(rollup.by_type.len(), 1);
    }

    #[test]
    fn man_days_without_workforce_is_positive_zero() {
        let exposure = man_days(
            &[Entity::named("North")],
            &q1(),
            &DaysLostCalculator::default(),
        );
        assert_eq!(exposure, 0.0);
        assert!(exposure.is_sign_positive());
        assert_eq!(format!("{exposure}"), "0");
    }

    #[test]
    fn empty_selection_yields_empty_rollup() {
        let reference = reference();
        let mut no_mines = RollupFilter::all_active(q1(), &reference);
        no_mines.mines.clear();
        let mut no_types = RollupFilter::all_active(q1(), &reference);
        no_types.incident_types.clear();
        let options = RollupOptions::new(date(2026, 3, 31));

        for filter in [no_mines, no_types] {
            let rollup = build_rollup(&incidents(), &reference, &filter, &options);
            assert_eq!(rollup, Rollup::empty(q1()));
        }

        let empty_reference = ReferenceData::default();
        let filter = RollupFilter::all_active(q1(), &empty_reference);
        let rollup = build_rollup(&incidents(), &empty_reference, &filter, &options);
        assert!(rollup.ranking.is_empty());
        assert!(rollup.kpis.is_empty());
    }

    #[test]
    fn corrupt_incident_does_not_abort_rollup() {
        let reference = reference();
        let mut records = incidents();
        records[0].occurred_at = None;
        let filter = RollupFilter::all_active(q1(), &reference);
        let rollup = build_rollup(
            &records,
            &reference,
            &filter,
            &RollupOptions::new(date(2026, 3, 5)),
        );
        assert_eq!(rollup.undated_incidents, 1);
        assert_eq!(rollup.kpi(KPI_TOTAL_INCIDENTS), Some(3.0));
        assert_eq!(rollup.ranking.len(), 2);
    }

    #[test]
    fn ltifr_guards_zero_exposure() {
        assert_eq!(ltifr(2, 0.0), 0.0);
        assert_eq!(ltifr(2, 500_000.0), 4.0);
    }
}
