use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};

use crate::days_lost::DaysLostCalculator;
use crate::error::RollupError;
use crate::models::{
    ChangeRanking, GroupComparison, Incident, IncidentStatus, IncidentType, MetricComparison,
    Period,
};

pub const TOTAL_INCIDENTS: &str = "Total Incidents";
pub const LTI_COUNT: &str = "LTI Count";
pub const OPEN_INCIDENTS: &str = "Open Incidents";
pub const CLOSED_INCIDENTS: &str = "Closed Incidents";
pub const NEAR_MISSES: &str = "Near Misses";
pub const DAYS_LOST: &str = "Days Lost";

/// Relative change of `value_a` over `value_b`, in percent. A zero
/// baseline reports 100 when anything happened and 0 otherwise.
pub fn percent_change(value_a: f64, value_b: f64) -> f64 {
    if value_b == 0.0 {
        if value_a > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (value_a - value_b) / value_b * 100.0
    }
}

type Predicate = Box<dyn Fn(&Incident) -> bool>;
type Field = Box<dyn Fn(&Incident) -> f64>;

enum Reducer {
    Count,
    CountWhere(Predicate),
    Sum(Field),
}

/// A named reducer over a set of incidents.
pub struct MetricDef {
    pub name: String,
    reducer: Reducer,
}

impl fmt::Debug for MetricDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.reducer {
            Reducer::Count => "count",
            Reducer::CountWhere(_) => "count_where",
            Reducer::Sum(_) => "sum",
        };
        f.debug_struct("MetricDef")
            .field("name", &self.name)
            .field("reducer", &kind)
            .finish()
    }
}

impl MetricDef {
    pub fn count(name: impl Into<String>) -> Self {
        MetricDef {
            name: name.into(),
            reducer: Reducer::Count,
        }
    }

    pub fn count_where(
        name: impl Into<String>,
        predicate: impl Fn(&Incident) -> bool + 'static,
    ) -> Self {
        MetricDef {
            name: name.into(),
            reducer: Reducer::CountWhere(Box::new(predicate)),
        }
    }

    pub fn sum(name: impl Into<String>, field: impl Fn(&Incident) -> f64 + 'static) -> Self {
        MetricDef {
            name: name.into(),
            reducer: Reducer::Sum(Box::new(field)),
        }
    }

    pub fn evaluate(&self, incidents: &[&Incident]) -> f64 {
        match &self.reducer {
            Reducer::Count => incidents.len() as f64,
            Reducer::CountWhere(predicate) => {
                incidents.iter().filter(|&&incident| predicate(incident)).count() as f64
            }
            Reducer::Sum(field) => incidents
                .iter()
                .fold(0.0, |total, &incident| total + field(incident)),
        }
    }

    pub fn total_incidents() -> Self {
        MetricDef::count(TOTAL_INCIDENTS)
    }

    pub fn lti_count() -> Self {
        MetricDef::count_where(LTI_COUNT, |incident| incident.incident_type.is_lti())
    }

    pub fn open_incidents() -> Self {
        MetricDef::count_where(OPEN_INCIDENTS, |incident| {
            incident.status == IncidentStatus::Open
        })
    }

    pub fn closed_incidents() -> Self {
        MetricDef::count_where(CLOSED_INCIDENTS, |incident| {
            incident.status == IncidentStatus::Closed
        })
    }

    pub fn near_misses() -> Self {
        MetricDef::count_where(NEAR_MISSES, |incident| {
            incident.incident_type == IncidentType::NearMiss
        })
    }

    pub fn days_lost(calculator: DaysLostCalculator, today: NaiveDate) -> Self {
        MetricDef::sum(DAYS_LOST, move |incident| {
            f64::from(calculator.resolve(incident, today))
        })
    }

    /// The dashboard's comparison cards.
    pub fn standard(calculator: DaysLostCalculator, today: NaiveDate) -> Vec<Self> {
        vec![
            MetricDef::total_incidents(),
            MetricDef::lti_count(),
            MetricDef::near_misses(),
            MetricDef::open_incidents(),
            MetricDef::closed_incidents(),
            MetricDef::days_lost(calculator, today),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Mine,
    Section,
    IncidentType,
}

impl GroupBy {
    pub fn key(&self, incident: &Incident) -> String {
        match self {
            GroupBy::Mine => incident.mine.trim().to_string(),
            GroupBy::Section => incident.section.trim().to_string(),
            GroupBy::IncidentType => incident.incident_type.label().to_string(),
        }
    }
}

impl FromStr for GroupBy {
    type Err = RollupError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mine" | "entity" => Ok(GroupBy::Mine),
            "section" => Ok(GroupBy::Section),
            "type" | "incident-type" | "incident_type" => Ok(GroupBy::IncidentType),
            other => Err(RollupError::InvalidArgument(format!(
                "unknown grouping '{other}' (expected mine, section or type)"
            ))),
        }
    }
}

/// Incidents whose occurrence date falls inside `period`. Undated
/// incidents belong to no period.
pub fn partition<'a>(incidents: &'a [Incident], period: &Period) -> Vec<&'a Incident> {
    incidents
        .iter()
        .filter(|incident| {
            incident
                .occurred_on()
                .is_some_and(|date| period.contains(date))
        })
        .collect()
}

/// Evaluates each metric over the incidents of `period_a` and `period_b`.
/// The two periods are filtered independently and may overlap.
pub fn compare(
    incidents: &[Incident],
    period_a: &Period,
    period_b: &Period,
    metrics: &[MetricDef],
) -> Vec<MetricComparison> {
    let in_a = partition(incidents, period_a);
    let in_b = partition(incidents, period_b);

    metrics
        .iter()
        .map(|metric| {
            let value_a = metric.evaluate(&in_a);
            let value_b = metric.evaluate(&in_b);
            MetricComparison {
                metric: metric.name.clone(),
                value_a,
                value_b,
                percent_change: percent_change(value_a, value_b),
            }
        })
        .collect()
}

/// Runs the scalar comparison once per category of `group_by`. With
/// `categories` the key set and order are fixed; otherwise keys appear in
/// first-seen order across both periods.
pub fn compare_grouped(
    incidents: &[Incident],
    period_a: &Period,
    period_b: &Period,
    metric: &MetricDef,
    group_by: GroupBy,
    categories: Option<&[String]>,
) -> Vec<GroupComparison> {
    let in_a = partition(incidents, period_a);
    let in_b = partition(incidents, period_b);

    let keys: Vec<String> = match categories {
        Some(categories) => categories.to_vec(),
        None => {
            let mut keys: Vec<String> = Vec::new();
            for incident in incidents {
                let Some(date) = incident.occurred_on() else {
                    continue;
                };
                if !period_a.contains(date) && !period_b.contains(date) {
                    continue;
                }
                let key = group_by.key(incident);
                if !key.is_empty() && !keys.contains(&key) {
                    keys.push(key);
                }
            }
            keys
        }
    };

    keys.into_iter()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .map(|key| {
            let group_a: Vec<&Incident> = in_a
                .iter()
                .copied()
                .filter(|incident| group_by.key(incident) == key)
                .collect();
            let group_b: Vec<&Incident> = in_b
                .iter()
                .copied()
                .filter(|incident| group_by.key(incident) == key)
                .collect();
            let value_a = metric.evaluate(&group_a);
            let value_b = metric.evaluate(&group_b);
            GroupComparison {
                key,
                value_a,
                value_b,
                percent_change: percent_change(value_a, value_b),
            }
        })
        .collect()
}

/// Ascending by percent change: the first `top` are the most improved, the
/// last `top` (worst first) need attention. Lower incident counts are the
/// desirable direction.
pub fn rank_changes(groups: &[GroupComparison], top: usize) -> ChangeRanking {
    let mut sorted = groups.to_vec();
    sorted.sort_by(|a, b| {
        a.percent_change
            .partial_cmp(&b.percent_change)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let most_improved = sorted.iter().take(top).cloned().collect();
    let needs_attention = sorted.iter().rev().take(top).cloned().collect();
    ChangeRanking {
        most_improved,
        needs_attention,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodPreset {
    ThisMonth,
    LastMonth,
    Last30Days,
    Last90Days,
    QuarterToDate,
    YearToDate,
    LastYear,
}

impl PeriodPreset {
    pub fn resolve(&self, today: NaiveDate) -> Period {
        let month_start = today.with_day(1).unwrap_or(today);
        match self {
            PeriodPreset::ThisMonth => Period::new(month_start, today),
            PeriodPreset::LastMonth => {
                let end = month_start - Duration::days(1);
                Period::new(end.with_day(1).unwrap_or(end), end)
            }
            PeriodPreset::Last30Days => Period::new(today - Duration::days(29), today),
            PeriodPreset::Last90Days => Period::new(today - Duration::days(89), today),
            PeriodPreset::QuarterToDate => {
                let quarter_month = (today.month0() / 3) * 3 + 1;
                let start =
                    NaiveDate::from_ymd_opt(today.year(), quarter_month, 1).unwrap_or(month_start);
                Period::new(start, today)
            }
            PeriodPreset::YearToDate => {
                let start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(month_start);
                Period::new(start, today)
            }
            PeriodPreset::LastYear => {
                let year = today.year() - 1;
                match (
                    NaiveDate::from_ymd_opt(year, 1, 1),
                    NaiveDate::from_ymd_opt(year, 12, 31),
                ) {
                    (Some(start), Some(end)) => Period::new(start, end),
                    _ => Period::new(today, today),
                }
            }
        }
    }
}

impl FromStr for PeriodPreset {
    type Err = RollupError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "this-month" => Ok(PeriodPreset::ThisMonth),
            "last-month" => Ok(PeriodPreset::LastMonth),
            "last-30-days" => Ok(PeriodPreset::Last30Days),
            "last-90-days" => Ok(PeriodPreset::Last90Days),
            "quarter-to-date" | "qtd" => Ok(PeriodPreset::QuarterToDate),
            "year-to-date" | "ytd" => Ok(PeriodPreset::YearToDate),
            "last-year" => Ok(PeriodPreset::LastYear),
            other => Err(RollupError::InvalidArgument(format!(
                "unknown period preset '{other}'"
            ))),
        }
    }
}
