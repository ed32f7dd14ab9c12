use chrono::{Datelike, NaiveDate, Weekday};
use tracing::debug;

use crate::models::{Incident, IncidentStatus};

/// Working-days-lost estimator. One weekday per week is not worked and is
/// never counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaysLostCalculator {
    pub non_working_day: Weekday,
}

impl Default for DaysLostCalculator {
    fn default() -> Self {
        DaysLostCalculator {
            non_working_day: Weekday::Sun,
        }
    }
}

impl DaysLostCalculator {
    pub fn new(non_working_day: Weekday) -> Self {
        DaysLostCalculator { non_working_day }
    }

    /// Live estimate: working days from occurrence to closure (or `today`
    /// while open), inclusive, times the number of affected persons.
    pub fn estimate(&self, incident: &Incident, today: NaiveDate) -> u32 {
        if incident.incident_type.is_exempt() || incident.affected_persons.is_empty() {
            return 0;
        }

        let Some(start) = incident.occurred_on() else {
            debug!(incident = %incident.id, "no occurrence date, days lost is zero");
            return 0;
        };

        let end = match incident.status {
            IncidentStatus::Open => today,
            IncidentStatus::Closed => match incident.closure_date() {
                Some(date) => date,
                None => {
                    debug!(incident = %incident.id, "closed without closure date, days lost is zero");
                    return 0;
                }
            },
        };

        if end < start {
            debug!(incident = %incident.id, %start, %end, "closure precedes occurrence");
            return 0;
        }

        let persons = u32::try_from(incident.affected_persons.len()).unwrap_or(u32::MAX);
        self.working_days_between(start, end).saturating_mul(persons)
    }

    /// Authoritative value: the stored figure once closed, the live
    /// estimate otherwise.
    pub fn resolve(&self, incident: &Incident, today: NaiveDate) -> u32 {
        match (incident.status, incident.recorded_days_lost) {
            (IncidentStatus::Closed, Some(days)) => days,
            _ => self.estimate(incident, today),
        }
    }

    /// Days in `[start, end]` that are not the non-working day.
    pub fn working_days_between(&self, start: NaiveDate, end: NaiveDate) -> u32 {
        if end < start {
            return 0;
        }
        let total = (end - start).num_days() + 1;
        let mut days = (total / 7) * 6;
        let mut weekday = start.weekday();
        for _ in 0..total % 7 {
            if weekday != self.non_working_day {
                days += 1;
            }
            weekday = weekday.succ();
        }
        u32::try_from(days).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentType, PersonCategory};
    use chrono::NaiveDateTime;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn injury(occurred: NaiveDateTime) -> Incident {
        Incident::new("inc-1", IncidentType::LostTimeInjury, "North Pit", occurred)
            .with_person("J. Dlamini", PersonCategory::Employee)
    }

    #[test]
    fn zero_without_affected_persons() {
        let incident = Incident::new("inc-1", IncidentType::FatalInjury, "A", at(2026, 1, 5));
        let calculator = DaysLostCalculator::default();
        assert_eq!(calculator.estimate(&incident, date(2026, 3, 1)), 0);
    }

    #[test]
    fn exempt_types_never_accrue() {
        let calculator = DaysLostCalculator::default();
        for incident_type in [IncidentType::NearMiss, IncidentType::HighPotentialIncident] {
            let incident = Incident::new("inc-2", incident_type, "A", at(2026, 1, 5))
                .with_person("A", PersonCategory::Employee)
                .with_person("B", PersonCategory::Contractor);
            assert_eq!(calculator.estimate(&incident, date(2026, 3, 1)), 0);
        }
    }

    #[test]
    fn closed_saturday_to_monday_skips_sunday() {
        // 2026-01-03 is a Saturday.
        let incident = injury(at(2026, 1, 3)).closed(at(2026, 1, 5));
        let calculator = DaysLostCalculator::default();
        assert_eq!(calculator.estimate(&incident, date(2026, 6, 1)), 2);
    }

    #[test]
    fn open_incident_counts_to_today_per_person() {
        // Mon 2026-01-05 .. Mon 2026-01-19 is 15 days with two Sundays.
        let incident = injury(at(2026, 1, 5)).with_person("K. Naidoo", PersonCategory::Contractor);
        let calculator = DaysLostCalculator::default();
        assert_eq!(calculator.estimate(&incident, date(2026, 1, 19)), 26);
    }

    #[test]
    fn end_before_start_is_zero() {
        let incident = injury(at(2026, 2, 10));
        let calculator = DaysLostCalculator::default();
        assert_eq!(calculator.estimate(&incident, date(2026, 2, 1)), 0);
    }

    #[test]
    fn missing_occurrence_date_is_zero() {
        let mut incident = injury(at(2026, 2, 10));
        incident.occurred_at = None;
        let calculator = DaysLostCalculator::default();
        assert_eq!(calculator.estimate(&incident, date(2026, 3, 1)), 0);
    }

    #[test]
    fn resolve_prefers_recorded_value_once_closed() {
        let calculator = DaysLostCalculator::default();
        let open = injury(at(2026, 1, 5)).with_recorded_days_lost(40);
        assert_eq!(calculator.resolve(&open, date(2026, 1, 6)), 2);

        let closed = open.closed(at(2026, 1, 6));
        assert_eq!(calculator.resolve(&closed, date(2026, 3, 1)), 40);
    }

    #[test]
    fn configurable_non_working_day() {
        // 2026-01-09 is a Friday; Fri..Sun with Friday off leaves two days.
        let calculator = DaysLostCalculator::new(Weekday::Fri);
        assert_eq!(
            calculator.working_days_between(date(2026, 1, 9), date(2026, 1, 11)),
            2
        );
        assert_eq!(
            calculator.working_days_between(date(2026, 1, 1), date(2026, 1, 28)),
            24
        );
    }
}
