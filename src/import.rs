use std::io::Read;
use std::path::Path;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RollupError;
use crate::models::{
    parse_datetime, AffectedPerson, HistoryEntry, HistoryEvent, Incident, IncidentStatus,
    IncidentType, PersonCategory,
};

/// Loads an incident snapshot exported by the data service. Files ending
/// in `.csv` are read as CSV, anything else as a JSON array.
pub fn load_incidents(path: &Path) -> Result<Vec<Incident>, RollupError> {
    let file = std::fs::File::open(path).map_err(|source| RollupError::io(path, source))?;
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let incidents = if is_csv {
        read_csv(file)?
    } else {
        read_json(file)?
    };
    info!(path = %path.display(), count = incidents.len(), "loaded incidents");
    Ok(incidents)
}

/// Reads a JSON array of incidents. Records that do not deserialize are
/// skipped; only a malformed document is an error.
pub fn read_json<R: Read>(reader: R) -> Result<Vec<Incident>, RollupError> {
    let records: Vec<serde_json::Value> = serde_json::from_reader(reader)?;
    let mut incidents = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Incident>(record) {
            Ok(incident) => incidents.push(incident),
            Err(err) => warn!(record = index, error = %err, "skipping malformed incident"),
        }
    }

    Ok(incidents)
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    id: Option<String>,
    incident_type: String,
    mine: String,
    section: Option<String>,
    occurred_at: Option<String>,
    status: Option<String>,
    closed_at: Option<String>,
    affected_persons: Option<String>,
    days_lost: Option<u32>,
}

/// Reads the flat CSV export. Rows that fail to deserialize are skipped.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Incident>, RollupError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut incidents = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        match result {
            Ok(row) => incidents.push(incident_from_row(row)),
            Err(err) => warn!(row = index + 1, error = %err, "skipping malformed CSV row"),
        }
    }

    Ok(incidents)
}

fn incident_from_row(row: CsvRow) -> Incident {
    let id = row
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
    let occurred_at = row.occurred_at.as_deref().and_then(parse_datetime);
    let closed_at = row.closed_at.as_deref().and_then(parse_datetime);
    let status = row
        .status
        .as_deref()
        .and_then(IncidentStatus::parse)
        .unwrap_or_default();

    let mut history = Vec::new();
    if occurred_at.is_some() {
        history.push(HistoryEntry {
            at: occurred_at,
            actor: String::new(),
            event: HistoryEvent::Created,
        });
    }
    if status == IncidentStatus::Closed && closed_at.is_some() {
        history.push(HistoryEntry {
            at: closed_at,
            actor: String::new(),
            event: HistoryEvent::StatusChanged {
                from: IncidentStatus::Open,
                to: IncidentStatus::Closed,
            },
        });
    }

    Incident {
        id,
        incident_type: IncidentType::from(row.incident_type.as_str()),
        mine: row.mine,
        section: row.section.unwrap_or_default(),
        occurred_at,
        status,
        closed_at,
        affected_persons: row
            .affected_persons
            .as_deref()
            .map(parse_persons)
            .unwrap_or_default(),
        recorded_days_lost: row.days_lost,
        history,
        comments: Vec::new(),
        extra: Default::default(),
    }
}

/// `name:category` items separated by `;`. A bare name is an employee.
fn parse_persons(raw: &str) -> Vec<AffectedPerson> {
    raw.split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(':') {
            Some((name, category)) => AffectedPerson {
                name: name.trim().to_string(),
                category: PersonCategory::from(category.to_string()),
            },
            None => AffectedPerson {
                name: item.to_string(),
                category: PersonCategory::Employee,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const CSV: &str = "\
id,incident_type,mine,section,occurred_at,status,closed_at,affected_persons,days_lost
inc-1,Lost Time Injury,North Pit,Decline,2026-01-03 07:30,Closed,2026-01-05,T. Dube:contractor;M. Zulu,4
inc-2,Near Miss,North Pit,,2026-01-04,Open,,,
inc-3,First Aid Injury,South Pit,Workshop,2026-01-06,Open,,,not-a-number
,High Potential Incident,South Pit,Workshop,garbage,open,,,
";

    #[test]
    fn reads_csv_and_skips_corrupt_rows() {
        let incidents = read_csv(CSV.as_bytes()).unwrap();
        assert_eq!(incidents.len(), 3);

        let first = &incidents[0];
        assert_eq!(first.id, "inc-1");
        assert_eq!(first.incident_type, IncidentType::LostTimeInjury);
        assert_eq!(first.section, "Decline");
        assert_eq!(first.status, IncidentStatus::Closed);
        assert_eq!(first.closure_date(), NaiveDate::from_ymd_opt(2026, 1, 5));
        assert_eq!(first.recorded_days_lost, Some(4));
        assert_eq!(
            first.affected_persons,
            vec![
                AffectedPerson {
                    name: "T. Dube".into(),
                    category: PersonCategory::Contractor
                },
                AffectedPerson {
                    name: "M. Zulu".into(),
                    category: PersonCategory::Employee
                },
            ]
        );

        assert!(incidents[1].affected_persons.is_empty());
        assert_eq!(incidents[1].recorded_days_lost, None);

        let generated = &incidents[2];
        assert!(generated.id.starts_with("import-"));
        assert_eq!(generated.occurred_at, None);
        assert_eq!(generated.incident_type, IncidentType::HighPotentialIncident);
    }

    #[test]
    fn reads_json_and_skips_corrupt_records() {
        let json = r#"[
            {"id": "a", "incident_type": "Near Miss", "mine": "North Pit", "occurred_at": "2026-01-03"},
            {"incident_type": "Near Miss"},
            {"id": "b", "incident_type": "Fatal Injury", "mine": "South Pit", "occurred_at": "2026-01-09T12:00:00",
             "affected_persons": [{"name": "R. Pillay", "category": "Employee"}]}
        ]"#;
        let incidents = read_json(json.as_bytes()).unwrap();
        let ids: Vec<_> = incidents.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(incidents[1].affected_persons.len(), 1);
    }

    #[test]
    fn rejects_non_array_json() {
        let err = read_json("{\"id\": 1}".as_bytes()).unwrap_err();
        assert!(matches!(err, RollupError::Json(_)));
    }

    #[test]
    fn load_incidents_dispatches_on_extension() {
        let mut csv_file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        csv_file.write_all(CSV.as_bytes()).unwrap();
        assert_eq!(load_incidents(csv_file.path()).unwrap().len(), 3);

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json_file.write_all(b"[]").unwrap();
        assert!(load_incidents(json_file.path()).unwrap().is_empty());

        let missing = load_incidents(Path::new("/nonexistent/incidents.json")).unwrap_err();
        assert!(matches!(missing, RollupError::Io { .. }));
    }
}
