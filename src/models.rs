use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Severity taxonomy, least severe first. Admin-defined types that are not
/// part of the built-in taxonomy sort after it as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IncidentType {
    NearMiss,
    HighPotentialIncident,
    FirstAidInjury,
    MedicalTreatmentInjury,
    LostTimeInjury,
    SeriousBodilyInjury,
    FatalInjury,
    Other(String),
}

impl IncidentType {
    pub const TAXONOMY: [IncidentType; 7] = [
        IncidentType::NearMiss,
        IncidentType::HighPotentialIncident,
        IncidentType::FirstAidInjury,
        IncidentType::MedicalTreatmentInjury,
        IncidentType::LostTimeInjury,
        IncidentType::SeriousBodilyInjury,
        IncidentType::FatalInjury,
    ];

    pub fn label(&self) -> &str {
        match self {
            IncidentType::NearMiss => "Near Miss",
            IncidentType::HighPotentialIncident => "High Potential Incident",
            IncidentType::FirstAidInjury => "First Aid Injury",
            IncidentType::MedicalTreatmentInjury => "Medical Treatment Injury",
            IncidentType::LostTimeInjury => "Lost Time Injury",
            IncidentType::SeriousBodilyInjury => "Serious Bodily Injury",
            IncidentType::FatalInjury => "Fatal Injury",
            IncidentType::Other(name) => name,
        }
    }

    /// Near misses and high potential incidents never accrue days lost.
    pub fn is_exempt(&self) -> bool {
        matches!(
            self,
            IncidentType::NearMiss | IncidentType::HighPotentialIncident
        )
    }

    pub fn is_lti(&self) -> bool {
        !self.is_exempt()
    }
}

impl From<&str> for IncidentType {
    fn from(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "near miss" | "nm" => IncidentType::NearMiss,
            "high potential incident" | "hpi" => IncidentType::HighPotentialIncident,
            "first aid injury" | "fai" => IncidentType::FirstAidInjury,
            "medical treatment injury" | "mti" => IncidentType::MedicalTreatmentInjury,
            "lost time injury" | "lti" => IncidentType::LostTimeInjury,
            "serious bodily injury" | "sbi" => IncidentType::SeriousBodilyInjury,
            "fatal injury" | "fatality" => IncidentType::FatalInjury,
            _ => IncidentType::Other(value.trim().to_string()),
        }
    }
}

impl From<String> for IncidentType {
    fn from(value: String) -> Self {
        IncidentType::from(value.as_str())
    }
}

impl From<IncidentType> for String {
    fn from(value: IncidentType) -> Self {
        match value {
            IncidentType::Other(name) => name,
            known => known.label().to_string(),
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentStatus {
    #[default]
    #[serde(alias = "open", alias = "OPEN")]
    Open,
    #[serde(alias = "closed", alias = "CLOSED")]
    Closed,
}

impl IncidentStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(IncidentStatus::Open),
            "closed" => Some(IncidentStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PersonCategory {
    #[default]
    Employee,
    Contractor,
    Visitor,
    Other(String),
}

impl From<String> for PersonCategory {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "employee" => PersonCategory::Employee,
            "contractor" => PersonCategory::Contractor,
            "visitor" => PersonCategory::Visitor,
            _ => PersonCategory::Other(value.trim().to_string()),
        }
    }
}

impl From<PersonCategory> for String {
    fn from(value: PersonCategory) -> Self {
        match value {
            PersonCategory::Employee => "Employee".to_string(),
            PersonCategory::Contractor => "Contractor".to_string(),
            PersonCategory::Visitor => "Visitor".to_string(),
            PersonCategory::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedPerson {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: PersonCategory,
}

/// Structured history events. Closure is detected from `StatusChanged`,
/// never from free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Created,
    StatusChanged {
        from: IncidentStatus,
        to: IncidentStatus,
    },
    Updated {
        summary: String,
    },
    DaysLostRecorded {
        days: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub at: Option<NaiveDateTime>,
    #[serde(default)]
    pub actor: String,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub author: String,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub at: Option<NaiveDateTime>,
    #[serde(default)]
    pub body: String,
}

/// An incident as supplied by the data service. Never mutated by the
/// calculations; a missing or unparseable `occurred_at` is kept as `None`
/// so the record degrades to zero contribution instead of failing a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub incident_type: IncidentType,
    #[serde(default)]
    pub mine: String,
    #[serde(default)]
    pub section: String,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub occurred_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub closed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub affected_persons: Vec<AffectedPerson>,
    #[serde(default)]
    pub recorded_days_lost: Option<u32>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Incident {
    pub fn new(
        id: impl Into<String>,
        incident_type: IncidentType,
        mine: impl Into<String>,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Incident {
            id: id.into(),
            incident_type,
            mine: mine.into(),
            section: String::new(),
            occurred_at: Some(occurred_at),
            status: IncidentStatus::Open,
            closed_at: None,
            affected_persons: Vec::new(),
            recorded_days_lost: None,
            history: vec![HistoryEntry {
                at: Some(occurred_at),
                actor: String::new(),
                event: HistoryEvent::Created,
            }],
            comments: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    pub fn with_person(mut self, name: impl Into<String>, category: PersonCategory) -> Self {
        self.affected_persons.push(AffectedPerson {
            name: name.into(),
            category,
        });
        self
    }

    /// Marks the incident closed at `at`, appending the status transition.
    pub fn closed(mut self, at: NaiveDateTime) -> Self {
        self.history.push(HistoryEntry {
            at: Some(at),
            actor: String::new(),
            event: HistoryEvent::StatusChanged {
                from: self.status,
                to: IncidentStatus::Closed,
            },
        });
        self.status = IncidentStatus::Closed;
        self.closed_at = Some(at);
        self
    }

    pub fn with_recorded_days_lost(mut self, days: u32) -> Self {
        self.recorded_days_lost = Some(days);
        self
    }

    pub fn occurred_on(&self) -> Option<NaiveDate> {
        self.occurred_at.map(|at| at.date())
    }

    /// Timestamp of the first transition into `Closed`, falling back to the
    /// stored closure date when the history carries no such transition.
    pub fn closure_timestamp(&self) -> Option<NaiveDateTime> {
        self.history
            .iter()
            .find(|entry| {
                matches!(
                    entry.event,
                    HistoryEvent::StatusChanged {
                        to: IncidentStatus::Closed,
                        ..
                    }
                )
            })
            .and_then(|entry| entry.at)
            .or(self.closed_at)
    }

    pub fn closure_date(&self) -> Option<NaiveDate> {
        self.closure_timestamp().map(|at| at.date())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRule {
    pub base_points: i64,
    pub benchmark_days: i64,
    pub bonus: i64,
    pub penalty: i64,
}

impl ScoringRule {
    pub const fn new(base_points: i64, benchmark_days: i64, bonus: i64, penalty: i64) -> Self {
        ScoringRule {
            base_points,
            benchmark_days,
            bonus,
            penalty,
        }
    }
}

/// Inclusive date range. Reversed bounds are swapped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            Period {
                start: end,
                end: start,
            }
        } else {
            Period { start, end }
        }
    }

    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some(Period::new(start, next - Duration::days(1)))
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// The period of equal length ending the day before this one starts.
    pub fn preceding(&self) -> Self {
        let end = self.start - Duration::days(1);
        Period::new(end - Duration::days(self.days() - 1), end)
    }

    /// Calendar months touched by the period, in order.
    pub fn months(&self) -> Vec<(i32, u32)> {
        let mut months = Vec::new();
        let (mut year, mut month) = (self.start.year(), self.start.month());
        let last = (self.end.year(), self.end.month());
        while (year, month) <= last {
            months.push((year, month));
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }
        months
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

fn default_active() -> bool {
    true
}

/// A mine being scored and ranked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub workforce: Option<u32>,
}

impl Entity {
    pub fn named(name: impl Into<String>) -> Self {
        Entity {
            name: name.into(),
            active: true,
            sort_order: 0,
            workforce: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub sort_order: i32,
}

/// Admin-managed reference data. Each list is independently toggleable and
/// ordered by its explicit sort key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    pub mines: Vec<Entity>,
    #[serde(default)]
    pub sections: Vec<ReferenceItem>,
    #[serde(default)]
    pub incident_types: Vec<ReferenceItem>,
}

impl ReferenceData {
    pub fn active_entities(&self) -> Vec<&Entity> {
        let mut entities: Vec<&Entity> = self.mines.iter().filter(|m| m.active).collect();
        entities.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        entities
    }

    pub fn active_sections(&self) -> Vec<&str> {
        active_names(&self.sections)
    }

    pub fn active_incident_types(&self) -> Vec<IncidentType> {
        active_names(&self.incident_types)
            .into_iter()
            .map(IncidentType::from)
            .collect()
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.mines.iter().find(|m| m.name == name)
    }

    /// Reference data implied by an incident snapshot: mines and sections in
    /// first-seen order, the full taxonomy plus any other type seen.
    pub fn from_incidents(incidents: &[Incident]) -> Self {
        let mut reference = ReferenceData::default();
        for incident in incidents {
            let mine = incident.mine.trim();
            if !mine.is_empty() && reference.entity(mine).is_none() {
                let mut entity = Entity::named(mine);
                entity.sort_order = reference.mines.len() as i32;
                reference.mines.push(entity);
            }
            let section = incident.section.trim();
            if !section.is_empty() && !reference.sections.iter().any(|s| s.name == section) {
                reference.sections.push(ReferenceItem {
                    name: section.to_string(),
                    active: true,
                    sort_order: reference.sections.len() as i32,
                });
            }
        }

        let mut types: Vec<IncidentType> = IncidentType::TAXONOMY.to_vec();
        for incident in incidents {
            if !types.contains(&incident.incident_type) {
                types.push(incident.incident_type.clone());
            }
        }
        reference.incident_types = types
            .into_iter()
            .enumerate()
            .map(|(index, incident_type)| ReferenceItem {
                name: incident_type.label().to_string(),
                active: true,
                sort_order: index as i32,
            })
            .collect();
        reference
    }
}

fn active_names(items: &[ReferenceItem]) -> Vec<&str> {
    let mut active: Vec<&ReferenceItem> = items.iter().filter(|i| i.active).collect();
    active.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });
    active.into_iter().map(|i| i.name.as_str()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakdownEntry {
    pub category: String,
    pub points: i64,
}

/// Score contributions as ordered `(category, points)` pairs, in the order
/// each category was first touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Breakdown {
    entries: Vec<BreakdownEntry>,
}

impl Breakdown {
    pub fn add(&mut self, category: &str, points: i64) {
        match self.entries.iter_mut().find(|e| e.category == category) {
            Some(entry) => entry.points += points,
            None => self.entries.push(BreakdownEntry {
                category: category.to_string(),
                points,
            }),
        }
    }

    pub fn get(&self, category: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.category == category)
            .map(|e| e.points)
    }

    pub fn entries(&self) -> &[BreakdownEntry] {
        &self.entries
    }

    pub fn total(&self) -> i64 {
        self.entries.iter().map(|e| e.points).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityScore {
    pub entity: String,
    pub raw_score: i64,
    pub normalized_score: f64,
    pub incident_free_days: i64,
    pub incident_count: usize,
    pub breakdown: Breakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricComparison {
    pub metric: String,
    pub value_a: f64,
    pub value_b: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupComparison {
    pub key: String,
    pub value_a: f64,
    pub value_b: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeRanking {
    pub most_improved: Vec<GroupComparison>,
    pub needs_attention: Vec<GroupComparison>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpi {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    pub incident_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendBucket {
    pub month: String,
    pub total: usize,
    pub by_type: Vec<TypeCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupComparison {
    pub against: Period,
    pub metrics: Vec<MetricComparison>,
    pub by_mine: Vec<GroupComparison>,
    pub ranking: ChangeRanking,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollup {
    pub period: Period,
    pub kpis: Vec<Kpi>,
    pub ranking: Vec<EntityScore>,
    pub monthly_trend: Vec<TrendBucket>,
    pub by_type: Vec<TypeCount>,
    pub comparison: Option<RollupComparison>,
    pub undated_incidents: usize,
}

impl Rollup {
    pub fn empty(period: Period) -> Self {
        Rollup {
            period,
            kpis: Vec::new(),
            ranking: Vec::new(),
            monthly_trend: Vec::new(),
            by_type: Vec::new(),
            comparison: None,
            undated_incidents: 0,
        }
    }

    pub fn kpi(&self, name: &str) -> Option<f64> {
        self.kpis.iter().find(|k| k.name == name).map(|k| k.value)
    }
}

/// Parses the date formats the data service is known to emit. Anything
/// else yields `None`.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.naive_local());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(at);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(text)) => parse_datetime(&text),
        Some(Raw::Other(_)) | None => None,
    })
}
