use std::fmt::Write;

use chrono::NaiveDate;

use crate::days_lost::DaysLostCalculator;
use crate::models::{
    ChangeRanking, EntityScore, GroupComparison, Incident, IncidentStatus, MetricComparison,
    Period, Rollup,
};

pub fn render_scores(scores: &[EntityScore], limit: usize) -> String {
    let mut output = String::new();

    if scores.is_empty() {
        let _ = writeln!(output, "No mines to rank for this window.");
        return output;
    }

    for (rank, score) in scores.iter().take(limit).enumerate() {
        let _ = writeln!(
            output,
            "{}. {} score {:.1} (raw {}, {} incident-free days, {} incidents)",
            rank + 1,
            score.entity,
            score.normalized_score,
            score.raw_score,
            score.incident_free_days,
            score.incident_count
        );
        for entry in score.breakdown.entries() {
            let _ = writeln!(output, "   - {}: {:+}", entry.category, entry.points);
        }
    }

    output
}

pub fn render_comparison(
    period_a: &Period,
    period_b: &Period,
    metrics: &[MetricComparison],
    groups: &[GroupComparison],
    ranking: &ChangeRanking,
) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Period A: {period_a}");
    let _ = writeln!(output, "Period B: {period_b}");
    let _ = writeln!(output);
    write_metric_lines(&mut output, metrics);

    if !groups.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "By group:");
        write_group_lines(&mut output, groups);
        write_ranking(&mut output, ranking);
    }

    output
}

pub fn render_days_lost(
    incidents: &[Incident],
    calculator: &DaysLostCalculator,
    today: NaiveDate,
) -> String {
    let mut output = String::new();

    if incidents.is_empty() {
        let _ = writeln!(output, "No incidents loaded.");
        return output;
    }

    for incident in incidents {
        let occurred = incident
            .occurred_on()
            .map(|date| date.to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        let _ = writeln!(
            output,
            "- {} ({}, {}, {}) on {}: live {} / resolved {}",
            incident.id,
            incident.incident_type,
            incident.mine,
            match incident.status {
                IncidentStatus::Open => "open",
                IncidentStatus::Closed => "closed",
            },
            occurred,
            calculator.estimate(incident, today),
            calculator.resolve(incident, today)
        );
    }

    output
}

pub fn build_report(rollup: &Rollup) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Mine Safety Rollup");
    let _ = writeln!(output, "Generated for {}", rollup.period);
    if rollup.undated_incidents > 0 {
        let _ = writeln!(
            output,
            "{} incidents had no usable occurrence date and were left out.",
            rollup.undated_incidents
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Indicators");
    if rollup.kpis.is_empty() {
        let _ = writeln!(output, "No data for the current selection.");
    } else {
        for kpi in rollup.kpis.iter() {
            let _ = writeln!(output, "- {}: {}", kpi.name, format_value(kpi.value));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Mine Safety Ranking");
    let _ = write!(output, "{}", render_scores(&rollup.ranking, rollup.ranking.len()));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Incidents by Type");
    let recorded: Vec<_> = rollup.by_type.iter().filter(|t| t.count > 0).collect();
    if recorded.is_empty() {
        let _ = writeln!(output, "No incidents recorded for this window.");
    } else {
        for summary in recorded {
            let _ = writeln!(output, "- {}: {}", summary.incident_type, summary.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Trend");
    if rollup.monthly_trend.is_empty() {
        let _ = writeln!(output, "No data for the current selection.");
    } else {
        for bucket in rollup.monthly_trend.iter() {
            let types: Vec<String> = bucket
                .by_type
                .iter()
                .filter(|t| t.count > 0)
                .map(|t| format!("{} {}", t.incident_type, t.count))
                .collect();
            if types.is_empty() {
                let _ = writeln!(output, "- {}: {}", bucket.month, bucket.total);
            } else {
                let _ = writeln!(
                    output,
                    "- {}: {} ({})",
                    bucket.month,
                    bucket.total,
                    types.join(", ")
                );
            }
        }
    }

    if let Some(comparison) = rollup.comparison.as_ref() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Compared with {}", comparison.against);
        write_metric_lines(&mut output, &comparison.metrics);
        write_ranking(&mut output, &comparison.ranking);
    }

    output
}

fn write_metric_lines(output: &mut String, metrics: &[MetricComparison]) {
    if metrics.is_empty() {
        let _ = writeln!(output, "No metrics to compare.");
        return;
    }
    for row in metrics {
        let _ = writeln!(
            output,
            "- {}: {} vs {} ({:+.1}%)",
            row.metric,
            format_value(row.value_a),
            format_value(row.value_b),
            row.percent_change
        );
    }
}

fn write_group_lines(output: &mut String, groups: &[GroupComparison]) {
    for group in groups {
        let _ = writeln!(
            output,
            "- {}: {} vs {} ({:+.1}%)",
            group.key,
            format_value(group.value_a),
            format_value(group.value_b),
            group.percent_change
        );
    }
}

fn write_ranking(output: &mut String, ranking: &ChangeRanking) {
    if ranking.most_improved.is_empty() && ranking.needs_attention.is_empty() {
        return;
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "Most improved:");
    write_group_lines(output, &ranking.most_improved);
    let _ = writeln!(output, "Needs attention:");
    write_group_lines(output, &ranking.needs_attention);
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Breakdown, IncidentType, Kpi, TrendBucket, TypeCount};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_rollup_reports_no_data() {
        let report = build_report(&Rollup::empty(Period::month(2026, 1).unwrap()));
        assert!(report.contains("Generated for 2026-01-01 to 2026-01-31"));
        assert!(report.contains("No data for the current selection."));
        assert!(report.contains("No mines to rank for this window."));
        assert!(!report.contains("## Compared with"));
    }

    #[test]
    fn renders_kpis_ranking_and_trend() {
        let mut breakdown = Breakdown::default();
        breakdown.add("Incident-Free Days", 58);
        breakdown.add("Near Miss", 5);
        let rollup = Rollup {
            period: Period::month(2026, 1).unwrap(),
            kpis: vec![
                Kpi {
                    name: "LTI Count".into(),
                    value: 2.0,
                },
                Kpi {
                    name: "LTIFR".into(),
                    value: 12.5,
                },
            ],
            ranking: vec![EntityScore {
                entity: "North Pit".into(),
                raw_score: 63,
                normalized_score: 100.0,
                incident_free_days: 29,
                incident_count: 1,
                breakdown,
            }],
            monthly_trend: vec![TrendBucket {
                month: "2026-01".into(),
                total: 1,
                by_type: vec![TypeCount {
                    incident_type: "Near Miss".into(),
                    count: 1,
                }],
            }],
            by_type: vec![TypeCount {
                incident_type: "Near Miss".into(),
                count: 1,
            }],
            comparison: None,
            undated_incidents: 0,
        };

        let report = build_report(&rollup);
        assert!(report.contains("- LTI Count: 2"));
        assert!(report.contains("- LTIFR: 12.50"));
        assert!(report.contains("1. North Pit score 100.0 (raw 63, 29 incident-free days, 1 incidents)"));
        assert!(report.contains("   - Near Miss: +5"));
        assert!(report.contains("- 2026-01: 1 (Near Miss 1)"));
    }

    #[test]
    fn comparison_lists_deltas_and_rankings() {
        let group = GroupComparison {
            key: "South Pit".into(),
            value_a: 4.0,
            value_b: 2.0,
            percent_change: 100.0,
        };
        let ranking = ChangeRanking {
            most_improved: vec![group.clone()],
            needs_attention: vec![group.clone()],
        };
        let metrics = vec![MetricComparison {
            metric: "Total Incidents".into(),
            value_a: 4.0,
            value_b: 2.0,
            percent_change: 100.0,
        }];
        let text = render_comparison(
            &Period::month(2026, 2).unwrap(),
            &Period::month(2026, 1).unwrap(),
            &metrics,
            &[group],
            &ranking,
        );
        assert!(text.contains("- Total Incidents: 4 vs 2 (+100.0%)"));
        assert!(text.contains("Needs attention:\n- South Pit: 4 vs 2 (+100.0%)"));
    }

    #[test]
    fn days_lost_lines_show_live_and_resolved() {
        let incident = Incident::new(
            "inc-7",
            IncidentType::LostTimeInjury,
            "North Pit",
            date(2026, 1, 5).and_hms_opt(7, 0, 0).unwrap(),
        )
        .with_person("N. Sithole", crate::models::PersonCategory::Employee)
        .closed(date(2026, 1, 6).and_hms_opt(7, 0, 0).unwrap())
        .with_recorded_days_lost(3);

        let text = render_days_lost(&[incident], &DaysLostCalculator::default(), date(2026, 2, 1));
        assert_eq!(
            text,
            "- inc-7 (Lost Time Injury, North Pit, closed) on 2026-01-05: live 2 / resolved 3\n"
        );
    }
}
