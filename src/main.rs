use std::path::PathBuf;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mine_incident_rollup::config::RollupConfig;
use mine_incident_rollup::models::{Entity, Incident, IncidentType, Period, ReferenceData};
use mine_incident_rollup::period::{self, GroupBy, MetricDef, PeriodPreset};
use mine_incident_rollup::rollup::{self, RollupFilter, RollupOptions};
use mine_incident_rollup::{import, report, scoring};

#[derive(Parser)]
#[command(name = "mine-incident-rollup")]
#[command(about = "Safety scores and period rollups for mine incident snapshots", long_about = None)]
struct Cli {
    /// TOML file with reference data and scoring overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Evaluate as of this date instead of the local date
    #[arg(long, global = true)]
    today: Option<NaiveDate>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show live and resolved days lost per incident
    DaysLost {
        #[arg(long)]
        incidents: PathBuf,
    },
    /// Rank mines by safety score
    #[command(group(
        ArgGroup::new("window")
            .args(["month", "from"])
            .required(true)
            .multiple(false)
    ))]
    Score {
        #[arg(long)]
        incidents: PathBuf,
        /// Calendar month as YYYY-MM
        #[arg(long)]
        month: Option<String>,
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Compare KPIs between two periods
    Compare {
        #[arg(long)]
        incidents: PathBuf,
        #[arg(long, requires = "a_to", conflicts_with = "a_preset")]
        a_from: Option<NaiveDate>,
        #[arg(long)]
        a_to: Option<NaiveDate>,
        #[arg(long)]
        a_preset: Option<PeriodPreset>,
        #[arg(long, requires = "b_to", conflicts_with = "b_preset")]
        b_from: Option<NaiveDate>,
        #[arg(long)]
        b_to: Option<NaiveDate>,
        #[arg(long)]
        b_preset: Option<PeriodPreset>,
        /// Also compare per mine, section or type
        #[arg(long)]
        by: Option<GroupBy>,
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
    /// Generate the dashboard rollup
    Report {
        #[arg(long)]
        incidents: PathBuf,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, requires = "compare_to")]
        compare_from: Option<NaiveDate>,
        #[arg(long, requires = "compare_from")]
        compare_to: Option<NaiveDate>,
        /// Compare with the equally long period just before
        #[arg(long, conflicts_with = "compare_from")]
        compare_previous: bool,
        #[arg(long = "mine")]
        mines: Vec<String>,
        #[arg(long = "type")]
        types: Vec<String>,
        /// Exposure override for LTIFR
        #[arg(long)]
        man_days: Option<f64>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mine_incident_rollup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => Some(
            RollupConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
        ),
        None => None,
    };
    let today = cli.today.unwrap_or_else(|| Local::now().date_naive());
    let calculator = config
        .as_ref()
        .map(RollupConfig::calculator)
        .unwrap_or_default();
    let rules = config
        .as_ref()
        .map(RollupConfig::scoring_rules)
        .unwrap_or_default();

    match cli.command {
        Commands::DaysLost { incidents } => {
            let incidents = load(&incidents)?;
            print!("{}", report::render_days_lost(&incidents, &calculator, today));
        }
        Commands::Score {
            incidents,
            month,
            from,
            to,
            limit,
        } => {
            let incidents = load(&incidents)?;
            let reference = reference_data(config.as_ref(), &incidents);
            let entities: Vec<Entity> = reference.active_entities().into_iter().cloned().collect();

            let (label, scores) = match (month, from, to) {
                (Some(month), _, _) => {
                    let (year, month_number) = parse_month(&month)?;
                    (
                        month,
                        scoring::score_month(&incidents, &entities, year, month_number, &rules),
                    )
                }
                (None, Some(from), Some(to)) => {
                    let window = Period::new(from, to);
                    (
                        window.to_string(),
                        scoring::score_all(&incidents, &entities, &window, &rules),
                    )
                }
                _ => anyhow::bail!("score needs --month or --from/--to"),
            };

            println!("Mine safety ranking for {label}:");
            print!("{}", report::render_scores(&scores, limit));
        }
        Commands::Compare {
            incidents,
            a_from,
            a_to,
            a_preset,
            b_from,
            b_to,
            b_preset,
            by,
            top,
        } => {
            let incidents = load(&incidents)?;
            let reference = reference_data(config.as_ref(), &incidents);
            let period_a = resolve_period("a", a_from, a_to, a_preset, today)?;
            let period_b = resolve_period("b", b_from, b_to, b_preset, today)?;

            let metrics = period::compare(
                &incidents,
                &period_a,
                &period_b,
                &MetricDef::standard(calculator, today),
            );
            let groups = match by {
                Some(group_by) => {
                    let categories: Option<Vec<String>> = match group_by {
                        GroupBy::Mine => Some(
                            reference
                                .active_entities()
                                .iter()
                                .map(|entity| entity.name.clone())
                                .collect(),
                        ),
                        GroupBy::Section => Some(
                            reference
                                .active_sections()
                                .into_iter()
                                .map(String::from)
                                .collect(),
                        ),
                        GroupBy::IncidentType => None,
                    };
                    period::compare_grouped(
                        &incidents,
                        &period_a,
                        &period_b,
                        &MetricDef::total_incidents(),
                        group_by,
                        categories.as_deref(),
                    )
                }
                None => Vec::new(),
            };
            let ranking = period::rank_changes(&groups, top);
            print!(
                "{}",
                report::render_comparison(&period_a, &period_b, &metrics, &groups, &ranking)
            );
        }
        Commands::Report {
            incidents,
            from,
            to,
            compare_from,
            compare_to,
            compare_previous,
            mines,
            types,
            man_days,
            out,
            format,
        } => {
            let incidents = load(&incidents)?;
            let reference = reference_data(config.as_ref(), &incidents);

            let window = Period::new(from, to);
            let mut filter = RollupFilter::all_active(window, &reference);
            if !mines.is_empty() {
                filter.mines = mines;
            }
            if !types.is_empty() {
                filter.incident_types = types
                    .iter()
                    .map(|name| IncidentType::from(name.as_str()))
                    .collect();
            }
            filter.man_days = man_days;
            filter.compare_to = match (compare_from, compare_to) {
                (Some(start), Some(end)) => Some(Period::new(start, end)),
                _ if compare_previous => Some(window.preceding()),
                _ => None,
            };

            let options = RollupOptions {
                today,
                calculator,
                rules,
            };
            let rollup = rollup::build_rollup(&incidents, &reference, &filter, &options);
            let rendered = match format {
                OutputFormat::Markdown => report::build_report(&rollup),
                OutputFormat::Json => serde_json::to_string_pretty(&rollup)?,
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
    }

    Ok(())
}

fn load(path: &std::path::Path) -> anyhow::Result<Vec<Incident>> {
    import::load_incidents(path)
        .with_context(|| format!("failed to load incidents from {}", path.display()))
}

/// Configured reference data, or the mines and types seen in the snapshot
/// when no configuration file was given.
fn reference_data(config: Option<&RollupConfig>, incidents: &[Incident]) -> ReferenceData {
    match config {
        Some(config) => config.reference.clone(),
        None => ReferenceData::from_incidents(incidents),
    }
}

fn parse_month(value: &str) -> anyhow::Result<(i32, u32)> {
    let (year, month) = value
        .split_once('-')
        .with_context(|| format!("month '{value}' must look like YYYY-MM"))?;
    let year: i32 = year
        .parse()
        .with_context(|| format!("invalid year in '{value}'"))?;
    let month: u32 = month
        .parse()
        .with_context(|| format!("invalid month in '{value}'"))?;
    if !(1..=12).contains(&month) {
        anyhow::bail!("month in '{value}' must be between 01 and 12");
    }
    Ok((year, month))
}

fn resolve_period(
    label: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    preset: Option<PeriodPreset>,
    today: NaiveDate,
) -> anyhow::Result<Period> {
    match (from, to, preset) {
        (Some(from), Some(to), None) => Ok(Period::new(from, to)),
        (None, None, Some(preset)) => Ok(preset.resolve(today)),
        _ => anyhow::bail!(
            "period {label} needs --{label}-from and --{label}-to, or --{label}-preset"
        ),
    }
}
