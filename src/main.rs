use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

mod attendance;
mod config;
mod db;
mod error;
mod filter;
mod grouping;
mod logging;
mod models;
mod report;
mod reservation_report;

use crate::attendance::TotalKey;
use crate::config::Config;
use crate::filter::{ReportCondition, ReportFilter, SortOrder};
use crate::grouping::GapRule;
use crate::models::AttendanceStatus;

#[derive(Parser)]
#[command(name = "reservation-reports")]
#[command(about = "Lesson report and attendance tracking for tutoring reservations", long_about = None)]
struct Cli {
    /// TOML config file (falls back to RESERVATION_REPORTS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long, value_enum)]
    condition: ReportCondition,
    #[arg(long)]
    teacher: Option<i64>,
    /// First lesson date to include (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last lesson date to include (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Substring of the student's name
    #[arg(long)]
    keyword: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    page: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    page_size: Option<i64>,
    #[arg(long, value_enum, default_value_t = SortOrder::ByDate)]
    sort: SortOrder,
    /// Overrides the configured session gap rule
    #[arg(long, value_enum)]
    gap_rule: Option<GapRule>,
}

impl FilterArgs {
    fn into_filter(self, config: &Config) -> (ReportFilter, GapRule) {
        let mut filter = ReportFilter::new(self.condition)
            .with_dates(self.from, self.to)
            .with_page(self.page, self.page_size.or(config.default_page_size))
            .with_sort(self.sort);
        if let Some(teacher_id) = self.teacher {
            filter = filter.with_teacher(teacher_id);
        }
        if let Some(keyword) = self.keyword {
            filter = filter.with_keyword(keyword);
        }
        (filter, self.gap_rule.unwrap_or(config.gap_rule))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ListFormat {
    Text,
    Json,
    Markdown,
}

#[derive(Clone, Copy, ValueEnum)]
enum MatrixFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import reservations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List reservations, or the session blocks still missing a report
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build the monthly attendance matrix
    Attendance {
        /// Month to report (YYYY-MM)
        #[arg(long, value_parser = parse_month)]
        month: NaiveDate,
        /// Reservation status counted as attended
        #[arg(long)]
        status: Option<AttendanceStatus>,
        #[arg(long, value_enum)]
        total_key: Option<TotalKey>,
        #[arg(long, value_enum, default_value_t = MatrixFormat::Markdown)]
        format: MatrixFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export report rows as CSV for the batch mailer
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "reservation-report.csv")]
        out: PathBuf,
    },
}

fn parse_month(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")
        .map_err(|err| format!("expected YYYY-MM: {err}"))
}

fn emit(out: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} reservations from {}.", csv.display());
        }
        Commands::List {
            filter,
            format,
            out,
        } => {
            let (filter, rule) = filter.into_filter(&config);
            let records = db::fetch_reservations(&pool, &filter).await?;
            let page = reservation_report::list_reservation_report(&records, &filter, rule)?;
            info!(total = page.total_count, shown = page.records.len(), "listed reservations");

            match format {
                ListFormat::Text => {
                    if page.records.is_empty() {
                        println!("No reservations match this filter.");
                        return Ok(());
                    }
                    println!(
                        "Showing {} of {} reservations:",
                        page.records.len(),
                        page.total_count
                    );
                    for record in &page.records {
                        println!("- {}", report::reservation_line(record));
                    }
                }
                ListFormat::Json => {
                    emit(out.as_deref(), &(serde_json::to_string_pretty(&page)? + "\n"))?;
                }
                ListFormat::Markdown => {
                    emit(
                        out.as_deref(),
                        &report::build_reservation_report(&filter, &page),
                    )?;
                }
            }
        }
        Commands::Attendance {
            month,
            status,
            total_key,
            format,
            out,
        } => {
            let status = status.unwrap_or(config.attended_status);
            let roster = db::fetch_roster(&pool).await?;
            let reservations = db::fetch_month_reservation_slots(&pool, month).await?;
            let schedules = db::fetch_month_schedule_slots(&pool, month).await?;
            let matrix = attendance::build_attendance_matrix(
                month,
                status,
                &roster,
                &reservations,
                &schedules,
                total_key.unwrap_or(config.total_key),
            );

            let content = match format {
                MatrixFormat::Json => serde_json::to_string_pretty(&matrix)? + "\n",
                MatrixFormat::Markdown => report::build_attendance_report(&matrix),
            };
            emit(out.as_deref(), &content)?;
        }
        Commands::Export { filter, out } => {
            let (filter, rule) = filter.into_filter(&config);
            let records = db::fetch_reservations(&pool, &filter).await?;
            let page = reservation_report::list_reservation_report(&records, &filter, rule)?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_reservations_csv(file, &page.records)?;
            println!(
                "Exported {} of {} reservations to {}.",
                page.records.len(),
                page.total_count,
                out.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_year_month() {
        assert_eq!(
            parse_month("2024-02").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
        assert!(parse_month("2024-13").is_err());
        assert!(parse_month("february").is_err());
    }

    #[test]
    fn cli_builds_filter_with_config_defaults() {
        let cli = Cli::try_parse_from([
            "reservation-reports",
            "list",
            "--condition",
            "report",
            "--teacher",
            "3",
            "--keyword",
            "kim",
            "--page",
            "2",
        ])
        .unwrap();
        let config = Config {
            default_page_size: Some(25),
            gap_rule: GapRule::Strict,
            ..Config::default()
        };

        let Commands::List { filter, .. } = cli.command else {
            panic!("expected list command");
        };
        let (filter, rule) = filter.into_filter(&config);
        assert_eq!(filter.report_condition, Some(ReportCondition::Report));
        assert_eq!(filter.teacher_id, Some(3));
        assert_eq!(filter.keyword(), Some("kim"));
        assert_eq!(filter.page_size, Some(25));
        assert_eq!(filter.pagination().unwrap().offset, 25);
        assert_eq!(rule, GapRule::Strict);
    }

    #[test]
    fn cli_passes_negative_paging_through_to_validation() {
        let cli = Cli::try_parse_from([
            "reservation-reports",
            "export",
            "--condition",
            "all",
            "--page-size=-5",
        ])
        .unwrap();
        let Commands::Export { filter, .. } = cli.command else {
            panic!("expected export command");
        };
        let (filter, _) = filter.into_filter(&Config::default());
        assert!(filter.validate().is_err());
    }

    #[test]
    fn attendance_command_parses_status_and_month() {
        let cli = Cli::try_parse_from([
            "reservation-reports",
            "attendance",
            "--month",
            "2024-01",
            "--status",
            "reserved",
            "--total-key",
            "teacher-id",
        ])
        .unwrap();
        let Commands::Attendance {
            month,
            status,
            total_key,
            ..
        } = cli.command
        else {
            panic!("expected attendance command");
        };
        assert_eq!(month, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(status, Some(AttendanceStatus::Reserved));
        assert_eq!(total_key, Some(TotalKey::TeacherId));
    }
}
