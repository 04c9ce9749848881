use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod analysis;
mod charts;
mod compare;
mod config;
mod db;
mod error;
mod models;
mod profile;
mod ranking;
mod report;
mod stats;
mod structure;

use config::{AnalysisConfig, MissingScorePolicy, DEFAULT_BIN_WIDTH};
use models::{CohortReport, HistoryMap, ScopeInput};

#[derive(Parser)]
#[command(name = "exam-analytics")]
#[command(about = "Cohort exam analytics for Group Scholar", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import exam scores from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Analyse one exam from the database and store the report
    #[command(group(
        ArgGroup::new("scope")
            .args(["grade", "class"])
            .multiple(false)
    ))]
    Analyze {
        #[arg(long)]
        exam: String,
        /// Restrict to these grades (repeatable)
        #[arg(long)]
        grade: Vec<String>,
        /// Restrict to these classes (repeatable)
        #[arg(long)]
        class: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Analyse a scope snapshot from a JSON file, without a database
    AnalyzeFile {
        #[arg(long)]
        input: PathBuf,
        /// JSON map of student id to past exams, oldest first
        #[arg(long)]
        history: Option<PathBuf>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Project the latest stored report of an exam into chart data
    Charts {
        #[arg(long)]
        exam: String,
        #[arg(long, default_value = "charts.json")]
        out: PathBuf,
    },
    /// Compare stored reports of several exams, oldest first
    Compare {
        #[arg(long = "exam", required = true)]
        exams: Vec<String>,
        #[arg(long, default_value = "comparison.json")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, value_enum, default_value_t = MissingScorePolicy::Zero)]
    missing_scores: MissingScorePolicy,
    #[arg(long, default_value_t = DEFAULT_BIN_WIDTH)]
    bin_width: u32,
    #[arg(long, default_value = "report.json")]
    out: PathBuf,
    /// Also write a markdown digest
    #[arg(long)]
    markdown: Option<PathBuf>,
    /// Also write chart data
    #[arg(long)]
    charts: Option<PathBuf>,
}

impl OutputArgs {
    fn config(&self) -> AnalysisConfig {
        AnalysisConfig {
            missing_scores: self.missing_scores,
            bin_width: self.bin_width,
        }
    }

    fn write(&self, report: &CohortReport) -> anyhow::Result<()> {
        write_json(&self.out, report)?;
        println!("Report written to {}.", self.out.display());
        if let Some(path) = &self.markdown {
            std::fs::write(path, report::build_report(report))
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Markdown digest written to {}.", path.display());
        }
        if let Some(path) = &self.charts {
            write_json(path, &charts::project_charts(report))?;
            println!("Chart data written to {}.", path.display());
        }
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("invalid JSON in {}", path.display()))
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn summarize(report: &CohortReport) {
    match &report.error {
        Some(message) => println!("{}: {}", report.group_name, message),
        None => println!(
            "{}: {} students in {} classes analysed.",
            report.group_name,
            report.students().count(),
            report.tables.len()
        ),
    }
}

async fn analyze_exam(
    pool: &PgPool,
    exam_name: &str,
    scope: db::Scope,
    output: &OutputArgs,
) -> anyhow::Result<CohortReport> {
    let exam = db::find_exam(pool, exam_name).await?;
    let input = db::fetch_scope(pool, &exam, &scope).await?;
    let student_ids: Vec<String> = input
        .tables
        .iter()
        .flat_map(|table| table.students.iter().map(|s| s.student_id.clone()))
        .collect();
    let history = db::fetch_history(pool, exam.exam_date, &student_ids).await?;

    let run_id = db::create_run(pool, &exam, &scope).await?;
    match analysis::assemble_report(&input, Some(&history), &output.config()) {
        Ok(report) => {
            db::complete_run(pool, run_id, &report).await?;
            info!(%run_id, exam = exam_name, "report run completed");
            Ok(report)
        }
        Err(err) => {
            error!(%run_id, exam = exam_name, error = %err, "analysis failed");
            db::fail_run(pool, run_id, &err.to_string()).await?;
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Stored {inserted} scores from {}.", csv.display());
        }
        Commands::Analyze {
            exam,
            grade,
            class,
            output,
        } => {
            let scope = if !grade.is_empty() {
                db::Scope::Grades(grade)
            } else if !class.is_empty() {
                db::Scope::Classes(class)
            } else {
                db::Scope::FullExam
            };
            let pool = connect().await?;
            let report = analyze_exam(&pool, &exam, scope, &output).await?;
            summarize(&report);
            output.write(&report)?;
        }
        Commands::AnalyzeFile {
            input,
            history,
            output,
        } => {
            let scope: ScopeInput = read_json(&input)?;
            let history: Option<HistoryMap> = history.as_deref().map(read_json).transpose()?;
            let report = analysis::assemble_report(&scope, history.as_ref(), &output.config())?;
            summarize(&report);
            output.write(&report)?;
        }
        Commands::Charts { exam, out } => {
            let pool = connect().await?;
            let report = db::fetch_latest_report(&pool, &exam)
                .await?
                .with_context(|| format!("no completed report for exam {exam}; run analyze first"))?;
            write_json(&out, &charts::project_charts(&report))?;
            println!("Chart data written to {}.", out.display());
        }
        Commands::Compare { exams, out } => {
            let pool = connect().await?;
            let reports = db::fetch_reports(&pool, &exams).await?;
            let comparison = compare::compare_reports(&reports);
            write_json(&out, &comparison)?;
            println!(
                "Compared {} students across {} exams; written to {}.",
                comparison.students.len(),
                exams.len(),
                out.display()
            );
        }
    }

    Ok(())
}
