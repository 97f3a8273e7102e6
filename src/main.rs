//! Noah risk scoring
//!
//! Command-line entry point: load a bundle, score every patient, write reports.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use noah_risk::config::{self, LogConfig};
use noah_risk::fhir;
use noah_risk::report::{self, JsonReport, RiskSummary};
use noah_risk::{RiskCategory, RiskEngine, RiskTable};

#[derive(Parser)]
#[command(name = "noah-risk", about = "Chronic-disease risk scoring from lab observations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Config file to use instead of config/default
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a bundle and write risk_table.json, high_risk_report.json and high_risk_patients.csv
    Score {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also list every patient in the JSON report
        #[arg(long)]
        all: bool,
    },
    /// Score a bundle and print the summary only
    Summary {
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn score_bundle(engine: &RiskEngine, input: &Path, today: NaiveDate) -> Result<RiskTable> {
    let bundle = fhir::load_bundle(input)
        .with_context(|| format!("Failed to load bundle {}", input.display()))?;
    if !bundle.issues.is_empty() {
        warn!(
            issues = bundle.issues.len(),
            dropped = bundle.dropped(),
            "bundle contained malformed records"
        );
    }
    Ok(engine.score(&bundle.patients, &bundle.observations, today))
}

fn print_summary(summary: &RiskSummary) {
    println!("Analyzed risks for {} patients", summary.total_patients);
    println!("\nRisk Summary:");
    for condition in &summary.conditions {
        println!(
            "{} risk ({}): {} patients ({:.1}%)",
            condition.condition, condition.marker, condition.count, condition.percentage
        );
    }
    let categories: Vec<String> = RiskCategory::ALL
        .iter()
        .map(|&category| format!("{}: {}", category, summary.category_count(category)))
        .collect();
    println!("Risk Categories: {}", categories.join(", "));
    if summary.no_data_patients > 0 {
        println!("Patients without any tracked lab data: {}", summary.no_data_patients);
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config_from(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logger
    init_logging(&config.log);

    let engine = config.scoring.engine().context("Invalid scoring configuration")?;
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Score { input, output, all } => {
            let input = input.unwrap_or_else(|| config.input.path.clone());
            let output_dir = output.unwrap_or_else(|| config.output.dir.clone());
            let table = score_bundle(&engine, &input, today)?;

            report::write_json(&output_dir.join("risk_table.json"), &table)?;
            let report = if all {
                JsonReport::with_all_patients(&table, engine.rules(), today)
            } else {
                JsonReport::new(&table, engine.rules(), today)
            };
            report::write_json(&output_dir.join("high_risk_report.json"), &report)?;
            report::write_csv(&output_dir.join("high_risk_patients.csv"), &report.high_risk_patients, engine.rules())?;

            let flagged = &report.high_risk_patients;
            println!(
                "Generated reports for {} high-risk patients out of {} total patients",
                flagged.len(),
                table.len()
            );
            for row in flagged {
                println!("  {} {} [{}] {}", row.patient_id, row.full_name, row.category(), row.reasons_joined());
            }
            print_summary(&report.summary);
            info!(output = %output_dir.display(), "reports written");
        }
        Commands::Summary { input } => {
            let input = input.unwrap_or_else(|| config.input.path.clone());
            let table = score_bundle(&engine, &input, today)?;
            print_summary(&RiskSummary::from_table(&table, engine.rules()));
        }
    }

    Ok(())
}
