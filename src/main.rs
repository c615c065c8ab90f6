use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ptm_stats::config;
use ptm_stats::db;
use ptm_stats::engine::{consistency, rebuild, reporting};
use ptm_stats::models::DiseaseType;

#[derive(Parser)]
#[command(
    name = "ptm-stats",
    version,
    about = "Operational tooling for the chronic-disease visit statistics cache"
)]
struct Cli {
    /// Path to the SQLite database (defaults to ~/ptm-stats/ptm.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recompute every aggregate row from the visit ledger
    Rebuild {
        /// Restrict the rebuild to one year
        #[arg(long)]
        year: Option<i32>,
    },
    /// Clear one year's visits and cache rows, preserving patients
    ResetYear { year: i32 },
    /// Compare cached rows against a fresh ledger tally and report drift
    CheckDrift { year: i32 },
    /// Set a facility's yearly target (the achievement denominator)
    SetTarget {
        facility: Uuid,
        /// "hypertension" or "diabetes"
        disease: String,
        year: i32,
        target: i64,
    },
    /// Print one facility's monthly aggregates and achievement as JSON
    Report {
        facility: Uuid,
        /// "hypertension" or "diabetes"
        disease: String,
        year: i32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(config::default_database_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let conn = db::open_database(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    match cli.command {
        Command::Rebuild { year } => {
            let report = rebuild::rebuild_all(&conn, year)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failures.is_empty() {
                anyhow::bail!("rebuild finished with {} failed cell(s)", report.failures.len());
            }
        }
        Command::ResetYear { year } => {
            let report = rebuild::reset_year(&conn, year)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::CheckDrift { year } => {
            let report = consistency::check_drift(&conn, year)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.drift_detected {
                anyhow::bail!("drift detected in {} issue(s)", report.issues.len());
            }
        }
        Command::SetTarget {
            facility,
            disease,
            year,
            target,
        } => {
            let disease = DiseaseType::from_str(&disease)?;
            db::set_target(&conn, &facility, disease, year, target)?;
            tracing::info!("Target set: {facility} {disease} {year} -> {target}");
        }
        Command::Report {
            facility,
            disease,
            year,
        } => {
            let disease = DiseaseType::from_str(&disease)?;
            let rows = reporting::get_monthly_aggregates(&conn, &facility, disease, year)?;
            let achievement = reporting::get_achievement(&conn, &facility, disease, year)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "facility_id": facility,
                    "disease": disease,
                    "year": year,
                    "months": rows,
                    "achievement": achievement,
                }))?
            );
        }
    }

    Ok(())
}
