//! Full cache rebuild and year reset.
//!
//! The rebuild recomputes every aggregate row in scope straight from the
//! ledger, ignoring cached state: representative election and
//! classification flags are re-derived first, then each cell is tallied and
//! written in its own transaction. It never uses the increment path, so
//! re-running it cannot double count. Failed cells are collected and
//! reported instead of aborting the job.

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::{cache, classifier, with_retry, EngineError};
use crate::db::repository as repo;
use crate::models::DiseaseType;

/// One cell (or scope-level flag pass) the rebuild could not complete.
/// `month` is absent for scope-level failures.
#[derive(Debug, Clone, Serialize)]
pub struct CellFailure {
    pub facility_id: Uuid,
    pub disease: DiseaseType,
    pub year: i32,
    pub month: Option<u32>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub cells_processed: u64,
    pub rows_written: u64,
    pub rows_cleared: u64,
    pub failures: Vec<CellFailure>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub year: i32,
    pub cleared_visits: usize,
    pub cleared_rows: usize,
    pub preserved_patients: i64,
}

enum CellOutcome {
    Written,
    Cleared,
    Empty,
}

/// Recompute every aggregate row backed by the ledger, optionally limited
/// to one year. Work is chunked per (facility, disease, year) scope; each
/// chunk is self-contained, so an interrupted run leaves completed scopes
/// fully consistent and can simply be re-run.
pub fn rebuild_all(conn: &Connection, year: Option<i32>) -> Result<RebuildReport, EngineError> {
    let started = std::time::Instant::now();
    let scopes = repo::visit_scopes(conn, year)?;
    tracing::info!(
        "Rebuilding aggregate cache: {} scope(s){}",
        scopes.len(),
        year.map(|y| format!(" for year {y}")).unwrap_or_default()
    );

    let mut report = RebuildReport::default();
    for (facility_id, disease, yr) in scopes {
        if let Err(err) = prepare_scope_flags(conn, &facility_id, disease, yr) {
            // Tallying cells against stale flags would cache wrong counts;
            // skip the whole scope and let the operator re-run it.
            report.failures.push(CellFailure {
                facility_id,
                disease,
                year: yr,
                month: None,
                reason: err.to_string(),
            });
            continue;
        }

        for month in 1..=12u32 {
            report.cells_processed += 1;
            match rebuild_cell(conn, &facility_id, disease, yr, month) {
                Ok(CellOutcome::Written) => report.rows_written += 1,
                Ok(CellOutcome::Cleared) => report.rows_cleared += 1,
                Ok(CellOutcome::Empty) => {}
                Err(err) => report.failures.push(CellFailure {
                    facility_id,
                    disease,
                    year: yr,
                    month: Some(month),
                    reason: err.to_string(),
                }),
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    if report.failures.is_empty() {
        tracing::info!(
            "Rebuild finished: {} cell(s), {} row(s) written in {}ms",
            report.cells_processed,
            report.rows_written,
            report.duration_ms
        );
    } else {
        tracing::warn!(
            "Rebuild finished with {} failure(s); re-run the affected scopes",
            report.failures.len()
        );
    }
    Ok(report)
}

/// Re-derive both derived flags for one scope from the raw ledger:
/// representative election first, then per-patient classification.
fn prepare_scope_flags(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<(), EngineError> {
    with_retry("rebuild representative pass", || {
        let tx = conn.unchecked_transaction()?;
        repo::rederive_representatives(&tx, facility_id, disease, year)?;
        tx.commit()?;
        Ok(())
    })
    .map_err(|(_, source)| EngineError::Database(source))?;

    for patient_id in repo::patients_in_scope(conn, facility_id, disease, year)? {
        let months = repo::visit_months(conn, &patient_id, disease, year)?;
        let flags = months
            .iter()
            .map(|&month| classifier::classify(&months, month).map(|s| (month, s)))
            .collect::<Result<Vec<_>, _>>()?;

        with_retry("rebuild classification pass", || {
            let tx = conn.unchecked_transaction()?;
            for &(month, standard) in &flags {
                repo::set_standard_for_patient_month(
                    &tx,
                    &patient_id,
                    facility_id,
                    disease,
                    year,
                    month,
                    standard,
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .map_err(|(_, source)| EngineError::Database(source))?;
    }
    Ok(())
}

fn rebuild_cell(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<CellOutcome, EngineError> {
    with_retry("rebuild cell", || {
        let tx = conn.unchecked_transaction()?;
        let row = cache::tally_cell(&tx, facility_id, disease, year, month)?;
        let outcome = if row.total_count == 0 {
            if repo::delete_row(&tx, facility_id, disease, year, month)? {
                CellOutcome::Cleared
            } else {
                CellOutcome::Empty
            }
        } else {
            repo::write_row(&tx, &row)?;
            CellOutcome::Written
        };
        tx.commit()?;
        Ok(outcome)
    })
    .map_err(|(attempts, source)| EngineError::CacheUpdateFailed {
        facility_id: *facility_id,
        disease,
        year,
        month,
        attempts,
        source,
    })
}

/// "Start new year" reset: clear one year's visit ledger and cache rows in
/// a single transaction. Patients are preserved and reported so operators
/// can confirm nothing else was touched.
pub fn reset_year(conn: &Connection, year: i32) -> Result<ResetReport, EngineError> {
    let tx = conn.unchecked_transaction().map_err(crate::db::DatabaseError::from)?;
    let cleared_visits = repo::delete_visits_for_year(&tx, year)?;
    let cleared_rows = repo::delete_rows_for_year(&tx, year)?;
    let preserved_patients = repo::count_patients(&tx)?;
    tx.commit().map_err(crate::db::DatabaseError::from)?;

    tracing::info!(
        "Reset year {year}: cleared {cleared_visits} visit(s) and {cleared_rows} cache row(s)"
    );
    Ok(ResetReport {
        year,
        cleared_visits,
        cleared_rows,
        preserved_patients,
    })
}
