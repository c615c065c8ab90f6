//! Cache drift checker — the operator-facing answer to "can I trust the
//! dashboard numbers?". Read-only: it reports, the rebuild repairs.

use std::str::FromStr;

use rusqlite::{params, Connection};

use super::{cache, EngineError};
use crate::db::repository as repo;
use crate::db::DatabaseError;
use crate::models::DiseaseType;

/// A single drift issue detected by the checker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DriftIssue {
    pub category: String,
    pub severity: String,
    pub description: String,
    pub facility_id: Option<String>,
    pub month: Option<u32>,
}

/// Result of a drift check over one year of cached rows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DriftReport {
    pub year: i32,
    pub cells_checked: i64,
    pub drift_detected: bool,
    pub issues: Vec<DriftIssue>,
}

/// Run a full drift check for one year.
///
/// Detects:
/// - Patient-months violating the "exactly one representative" invariant
/// - Cached rows whose counters break the counting invariants
/// - Cached rows that disagree with a fresh tally from the ledger
/// - Cells with representative events but no cached row
pub fn check_drift(conn: &Connection, year: i32) -> Result<DriftReport, EngineError> {
    let mut issues = Vec::new();

    // 1. Representative invariant on the ledger
    let mut stmt = conn
        .prepare(
            "SELECT patient_id, disease, month, SUM(is_first_of_month) AS reps
             FROM visits WHERE year = ?1
             GROUP BY patient_id, facility_id, disease, month
             HAVING reps <> 1",
        )
        .map_err(DatabaseError::from)?;
    let rows = stmt
        .query_map(params![year], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .map_err(DatabaseError::from)?
        .collect::<Result<Vec<(String, String, u32, i64)>, _>>()
        .map_err(DatabaseError::from)?;
    drop(stmt);

    for (patient_id, disease, month, reps) in rows {
        issues.push(DriftIssue {
            category: "representative_invariant".into(),
            severity: "high".into(),
            description: format!(
                "Patient {patient_id} has {reps} representative event(s) for {disease} {year}-{month:02}"
            ),
            facility_id: None,
            month: Some(month),
        });
    }

    // 2. Cached rows: counting invariants + agreement with a fresh tally
    let cached = repo::rows_for_year(conn, year)?;
    let cells_checked = cached.len() as i64;
    for row in &cached {
        if !row.counts_consistent() {
            issues.push(DriftIssue {
                category: "count_invariant".into(),
                severity: "high".into(),
                description: format!(
                    "Counters out of balance: total={} standard={} non_standard={} male={} female={}",
                    row.total_count,
                    row.standard_count,
                    row.non_standard_count,
                    row.male_count,
                    row.female_count
                ),
                facility_id: Some(row.facility_id.to_string()),
                month: Some(row.month),
            });
        }

        let fresh = cache::tally_cell(conn, &row.facility_id, row.disease, year, row.month)?;
        if *row != fresh {
            issues.push(DriftIssue {
                category: "cell_drift".into(),
                severity: "high".into(),
                description: format!(
                    "Cached row disagrees with ledger: cached total={}/standard={}, fresh total={}/standard={}",
                    row.total_count, row.standard_count, fresh.total_count, fresh.standard_count
                ),
                facility_id: Some(row.facility_id.to_string()),
                month: Some(row.month),
            });
        }
    }

    // 3. Cells with representative events but no cached row
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT v.facility_id, v.disease, v.month
             FROM visits v
             WHERE v.year = ?1 AND v.is_first_of_month = 1
               AND NOT EXISTS (
                   SELECT 1 FROM monthly_statistics ms
                   WHERE ms.facility_id = v.facility_id AND ms.disease = v.disease
                     AND ms.year = v.year AND ms.month = v.month
               )",
        )
        .map_err(DatabaseError::from)?;
    let missing = stmt
        .query_map(params![year], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .map_err(DatabaseError::from)?
        .collect::<Result<Vec<(String, String, u32)>, _>>()
        .map_err(DatabaseError::from)?;
    drop(stmt);

    for (facility_id, disease_str, month) in missing {
        let disease = DiseaseType::from_str(&disease_str)?;
        issues.push(DriftIssue {
            category: "missing_row".into(),
            severity: "medium".into(),
            description: format!("No cached row for counted visits ({disease} {year}-{month:02})"),
            facility_id: Some(facility_id),
            month: Some(month),
        });
    }

    let drift_detected = !issues.is_empty();
    if drift_detected {
        tracing::warn!("Drift check for {year} found {} issue(s)", issues.len());
    }
    Ok(DriftReport {
        year,
        cells_checked,
        drift_detected,
        issues,
    })
}
