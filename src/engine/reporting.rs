//! Read-side views over the aggregate cache, consumed by dashboards and
//! exports as plain numeric tables.

use rusqlite::Connection;
use uuid::Uuid;

use super::{achievement, EngineError};
use crate::db::repository as repo;
use crate::models::{DiseaseType, MonthlyAggregateRow};

/// Twelve rows for one facility/disease/year, zero-filled where no cache
/// row exists.
pub fn get_monthly_aggregates(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<[MonthlyAggregateRow; 12], EngineError> {
    let mut rows: [MonthlyAggregateRow; 12] = core::array::from_fn(|i| {
        MonthlyAggregateRow::zero(*facility_id, disease, year, i as u32 + 1)
    });
    for row in repo::rows_for_scope(conn, facility_id, disease, year)? {
        let idx = (row.month - 1) as usize;
        rows[idx] = row;
    }
    Ok(rows)
}

/// Year-to-date achievement for one facility: the standard-patient count of
/// the latest month with any data, against the facility's yearly target.
pub fn get_achievement(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<f64, EngineError> {
    let rows = repo::rows_for_scope(conn, facility_id, disease, year)?;
    let standard = latest_standard_count(&rows);
    let target = repo::get_target(conn, facility_id, disease, year)?;
    Ok(achievement::percentage(standard, target))
}

/// Achievement across every facility (admin view): summed latest
/// standard-patient counts over the summed targets. Same formula as the
/// single-facility view, never a separate one.
pub fn get_admin_achievement(
    conn: &Connection,
    disease: DiseaseType,
    year: i32,
) -> Result<f64, EngineError> {
    let mut standard_sum: i64 = 0;
    for facility_id in repo::facilities_with_rows(conn, disease, year)? {
        let rows = repo::rows_for_scope(conn, &facility_id, disease, year)?;
        standard_sum += latest_standard_count(&rows);
    }
    let target_sum = repo::sum_targets(conn, disease, year)?;
    Ok(achievement::percentage(standard_sum, target_sum))
}

/// Rows arrive ordered by month; the latest month with any counted patient
/// carries the year-to-date standard count.
fn latest_standard_count(rows: &[MonthlyAggregateRow]) -> i64 {
    rows.iter()
        .rev()
        .find(|row| row.total_count > 0)
        .map(|row| row.standard_count)
        .unwrap_or(0)
}
