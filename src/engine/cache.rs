//! The monthly aggregate cache over `monthly_statistics`.
//!
//! Two mutation paths that must agree bit-for-bit whenever no writers are
//! active: `increment_on_first_visit` (cheap, per representative event) and
//! `recompute_row` (authoritative, rebuilt from the ledger). Every mutation
//! commits as one row-scoped transaction with bounded retry on contention.

use rusqlite::Connection;
use uuid::Uuid;

use super::{achievement, with_retry, EngineError};
use crate::db::repository as repo;
use crate::db::DatabaseError;
use crate::models::{DiseaseType, MonthlyAggregateRow, Sex};

/// Read one cell; a missing row reads as all-zero.
pub fn get_row(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<MonthlyAggregateRow, EngineError> {
    Ok(repo::get_row(conn, facility_id, disease, year, month)?)
}

/// Fold one representative visit into its cell: +1 total, then either the
/// standard and sex counters or the non-standard counter, then a percentage
/// refresh. Must be called exactly once per (patient, facility, disease,
/// year, month) — the partial unique index on the ledger enforces the
/// "exactly one representative" side of that contract.
pub fn increment_on_first_visit(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
    sex: Sex,
    was_standard: bool,
) -> Result<(), EngineError> {
    with_retry("cache increment", || {
        let tx = conn.unchecked_transaction()?;
        apply_first_visit(&tx, facility_id, disease, year, month, sex, was_standard)?;
        tx.commit()?;
        Ok(())
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

/// Increment + percentage refresh without transaction management. Used by
/// `increment_on_first_visit`, and by `record_visit` which folds this into
/// the same transaction as the ledger insert.
pub(crate) fn apply_first_visit(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
    sex: Sex,
    was_standard: bool,
) -> Result<(), DatabaseError> {
    repo::upsert_increment(conn, facility_id, disease, year, month, sex, was_standard)?;
    let row = repo::get_row(conn, facility_id, disease, year, month)?;
    let target = repo::get_target(conn, facility_id, disease, year)?;
    repo::set_percentage(
        conn,
        facility_id,
        disease,
        year,
        month,
        achievement::percentage(row.standard_count, target),
    )?;
    Ok(())
}

/// Discard the cached cell and rebuild it from the representative events in
/// the ledger. Always correct, more expensive than the increment; used by
/// the cascade and the full rebuild.
pub fn recompute_row(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<MonthlyAggregateRow, EngineError> {
    with_retry("cache recompute", || {
        let tx = conn.unchecked_transaction()?;
        let row = recompute_cell(&tx, facility_id, disease, year, month)?;
        tx.commit()?;
        Ok(row)
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

/// Tally one cell from its representative events. Read-only; the drift
/// checker uses this to compare against cached rows without writing.
pub(crate) fn tally_cell(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<MonthlyAggregateRow, DatabaseError> {
    let reps = repo::representative_events_for_cell(conn, facility_id, disease, year, month)?;
    let mut row = MonthlyAggregateRow::zero(*facility_id, disease, year, month);
    for rep in &reps {
        row.total_count += 1;
        if rep.is_standard {
            row.standard_count += 1;
            match rep.sex {
                Sex::Male => row.male_count += 1,
                Sex::Female => row.female_count += 1,
            }
        } else {
            row.non_standard_count += 1;
        }
    }
    let target = repo::get_target(conn, facility_id, disease, year)?;
    row.standard_percentage = achievement::percentage(row.standard_count, target);
    Ok(row)
}

/// Recompute inside the caller's transaction (the cascade couples this with
/// the classification flag rewrite). An empty cell drops the cached row:
/// absence reads as zero.
pub(crate) fn recompute_cell(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<MonthlyAggregateRow, DatabaseError> {
    let row = tally_cell(conn, facility_id, disease, year, month)?;
    if row.total_count == 0 {
        repo::delete_row(conn, facility_id, disease, year, month)?;
    } else {
        repo::write_row(conn, &row)?;
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::repository::{insert_facility, insert_patient, insert_visit, set_target};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Facility, Patient, VisitEvent};

    fn seed_facility(conn: &Connection) -> Uuid {
        let id = Uuid::new_v4();
        insert_facility(
            conn,
            &Facility {
                id,
                name: "Puskesmas A".into(),
                created_at: chrono::Local::now().naive_local(),
            },
        )
        .unwrap();
        id
    }

    fn seed_patient(conn: &Connection, facility_id: Uuid, sex: Sex) -> Uuid {
        let id = Uuid::new_v4();
        insert_patient(
            conn,
            &Patient {
                id,
                facility_id,
                name: "Patient".into(),
                sex,
                created_at: chrono::Local::now().naive_local(),
            },
        )
        .unwrap();
        id
    }

    fn seed_representative(
        conn: &Connection,
        patient_id: Uuid,
        facility_id: Uuid,
        disease: DiseaseType,
        month: u32,
        sex: Sex,
        is_standard: bool,
    ) {
        let visited_at = NaiveDate::from_ymd_opt(2025, month, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        insert_visit(
            conn,
            &VisitEvent {
                id: Uuid::new_v4(),
                patient_id,
                facility_id,
                disease,
                year: 2025,
                month,
                visited_at,
                sex,
                is_standard,
                is_first_of_month: true,
                created_at: visited_at,
            },
        )
        .unwrap();
    }

    #[test]
    fn increment_and_recompute_agree() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Hypertension;
        set_target(&conn, &facility_id, d, 2025, 20).unwrap();

        // Three patients in month 4: standard male, standard female,
        // non-standard male.
        let inputs = [(Sex::Male, true), (Sex::Female, true), (Sex::Male, false)];
        for (sex, standard) in inputs {
            let patient_id = seed_patient(&conn, facility_id, sex);
            seed_representative(&conn, patient_id, facility_id, d, 4, sex, standard);
            increment_on_first_visit(&conn, &facility_id, d, 2025, 4, sex, standard).unwrap();
        }

        let incremental = get_row(&conn, &facility_id, d, 2025, 4).unwrap();
        let recomputed = recompute_row(&conn, &facility_id, d, 2025, 4).unwrap();
        assert_eq!(incremental, recomputed);
        assert_eq!(incremental.total_count, 3);
        assert_eq!(incremental.standard_count, 2);
        assert_eq!(incremental.male_count, 1);
        assert_eq!(incremental.female_count, 1);
        assert_eq!(incremental.standard_percentage, 10.0);
    }

    #[test]
    fn increment_refreshes_percentage_from_target() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Diabetes;
        set_target(&conn, &facility_id, d, 2025, 8).unwrap();

        increment_on_first_visit(&conn, &facility_id, d, 2025, 2, Sex::Female, true).unwrap();
        let row = get_row(&conn, &facility_id, d, 2025, 2).unwrap();
        assert_eq!(row.standard_percentage, 12.5);
    }

    #[test]
    fn missing_target_reads_as_zero_percent() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Diabetes;

        increment_on_first_visit(&conn, &facility_id, d, 2025, 2, Sex::Female, true).unwrap();
        let row = get_row(&conn, &facility_id, d, 2025, 2).unwrap();
        assert_eq!(row.standard_count, 1);
        assert_eq!(row.standard_percentage, 0.0);
    }

    #[test]
    fn recompute_discards_corrupted_counters() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Hypertension;

        let patient_id = seed_patient(&conn, facility_id, Sex::Female);
        seed_representative(&conn, patient_id, facility_id, d, 6, Sex::Female, true);
        increment_on_first_visit(&conn, &facility_id, d, 2025, 6, Sex::Female, true).unwrap();

        // Corrupt the cached row behind the engine's back.
        conn.execute(
            "UPDATE monthly_statistics SET standard_count = 99, total_count = 99",
            [],
        )
        .unwrap();

        let row = recompute_row(&conn, &facility_id, d, 2025, 6).unwrap();
        assert_eq!(row.total_count, 1);
        assert_eq!(row.standard_count, 1);
        assert!(row.counts_consistent());
    }

    #[test]
    fn recompute_of_empty_cell_drops_the_row() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Hypertension;

        // Phantom row with no backing visits.
        increment_on_first_visit(&conn, &facility_id, d, 2025, 9, Sex::Male, true).unwrap();

        let row = recompute_row(&conn, &facility_id, d, 2025, 9).unwrap();
        assert_eq!(row.total_count, 0);
        let reread = get_row(&conn, &facility_id, d, 2025, 9).unwrap();
        assert_eq!(reread.total_count, 0);
    }
}
