use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{DiseaseType, MonthlyAggregateRow, Sex};

/// Read one aggregate cell. Absence is not an error: a missing row reads as
/// all-zero.
pub fn get_row(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<MonthlyAggregateRow, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT facility_id, disease, year, month, male_count, female_count,
                total_count, standard_count, non_standard_count, standard_percentage
         FROM monthly_statistics
         WHERE facility_id = ?1 AND disease = ?2 AND year = ?3 AND month = ?4",
    )?;
    let mut rows = stmt.query_map(
        params![facility_id.to_string(), disease.as_str(), year, month],
        row_to_aggregate,
    )?;
    match rows.next() {
        Some(row) => Ok(row?),
        None => Ok(MonthlyAggregateRow::zero(*facility_id, disease, year, month)),
    }
}

/// Apply one representative visit to a cell: +1 total, and either the
/// standard + sex counters or the non-standard counter. Creates the row on
/// first touch. The caller owns the enclosing transaction and refreshes the
/// percentage afterwards.
pub fn upsert_increment(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
    sex: Sex,
    was_standard: bool,
) -> Result<(), DatabaseError> {
    let male_inc: i64 = i64::from(was_standard && sex == Sex::Male);
    let female_inc: i64 = i64::from(was_standard && sex == Sex::Female);
    let standard_inc: i64 = i64::from(was_standard);
    let non_standard_inc: i64 = 1 - standard_inc;
    let now = chrono::Local::now().naive_local().format("%Y-%m-%d %H:%M:%S").to_string();

    conn.execute(
        "INSERT INTO monthly_statistics
             (facility_id, disease, year, month, male_count, female_count,
              total_count, standard_count, non_standard_count, standard_percentage, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, 0, ?9)
         ON CONFLICT(facility_id, disease, year, month) DO UPDATE SET
             male_count = male_count + excluded.male_count,
             female_count = female_count + excluded.female_count,
             total_count = total_count + 1,
             standard_count = standard_count + excluded.standard_count,
             non_standard_count = non_standard_count + excluded.non_standard_count,
             updated_at = excluded.updated_at",
        params![
            facility_id.to_string(),
            disease.as_str(),
            year,
            month,
            male_inc,
            female_inc,
            standard_inc,
            non_standard_inc,
            now,
        ],
    )?;
    Ok(())
}

/// Refresh the stored achievement percentage for one cell.
pub fn set_percentage(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
    percentage: f64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE monthly_statistics SET standard_percentage = ?1
         WHERE facility_id = ?2 AND disease = ?3 AND year = ?4 AND month = ?5",
        params![percentage, facility_id.to_string(), disease.as_str(), year, month],
    )?;
    Ok(())
}

/// Write a freshly computed row, replacing whatever was cached.
pub fn write_row(conn: &Connection, row: &MonthlyAggregateRow) -> Result<(), DatabaseError> {
    let now = chrono::Local::now().naive_local().format("%Y-%m-%d %H:%M:%S").to_string();
    conn.execute(
        "INSERT OR REPLACE INTO monthly_statistics
             (facility_id, disease, year, month, male_count, female_count,
              total_count, standard_count, non_standard_count, standard_percentage, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.facility_id.to_string(),
            row.disease.as_str(),
            row.year,
            row.month,
            row.male_count,
            row.female_count,
            row.total_count,
            row.standard_count,
            row.non_standard_count,
            row.standard_percentage,
            now,
        ],
    )?;
    Ok(())
}

/// Drop one cell. Returns true when a row existed.
pub fn delete_row(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM monthly_statistics
         WHERE facility_id = ?1 AND disease = ?2 AND year = ?3 AND month = ?4",
        params![facility_id.to_string(), disease.as_str(), year, month],
    )?;
    Ok(deleted > 0)
}

/// All cached rows of one (facility, disease, year), ordered by month.
pub fn rows_for_scope(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<Vec<MonthlyAggregateRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT facility_id, disease, year, month, male_count, female_count,
                total_count, standard_count, non_standard_count, standard_percentage
         FROM monthly_statistics
         WHERE facility_id = ?1 AND disease = ?2 AND year = ?3
         ORDER BY month",
    )?;
    let rows = stmt.query_map(
        params![facility_id.to_string(), disease.as_str(), year],
        row_to_aggregate,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// All cached rows of one year across facilities and diseases (drift checks,
/// admin views).
pub fn rows_for_year(conn: &Connection, year: i32) -> Result<Vec<MonthlyAggregateRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT facility_id, disease, year, month, male_count, female_count,
                total_count, standard_count, non_standard_count, standard_percentage
         FROM monthly_statistics
         WHERE year = ?1
         ORDER BY facility_id, disease, month",
    )?;
    let rows = stmt.query_map(params![year], row_to_aggregate)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Facilities with cached rows for a disease-year (admin achievement view).
pub fn facilities_with_rows(
    conn: &Connection,
    disease: DiseaseType,
    year: i32,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT facility_id FROM monthly_statistics
         WHERE disease = ?1 AND year = ?2
         ORDER BY facility_id",
    )?;
    let rows = stmt.query_map(params![disease.as_str(), year], |row| {
        row.get::<_, String>(0)
    })?;

    let mut facilities = Vec::new();
    for row in rows {
        let id_str = row?;
        let id = Uuid::parse_str(&id_str).map_err(|_| {
            DatabaseError::ConstraintViolation(format!("bad facility id: {id_str}"))
        })?;
        facilities.push(id);
    }
    Ok(facilities)
}

/// Clear one year's cache rows ("start new year" reset). Returns the number
/// of deleted rows.
pub fn delete_rows_for_year(conn: &Connection, year: i32) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM monthly_statistics WHERE year = ?1",
        params![year],
    )?;
    Ok(deleted)
}

fn row_to_aggregate(row: &rusqlite::Row) -> Result<MonthlyAggregateRow, rusqlite::Error> {
    let facility_str: String = row.get(0)?;
    let disease_str: String = row.get(1)?;

    Ok(MonthlyAggregateRow {
        facility_id: Uuid::parse_str(&facility_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        disease: DiseaseType::from_str(&disease_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        year: row.get(2)?,
        month: row.get(3)?,
        male_count: row.get(4)?,
        female_count: row.get(5)?,
        total_count: row.get(6)?,
        standard_count: row.get(7)?,
        non_standard_count: row.get(8)?,
        standard_percentage: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_facility;
    use crate::db::sqlite::open_memory_database;
    use crate::models::Facility;

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

    #[test]
    fn missing_row_reads_as_zero() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let row = get_row(&conn, &facility_id, DiseaseType::Hypertension, 2025, 6).unwrap();
        assert_eq!(row.total_count, 0);
        assert!(row.counts_consistent());
    }

    #[test]
    fn increments_accumulate_per_contract() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Diabetes;

        upsert_increment(&conn, &facility_id, d, 2025, 3, Sex::Male, true).unwrap();
        upsert_increment(&conn, &facility_id, d, 2025, 3, Sex::Female, true).unwrap();
        upsert_increment(&conn, &facility_id, d, 2025, 3, Sex::Female, false).unwrap();

        let row = get_row(&conn, &facility_id, d, 2025, 3).unwrap();
        assert_eq!(row.total_count, 3);
        assert_eq!(row.standard_count, 2);
        assert_eq!(row.non_standard_count, 1);
        assert_eq!(row.male_count, 1);
        // Non-standard patients are never sex-counted
        assert_eq!(row.female_count, 1);
        assert!(row.counts_consistent());
    }

    #[test]
    fn write_row_replaces_existing() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Hypertension;

        upsert_increment(&conn, &facility_id, d, 2025, 1, Sex::Male, false).unwrap();

        let mut fresh = MonthlyAggregateRow::zero(facility_id, d, 2025, 1);
        fresh.total_count = 5;
        fresh.standard_count = 4;
        fresh.non_standard_count = 1;
        fresh.male_count = 3;
        fresh.female_count = 1;
        fresh.standard_percentage = 40.0;
        write_row(&conn, &fresh).unwrap();

        let row = get_row(&conn, &facility_id, d, 2025, 1).unwrap();
        assert_eq!(row, fresh);
    }

    #[test]
    fn scope_listing_and_year_cleanup() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Diabetes;

        upsert_increment(&conn, &facility_id, d, 2025, 1, Sex::Male, true).unwrap();
        upsert_increment(&conn, &facility_id, d, 2025, 2, Sex::Male, true).unwrap();
        upsert_increment(&conn, &facility_id, d, 2024, 12, Sex::Male, true).unwrap();

        assert_eq!(rows_for_scope(&conn, &facility_id, d, 2025).unwrap().len(), 2);
        assert_eq!(rows_for_year(&conn, 2025).unwrap().len(), 2);
        assert_eq!(facilities_with_rows(&conn, d, 2025).unwrap(), vec![facility_id]);

        assert_eq!(delete_rows_for_year(&conn, 2025).unwrap(), 2);
        assert!(rows_for_scope(&conn, &facility_id, d, 2025).unwrap().is_empty());
        assert_eq!(rows_for_year(&conn, 2024).unwrap().len(), 1);
    }

    #[test]
    fn delete_row_reports_presence() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Hypertension;

        assert!(!delete_row(&conn, &facility_id, d, 2025, 5).unwrap());
        upsert_increment(&conn, &facility_id, d, 2025, 5, Sex::Female, true).unwrap();
        assert!(delete_row(&conn, &facility_id, d, 2025, 5).unwrap());
    }
}
