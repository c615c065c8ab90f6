use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::DiseaseType;

/// Look up a facility's yearly target. Targets are supplied by an external
/// workflow; a missing target reads as 0 (and yields a 0% achievement).
pub fn get_target(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<i64, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT target_count FROM yearly_targets
         WHERE facility_id = ?1 AND disease = ?2 AND year = ?3",
    )?;
    let mut rows = stmt.query_map(
        params![facility_id.to_string(), disease.as_str(), year],
        |row| row.get::<_, i64>(0),
    )?;
    match rows.next() {
        Some(row) => Ok(row?),
        None => Ok(0),
    }
}

/// Set (or replace) a facility's yearly target. Operational tooling only.
pub fn set_target(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    target_count: i64,
) -> Result<(), DatabaseError> {
    if target_count < 0 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "target_count must be non-negative, got {target_count}"
        )));
    }
    conn.execute(
        "INSERT OR REPLACE INTO yearly_targets (facility_id, disease, year, target_count)
         VALUES (?1, ?2, ?3, ?4)",
        params![facility_id.to_string(), disease.as_str(), year, target_count],
    )?;
    Ok(())
}

/// Summed target across all facilities for a disease-year. The admin
/// achievement view uses this as its denominator, with the same percentage
/// formula as single-facility achievement.
pub fn sum_targets(conn: &Connection, disease: DiseaseType, year: i32) -> Result<i64, DatabaseError> {
    let sum = conn.query_row(
        "SELECT COALESCE(SUM(target_count), 0) FROM yearly_targets
         WHERE disease = ?1 AND year = ?2",
        params![disease.as_str(), year],
        |row| row.get(0),
    )?;
    Ok(sum)
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
    fn missing_target_reads_as_zero() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let target = get_target(&conn, &facility_id, DiseaseType::Diabetes, 2025).unwrap();
        assert_eq!(target, 0);
    }

    #[test]
    fn set_and_replace_target() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let d = DiseaseType::Hypertension;

        set_target(&conn, &facility_id, d, 2025, 120).unwrap();
        assert_eq!(get_target(&conn, &facility_id, d, 2025).unwrap(), 120);

        set_target(&conn, &facility_id, d, 2025, 150).unwrap();
        assert_eq!(get_target(&conn, &facility_id, d, 2025).unwrap(), 150);
    }

    #[test]
    fn negative_target_rejected() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let result = set_target(&conn, &facility_id, DiseaseType::Diabetes, 2025, -1);
        assert!(matches!(result, Err(DatabaseError::ConstraintViolation(_))));
    }

    #[test]
    fn targets_sum_across_facilities() {
        let conn = open_memory_database().unwrap();
        let f1 = seed_facility(&conn);
        let f2 = seed_facility(&conn);
        let d = DiseaseType::Diabetes;

        set_target(&conn, &f1, d, 2025, 100).unwrap();
        set_target(&conn, &f2, d, 2025, 50).unwrap();
        set_target(&conn, &f1, DiseaseType::Hypertension, 2025, 999).unwrap();

        assert_eq!(sum_targets(&conn, d, 2025).unwrap(), 150);
        assert_eq!(sum_targets(&conn, d, 2024).unwrap(), 0);
    }
}
