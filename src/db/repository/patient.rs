use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{Patient, Sex};

/// Insert a patient.
pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, facility_id, name, sex, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            patient.id.to_string(),
            patient.facility_id.to_string(),
            patient.name,
            patient.sex.as_str(),
            patient.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

/// Get a patient by ID.
pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, facility_id, name, sex, created_at FROM patients WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![id.to_string()], row_to_patient)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// List a facility's patients, ordered by name.
pub fn list_patients_by_facility(
    conn: &Connection,
    facility_id: &Uuid,
) -> Result<Vec<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, facility_id, name, sex, created_at
         FROM patients
         WHERE facility_id = ?1
         ORDER BY name",
    )?;
    let rows = stmt.query_map(params![facility_id.to_string()], row_to_patient)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Total patient count (reported by year-reset so operators can confirm
/// patients are preserved).
pub fn count_patients(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
    Ok(count)
}

fn row_to_patient(row: &rusqlite::Row) -> Result<Patient, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let facility_str: String = row.get(1)?;
    let sex_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let parse_uuid = |s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    };

    Ok(Patient {
        id: parse_uuid(&id_str)?,
        facility_id: parse_uuid(&facility_str)?,
        name: row.get(2)?,
        sex: Sex::from_str(&sex_str).unwrap_or(Sex::Female),
        created_at: NaiveDateTime::parse_from_str(&created_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
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

    fn make_patient(facility_id: Uuid, name: &str, sex: Sex) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            facility_id,
            name: name.into(),
            sex,
            created_at: chrono::Local::now().naive_local(),
        }
    }

    #[test]
    fn insert_and_retrieve_patient() {
        let conn = open_memory_database().unwrap();
        let facility_id = seed_facility(&conn);
        let patient = make_patient(facility_id, "Budi", Sex::Male);
        insert_patient(&conn, &patient).unwrap();

        let found = get_patient(&conn, &patient.id).unwrap().unwrap();
        assert_eq!(found.name, "Budi");
        assert_eq!(found.sex, Sex::Male);
        assert_eq!(found.facility_id, facility_id);
    }

    #[test]
    fn list_scoped_to_facility() {
        let conn = open_memory_database().unwrap();
        let f1 = seed_facility(&conn);
        let f2 = seed_facility(&conn);
        insert_patient(&conn, &make_patient(f1, "Ani", Sex::Female)).unwrap();
        insert_patient(&conn, &make_patient(f1, "Budi", Sex::Male)).unwrap();
        insert_patient(&conn, &make_patient(f2, "Citra", Sex::Female)).unwrap();

        assert_eq!(list_patients_by_facility(&conn, &f1).unwrap().len(), 2);
        assert_eq!(list_patients_by_facility(&conn, &f2).unwrap().len(), 1);
        assert_eq!(count_patients(&conn).unwrap(), 3);
    }

    #[test]
    fn patient_requires_existing_facility() {
        let conn = open_memory_database().unwrap();
        let orphan = make_patient(Uuid::new_v4(), "Dewi", Sex::Female);
        assert!(insert_patient(&conn, &orphan).is_err());
    }
}
