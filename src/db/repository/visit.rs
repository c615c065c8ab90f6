use std::collections::BTreeSet;
use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{DiseaseType, RepresentativeVisit, Sex, VisitEvent};

/// Insert a visit event into the ledger.
pub fn insert_visit(conn: &Connection, visit: &VisitEvent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO visits (id, patient_id, facility_id, disease, year, month,
                             visited_at, sex, is_standard, is_first_of_month, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            visit.id.to_string(),
            visit.patient_id.to_string(),
            visit.facility_id.to_string(),
            visit.disease.as_str(),
            visit.year,
            visit.month,
            visit.visited_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            visit.sex.as_str(),
            visit.is_standard,
            visit.is_first_of_month,
            visit.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

/// The distinct months (1–12) in which a patient visited for a disease in a
/// year. Multiple visits in one month count as a single covered month.
pub fn visit_months(
    conn: &Connection,
    patient_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<BTreeSet<u32>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT month FROM visits
         WHERE patient_id = ?1 AND disease = ?2 AND year = ?3",
    )?;
    let rows = stmt.query_map(
        params![patient_id.to_string(), disease.as_str(), year],
        |row| row.get::<_, u32>(0),
    )?;
    rows.collect::<Result<BTreeSet<_>, _>>().map_err(DatabaseError::from)
}

/// Whether the patient already has a counted (representative) event at this
/// facility for the month. Representatives are elected per facility: the
/// same patient seen at two facilities in one month is counted at each.
pub fn has_representative(
    conn: &Connection,
    patient_id: &Uuid,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM visits
         WHERE patient_id = ?1 AND facility_id = ?2 AND disease = ?3
           AND year = ?4 AND month = ?5 AND is_first_of_month = 1",
        params![
            patient_id.to_string(),
            facility_id.to_string(),
            disease.as_str(),
            year,
            month
        ],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// A patient's representative events for a disease-year, ordered by month.
pub fn representatives_for_patient_year(
    conn: &Connection,
    patient_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<Vec<RepresentativeVisit>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, facility_id, month, sex, is_standard
         FROM visits
         WHERE patient_id = ?1 AND disease = ?2 AND year = ?3 AND is_first_of_month = 1
         ORDER BY month",
    )?;
    let rows = stmt.query_map(
        params![patient_id.to_string(), disease.as_str(), year],
        row_to_representative,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// All representative events in one aggregate cell. This is the authoritative
/// input for cache recomputes: each returned event is one counted patient.
pub fn representative_events_for_cell(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
) -> Result<Vec<RepresentativeVisit>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, facility_id, month, sex, is_standard
         FROM visits
         WHERE facility_id = ?1 AND disease = ?2 AND year = ?3 AND month = ?4
           AND is_first_of_month = 1",
    )?;
    let rows = stmt.query_map(
        params![facility_id.to_string(), disease.as_str(), year, month],
        row_to_representative,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Rewrite the stored classification flag for every event of one
/// patient-month (representative and repeats alike, so the ledger stays
/// coherent). Returns the number of updated events.
pub fn set_standard_for_patient_month(
    conn: &Connection,
    patient_id: &Uuid,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
    month: u32,
    standard: bool,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE visits SET is_standard = ?1
         WHERE patient_id = ?2 AND facility_id = ?3 AND disease = ?4
           AND year = ?5 AND month = ?6",
        params![
            standard,
            patient_id.to_string(),
            facility_id.to_string(),
            disease.as_str(),
            year,
            month
        ],
    )?;
    Ok(updated)
}

/// Distinct (facility, disease, year) scopes present in the ledger,
/// optionally filtered to one year. The rebuild job chunks its work by
/// these scopes.
pub fn visit_scopes(
    conn: &Connection,
    year: Option<i32>,
) -> Result<Vec<(Uuid, DiseaseType, i32)>, DatabaseError> {
    let sql = "SELECT DISTINCT facility_id, disease, year FROM visits
               WHERE (?1 IS NULL OR year = ?1)
               ORDER BY facility_id, disease, year";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![year], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i32>(2)?,
        ))
    })?;

    let mut scopes = Vec::new();
    for row in rows {
        let (facility_str, disease_str, yr) = row?;
        let facility_id = Uuid::parse_str(&facility_str).map_err(|_| {
            DatabaseError::ConstraintViolation(format!("bad facility id: {facility_str}"))
        })?;
        let disease = DiseaseType::from_str(&disease_str)?;
        scopes.push((facility_id, disease, yr));
    }
    Ok(scopes)
}

/// Patients with at least one visit in a scope.
pub fn patients_in_scope(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT patient_id FROM visits
         WHERE facility_id = ?1 AND disease = ?2 AND year = ?3",
    )?;
    let rows = stmt.query_map(
        params![facility_id.to_string(), disease.as_str(), year],
        |row| row.get::<_, String>(0),
    )?;

    let mut patients = Vec::new();
    for row in rows {
        let id_str = row?;
        let id = Uuid::parse_str(&id_str).map_err(|_| {
            DatabaseError::ConstraintViolation(format!("bad patient id: {id_str}"))
        })?;
        patients.push(id);
    }
    Ok(patients)
}

/// Re-derive `is_first_of_month` for an entire scope: the earliest event per
/// (patient, month) wins, ties broken by insertion order. Heals flag
/// corruption before the rebuild job tallies cells.
pub fn rederive_representatives(
    conn: &Connection,
    facility_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<usize, DatabaseError> {
    conn.execute(
        "UPDATE visits SET is_first_of_month = 0
         WHERE facility_id = ?1 AND disease = ?2 AND year = ?3",
        params![facility_id.to_string(), disease.as_str(), year],
    )?;
    let flagged = conn.execute(
        "UPDATE visits SET is_first_of_month = 1
         WHERE id IN (
             SELECT id FROM (
                 SELECT id, ROW_NUMBER() OVER (
                     PARTITION BY patient_id, month
                     ORDER BY visited_at, rowid
                 ) AS rank
                 FROM visits
                 WHERE facility_id = ?1 AND disease = ?2 AND year = ?3
             ) WHERE rank = 1
         )",
        params![facility_id.to_string(), disease.as_str(), year],
    )?;
    Ok(flagged)
}

/// Ledger size for one year.
pub fn count_visits_for_year(conn: &Connection, year: i32) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM visits WHERE year = ?1",
        params![year],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Clear one year's ledger ("start new year" reset). Returns the number of
/// deleted events.
pub fn delete_visits_for_year(conn: &Connection, year: i32) -> Result<usize, DatabaseError> {
    let deleted = conn.execute("DELETE FROM visits WHERE year = ?1", params![year])?;
    Ok(deleted)
}

fn row_to_representative(row: &rusqlite::Row) -> Result<RepresentativeVisit, rusqlite::Error> {
    let visit_str: String = row.get(0)?;
    let patient_str: String = row.get(1)?;
    let facility_str: String = row.get(2)?;
    let sex_str: String = row.get(4)?;

    let parse_uuid = |s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    };

    Ok(RepresentativeVisit {
        visit_id: parse_uuid(&visit_str)?,
        patient_id: parse_uuid(&patient_str)?,
        facility_id: parse_uuid(&facility_str)?,
        month: row.get(3)?,
        sex: Sex::from_str(&sex_str).unwrap_or(Sex::Female),
        is_standard: row.get(5)?,
    })
}
