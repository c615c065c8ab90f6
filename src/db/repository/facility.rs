use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::Facility;

/// Insert a facility.
pub fn insert_facility(conn: &Connection, facility: &Facility) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO facilities (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![
            facility.id.to_string(),
            facility.name,
            facility.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

/// Get a facility by ID.
pub fn get_facility(conn: &Connection, id: &Uuid) -> Result<Option<Facility>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM facilities WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id.to_string()], row_to_facility)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// List all facilities, ordered by name.
pub fn list_facilities(conn: &Connection) -> Result<Vec<Facility>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM facilities ORDER BY name")?;
    let rows = stmt.query_map([], row_to_facility)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

fn row_to_facility(row: &rusqlite::Row) -> Result<Facility, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(2)?;
    Ok(Facility {
        id: Uuid::parse_str(&id_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        name: row.get(1)?,
        created_at: NaiveDateTime::parse_from_str(&created_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}
