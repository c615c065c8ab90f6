//! The statistics engine: standard-patient classification, the monthly
//! aggregate cache, the retroactive recalculation cascade, the full rebuild
//! job, and achievement reporting.
//!
//! Everything here takes facility/disease/year as explicit parameters and a
//! `&Connection`; there is no ambient request context.

pub mod achievement;
pub mod cache;
pub mod cascade;
pub mod classifier;
pub mod consistency;
pub mod rebuild;
pub mod reporting;

pub use cascade::{recalculate_patient_year, record_visit};
pub use classifier::classify;
pub use rebuild::{rebuild_all, reset_year};

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::db::DatabaseError;
use crate::models::DiseaseType;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Cannot classify a patient with no visits in the evaluated year")]
    EmptyVisitMonths,

    #[error("Cannot classify month {month}: the patient has no visit in that month")]
    MonthWithoutVisit { month: u32 },

    #[error(
        "Aggregate cache update failed for facility {facility_id}, {disease} {year}-{month:02} \
         after {attempts} attempt(s): {source}"
    )]
    CacheUpdateFailed {
        facility_id: Uuid,
        disease: DiseaseType,
        year: i32,
        month: u32,
        attempts: u32,
        source: DatabaseError,
    },

    #[error(
        "Recalculation cascade failed for patient {patient_id} at facility {facility_id}, \
         {disease} {year}-{month:02}: {source}"
    )]
    CascadeFailed {
        patient_id: Uuid,
        facility_id: Uuid,
        disease: DiseaseType,
        year: i32,
        month: u32,
        source: Box<EngineError>,
    },
}

/// Retry a contended write a bounded number of times with linear backoff.
/// Only SQLITE_BUSY/SQLITE_LOCKED failures are retried; anything else
/// surfaces immediately. The attempt count rides along with the final error
/// so callers can report it.
pub(crate) fn with_retry<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, DatabaseError>,
) -> Result<T, (u32, DatabaseError)> {
    let mut attempt: u32 = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config::MAX_WRITE_ATTEMPTS && is_busy(&err) => {
                tracing::warn!("{what} hit contention (attempt {attempt}), retrying: {err}");
                std::thread::sleep(Duration::from_millis(
                    config::RETRY_BACKOFF_MS * u64::from(attempt),
                ));
                attempt += 1;
            }
            Err(err) => return Err((attempt, err)),
        }
    }
}

fn is_busy(err: &DatabaseError) -> bool {
    matches!(
        err,
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> DatabaseError {
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy,
                extended_code: rusqlite::ffi::SQLITE_BUSY,
            },
            None,
        ))
    }

    #[test]
    fn retry_succeeds_after_transient_contention() {
        let mut calls = 0;
        let result = with_retry("test op", || {
            calls += 1;
            if calls < 2 {
                Err(busy_error())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry("test op", || {
            calls += 1;
            Err(busy_error())
        });
        let (attempts, _) = result.unwrap_err();
        assert_eq!(attempts, config::MAX_WRITE_ATTEMPTS);
        assert_eq!(calls, config::MAX_WRITE_ATTEMPTS);
    }

    #[test]
    fn non_contention_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry("test op", || {
            calls += 1;
            Err(DatabaseError::ConstraintViolation("bad".into()))
        });
        let (attempts, err) = result.unwrap_err();
        assert_eq!(attempts, 1);
        assert_eq!(calls, 1);
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }
}
