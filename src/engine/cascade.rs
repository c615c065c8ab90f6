//! Visit ingestion and the retroactive recalculation cascade.
//!
//! A newly recorded visit can change the classification of months that were
//! already aggregated: because "standard" means no gap since the first visit
//! of the year, a backfilled early visit can flip every later month. The
//! cascade walks the patient's visited months, repairs stale classification
//! flags, and recomputes exactly the cells whose flags changed.

use chrono::{Datelike, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::{cache, classifier, with_retry, EngineError};
use crate::db::repository as repo;
use crate::db::DatabaseError;
use crate::models::{DiseaseType, VisitEvent};

/// Outcome of one recorded visit.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedVisit {
    pub visit_id: Uuid,
    pub year: i32,
    pub month: u32,
    /// Whether this event became the representative for a month not yet
    /// counted at this facility. Repeat visits at the same facility in an
    /// already-counted month leave the aggregates untouched.
    pub covers_new_month: bool,
    pub is_standard: bool,
    /// Months whose cached rows the cascade had to recompute.
    pub months_recomputed: Vec<u32>,
}

/// Outcome of a completed cascade.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub patient_id: Uuid,
    pub disease: DiseaseType,
    pub year: i32,
    pub months_recomputed: Vec<u32>,
}

/// Record one examination visit and keep the aggregate cache consistent.
///
/// The ledger insert and the cache increment for a newly covered month
/// commit as one atomic unit: if the cache cannot be updated, the visit is
/// not recorded either. Backfilled and out-of-order dates are expected; the
/// cascade afterwards restores every affected month.
pub fn record_visit(
    conn: &Connection,
    patient_id: &Uuid,
    facility_id: &Uuid,
    disease: DiseaseType,
    visited_at: NaiveDateTime,
) -> Result<RecordedVisit, EngineError> {
    let patient = repo::get_patient(conn, patient_id)?.ok_or_else(|| {
        DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: patient_id.to_string(),
        }
    })?;

    let year = visited_at.date().year();
    let month = visited_at.date().month();

    // Classification looks at the patient's months across every facility;
    // representative election is per facility, matching how the rebuild
    // re-elects them.
    let mut months = repo::visit_months(conn, patient_id, disease, year)?;
    months.insert(month);
    let is_standard = classifier::classify(&months, month)?;
    let covers_new_month =
        !repo::has_representative(conn, patient_id, facility_id, disease, year, month)?;

    let event = VisitEvent {
        id: Uuid::new_v4(),
        patient_id: *patient_id,
        facility_id: *facility_id,
        disease,
        year,
        month,
        visited_at,
        sex: patient.sex,
        is_standard,
        is_first_of_month: covers_new_month,
        created_at: chrono::Local::now().naive_local(),
    };

    if !covers_new_month {
        // A representative already exists here, so the distinct-month set
        // is unchanged and neither classification nor any cache row can
        // move.
        repo::insert_visit(conn, &event)?;
        return Ok(RecordedVisit {
            visit_id: event.id,
            year,
            month,
            covers_new_month,
            is_standard,
            months_recomputed: Vec::new(),
        });
    }

    with_retry("visit record", || {
        let tx = conn.unchecked_transaction()?;
        repo::insert_visit(&tx, &event)?;
        cache::apply_first_visit(&tx, facility_id, disease, year, month, patient.sex, is_standard)?;
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
    })?;

    let report = recalculate_patient_year(conn, patient_id, disease, year)?;
    tracing::debug!(
        "Recorded visit for patient {patient_id} ({disease} {year}-{month:02}), \
         cascade recomputed {} month(s)",
        report.months_recomputed.len()
    );

    Ok(RecordedVisit {
        visit_id: event.id,
        year,
        month,
        covers_new_month,
        is_standard,
        months_recomputed: report.months_recomputed,
    })
}

/// Re-classify every month the patient visited in the year and repair the
/// cells whose stored flag disagrees with the fresh classification.
///
/// Each repaired month commits the flag rewrite and the cell recompute in
/// one transaction, so a crash can never leave a counted flag the cache has
/// not seen. There is no cross-month transaction and no mid-way resume: on
/// failure the error names the exact cell, and the caller re-runs the whole
/// cascade (it is idempotent — untouched months compare clean and are
/// skipped).
pub fn recalculate_patient_year(
    conn: &Connection,
    patient_id: &Uuid,
    disease: DiseaseType,
    year: i32,
) -> Result<CascadeReport, EngineError> {
    let months = repo::visit_months(conn, patient_id, disease, year)?;
    let mut report = CascadeReport {
        patient_id: *patient_id,
        disease,
        year,
        months_recomputed: Vec::new(),
    };
    if months.is_empty() {
        return Ok(report);
    }

    for rep in repo::representatives_for_patient_year(conn, patient_id, disease, year)? {
        let expected = classifier::classify(&months, rep.month)?;
        if expected == rep.is_standard {
            continue;
        }

        with_retry("cascade row repair", || {
            let tx = conn.unchecked_transaction()?;
            repo::set_standard_for_patient_month(
                &tx,
                patient_id,
                &rep.facility_id,
                disease,
                year,
                rep.month,
                expected,
            )?;
            cache::recompute_cell(&tx, &rep.facility_id, disease, year, rep.month)?;
            tx.commit()?;
            Ok(())
        })
        .map_err(|(_, source)| EngineError::CascadeFailed {
            patient_id: *patient_id,
            facility_id: rep.facility_id,
            disease,
            year,
            month: rep.month,
            source: Box::new(EngineError::Database(source)),
        })?;

        report.months_recomputed.push(rep.month);
    }

    Ok(report)
}
