use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DiseaseType, Sex};

/// One examination event in the visit ledger.
///
/// `is_standard` and `is_first_of_month` are derived caches: both can be
/// recomputed from the ledger at any time and are rewritten by the
/// recalculation cascade and the full rebuild. `sex` is a snapshot of the
/// patient's sex at recording time, so aggregate scans never join back to
/// the patients table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitEvent {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub disease: DiseaseType,
    pub year: i32,
    pub month: u32,
    pub visited_at: NaiveDateTime,
    pub sex: Sex,
    pub is_standard: bool,
    pub is_first_of_month: bool,
    pub created_at: NaiveDateTime,
}

/// The single counted event per (patient, facility, disease, year, month),
/// as returned by cell scans. Repeat visits in the same month exist in the
/// ledger but are never counted.
#[derive(Debug, Clone)]
pub struct RepresentativeVisit {
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub month: u32,
    pub sex: Sex,
    pub is_standard: bool,
}
