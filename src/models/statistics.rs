use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DiseaseType;

/// One aggregate cache row, keyed by (facility, disease, year, month).
///
/// Only standard patients are broken out by sex — the reporting contract
/// inherited from the original product rule — so the row invariants are
/// `total_count = standard_count + non_standard_count` and
/// `male_count + female_count = standard_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAggregateRow {
    pub facility_id: Uuid,
    pub disease: DiseaseType,
    pub year: i32,
    pub month: u32,
    pub male_count: i64,
    pub female_count: i64,
    pub total_count: i64,
    pub standard_count: i64,
    pub non_standard_count: i64,
    pub standard_percentage: f64,
}

impl MonthlyAggregateRow {
    /// A zero-valued row. Absence of a cache row is not an error; reads
    /// treat a missing cell as all-zero.
    pub fn zero(facility_id: Uuid, disease: DiseaseType, year: i32, month: u32) -> Self {
        Self {
            facility_id,
            disease,
            year,
            month,
            male_count: 0,
            female_count: 0,
            total_count: 0,
            standard_count: 0,
            non_standard_count: 0,
            standard_percentage: 0.0,
        }
    }

    /// Check the two counting invariants.
    pub fn counts_consistent(&self) -> bool {
        self.total_count == self.standard_count + self.non_standard_count
            && self.male_count + self.female_count == self.standard_count
    }
}
