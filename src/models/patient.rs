use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Sex;

/// A chronic-care patient. Immutable from the engine's perspective except
/// for administrative edits handled elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub facility_id: Uuid,
    pub name: String,
    pub sex: Sex,
    pub created_at: NaiveDateTime,
}
