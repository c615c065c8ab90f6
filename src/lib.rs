//! Chronic-disease visit statistics engine for health facilities.
//!
//! Tracks hypertension/diabetes examination visits per facility in a SQLite
//! ledger, classifies each patient's monthly follow-up compliance ("standard"
//! means an unbroken monthly visit history since the first visit of the
//! year), and maintains a read-fast per facility/disease/year/month aggregate
//! cache that stays consistent under backfilled and corrected visits.

pub mod config;
pub mod db;
pub mod engine;
pub mod models;
