//! Repository layer — entity-scoped database operations.
//!
//! Free functions over `&Connection` so that callers can pass either a bare
//! connection or a transaction (rusqlite's `Transaction` derefs to
//! `Connection`); the engine layer owns transaction boundaries.

mod facility;
mod patient;
mod statistics;
mod target;
mod visit;

pub use facility::*;
pub use patient::*;
pub use statistics::*;
pub use target::*;
pub use visit::*;
