//! Database module: row models and SQL repositories.
//!
//! - `model`: raw rows as stored, converted into domain entities.
//! - `repo`: SQL-only functions returning entities from `crate::model`.
//!
//! Callers import from `lead_alerts::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use repo::*;
