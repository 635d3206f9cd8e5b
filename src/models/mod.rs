//! Core data models for the file gateway.
//!
//! `file_record` is the catalog side (one row per logical file), `blob` holds
//! the value types exchanged with blob backends. Catalog rows map to SQLite
//! via `sqlx::FromRow`; everything serializes as JSON via `serde`.

pub mod blob;
pub mod file_record;
