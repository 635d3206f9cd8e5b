//! File gateway: one logical "file" per upload, with metadata in a SQLite
//! catalog and bytes in a blob backend (S3-compatible or local disk).

pub mod blob;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
