//! Records held by the metadata store.
//!
//! These map one-to-one onto the SQLite tables created by `migrations/0001_init.sql`
//! via `sqlx::FromRow`, and serialize as JSON for the listing endpoints.

pub mod upload;
pub mod url;
pub mod user;
