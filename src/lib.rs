//! ShareX-compatible file hosting and URL shortening.
//!
//! Files go to an S3-compatible bucket, metadata to SQLite. See [`services`] for the
//! upload and slug pipelines and [`routes::routes::app`] for the HTTP surface.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
