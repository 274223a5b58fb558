//! Core services: identifier generation, admission control, the two store adapters,
//! and the pipelines built on them.

pub mod account_service;
pub mod identifier;
pub mod metadata_store;
pub mod object_store_client;
pub mod rate_limiter;
pub mod reconciler;
pub mod slug_service;
pub mod upload_service;
