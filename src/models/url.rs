//! Short URL records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A shortened URL. `slug` is unique across all live records.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct UrlRecord {
    pub id: i64,
    pub api_key: String,
    /// Redirect target.
    pub url: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub ip: String,
    pub clicks: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewUrl {
    pub api_key: String,
    pub url: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub ip: String,
}
