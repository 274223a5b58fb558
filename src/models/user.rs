//! Account records. Accounts are managed outside the upload pipeline; the core only
//! reads them to resolve a credential to an owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An account that owns uploads and short URLs.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct User {
    /// Opaque bearer credential sent by uploader clients in the `key` header.
    pub api_key: String,

    /// Name shown next to uploads. Copied onto every `UploadRecord`.
    pub display_name: String,

    /// Host used to build public references (e.g. `i.example.com`).
    pub domain: String,

    /// Address the account was created from.
    pub ip: String,

    pub created_at: DateTime<Utc>,
}
