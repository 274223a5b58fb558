//! Metadata for a single stored asset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted upload.
///
/// The asset bytes live in the object store under `file_name`; this record is the
/// only link between that object and its owner.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct UploadRecord {
    /// Row id, used only for newest-first ordering.
    pub id: i64,

    /// Credential of the owning account.
    pub api_key: String,

    /// Owner's display name at upload time, kept in sync on rename.
    pub display_name: String,

    /// Object key: `<random-id><original-extension>`.
    pub file_name: String,

    /// Source address of the upload request.
    pub ip: String,

    /// Original extension including the dot, or empty.
    pub file_type: String,

    /// Size in bytes.
    pub file_size: i64,

    pub upload_date: DateTime<Utc>,

    /// Number of times the asset was resolved. Only ever incremented.
    pub views: i64,
}

impl UploadRecord {
    /// Public identifier: the object key without its extension.
    pub fn public_id(&self) -> &str {
        self.file_name
            .strip_suffix(self.file_type.as_str())
            .unwrap_or(&self.file_name)
    }
}

/// Fields supplied when an upload is recorded. `id` and `views` are assigned by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUpload {
    pub api_key: String,
    pub display_name: String,
    pub file_name: String,
    pub ip: String,
    pub file_type: String,
    pub file_size: i64,
    pub upload_date: DateTime<Utc>,
}
