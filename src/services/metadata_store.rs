//! src/services/metadata_store.rs
//!
//! MetadataStore: SQLite-backed persistence for accounts, domain grants, upload
//! records and short URLs. Uniqueness of object keys and slugs is enforced by the
//! schema; violations surface as [`MetadataError::Conflict`].

use crate::models::{
    upload::{NewUpload, UploadRecord},
    url::{NewUrl, UrlRecord},
    user::User,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::{
    SqlitePool,
    migrate::{MigrateError, Migrator},
    sqlite::SqlitePoolOptions,
};
use std::sync::Arc;
use thiserror::Error;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Domain grant owner that makes a domain available to every account.
pub const PUBLIC_GRANT: &str = "*";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Port for the metadata store.
///
/// Upload lookups take the public identifier (object key without extension). Callers
/// must only pass values accepted by [`crate::services::identifier::is_identifier`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_user(&self, api_key: &str) -> MetadataResult<Option<User>>;

    async fn insert_user(&self, user: &User) -> MetadataResult<()>;

    /// Rename an account and every upload it owns, atomically.
    /// Returns the number of upload records rewritten.
    async fn update_display_name(&self, api_key: &str, display_name: &str)
    -> MetadataResult<u64>;

    async fn grant_domain(&self, domain: &str, api_key: &str) -> MetadataResult<()>;

    /// Domains granted to `api_key` or to everyone.
    async fn eligible_domains(&self, api_key: &str) -> MetadataResult<Vec<String>>;

    async fn insert_upload(&self, upload: &NewUpload) -> MetadataResult<UploadRecord>;

    async fn find_upload(&self, public_id: &str) -> MetadataResult<Option<UploadRecord>>;

    /// Atomically remove and return the upload `public_id` if `api_key` owns it.
    async fn delete_upload(
        &self,
        api_key: &str,
        public_id: &str,
    ) -> MetadataResult<Option<UploadRecord>>;

    async fn increment_views(&self, public_id: &str) -> MetadataResult<Option<UploadRecord>>;

    /// Uploads owned by `api_key`, newest first.
    async fn list_uploads(&self, api_key: &str) -> MetadataResult<Vec<UploadRecord>>;

    /// Every object key referenced by an upload record.
    async fn upload_keys(&self) -> MetadataResult<Vec<String>>;

    async fn insert_url(&self, url: &NewUrl) -> MetadataResult<UrlRecord>;

    async fn find_url(&self, slug: &str) -> MetadataResult<Option<UrlRecord>>;

    /// Move `old_slug` to `new_slug`. `NotFound` if `api_key` does not own `old_slug`,
    /// `Conflict` if `new_slug` is taken.
    async fn rename_slug(
        &self,
        api_key: &str,
        old_slug: &str,
        new_slug: &str,
    ) -> MetadataResult<UrlRecord>;

    async fn delete_url(&self, api_key: &str, slug: &str) -> MetadataResult<Option<UrlRecord>>;

    async fn increment_clicks(&self, slug: &str) -> MetadataResult<Option<UrlRecord>>;

    /// URLs owned by `api_key`, newest first.
    async fn list_urls(&self, api_key: &str) -> MetadataResult<Vec<UrlRecord>>;

    async fn ping(&self) -> MetadataResult<()>;
}

#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// A private in-memory database with the schema applied.
    ///
    /// The pool is pinned to a single connection that is never recycled, since every
    /// new `sqlite::memory:` connection would otherwise see an empty database.
    pub async fn in_memory() -> Result<Self, MigrateError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self::new(Arc::new(pool)))
    }
}

// `public_id` is alphanumeric, so it carries no GLOB metacharacters. GLOB rather than
// LIKE keeps the match case-sensitive.
const UPLOAD_BY_PUBLIC_ID: &str = "(SELECT file_name FROM uploads
      WHERE file_name = ?1 OR file_name GLOB ?1 || '.*'
      ORDER BY id LIMIT 1)";

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find_user(&self, api_key: &str) -> MetadataResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT api_key, display_name, domain, ip, created_at FROM users WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: &User) -> MetadataResult<()> {
        match sqlx::query(
            "INSERT INTO users (api_key, display_name, domain, ip, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.api_key)
        .bind(&user.display_name)
        .bind(&user.domain)
        .bind(&user.ip)
        .bind(user.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(MetadataError::Conflict("users.api_key")),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_display_name(
        &self,
        api_key: &str,
        display_name: &str,
    ) -> MetadataResult<u64> {
        let mut tx = self.db.begin().await?;

        let user = sqlx::query("UPDATE users SET display_name = ? WHERE api_key = ?")
            .bind(display_name)
            .bind(api_key)
            .execute(&mut *tx)
            .await?;
        if user.rows_affected() == 0 {
            return Err(MetadataError::NotFound);
        }

        let uploads = sqlx::query("UPDATE uploads SET display_name = ? WHERE api_key = ?")
            .bind(display_name)
            .bind(api_key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(uploads.rows_affected())
    }

    async fn grant_domain(&self, domain: &str, api_key: &str) -> MetadataResult<()> {
        sqlx::query("INSERT OR IGNORE INTO domain_grants (domain, api_key) VALUES (?, ?)")
            .bind(domain)
            .bind(api_key)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn eligible_domains(&self, api_key: &str) -> MetadataResult<Vec<String>> {
        let domains = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT domain FROM domain_grants
             WHERE api_key = ? OR api_key = ?
             ORDER BY domain",
        )
        .bind(api_key)
        .bind(PUBLIC_GRANT)
        .fetch_all(&*self.db)
        .await?;
        Ok(domains)
    }

    async fn insert_upload(&self, upload: &NewUpload) -> MetadataResult<UploadRecord> {
        let inserted = sqlx::query_as::<_, UploadRecord>(
            "INSERT INTO uploads
                (api_key, display_name, file_name, ip, file_type, file_size, upload_date)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&upload.api_key)
        .bind(&upload.display_name)
        .bind(&upload.file_name)
        .bind(&upload.ip)
        .bind(&upload.file_type)
        .bind(upload.file_size)
        .bind(upload.upload_date)
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => {
                Err(MetadataError::Conflict("uploads.file_name"))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_upload(&self, public_id: &str) -> MetadataResult<Option<UploadRecord>> {
        let record = sqlx::query_as::<_, UploadRecord>(
            "SELECT * FROM uploads
             WHERE file_name = ?1 OR file_name GLOB ?1 || '.*'
             ORDER BY id LIMIT 1",
        )
        .bind(public_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn delete_upload(
        &self,
        api_key: &str,
        public_id: &str,
    ) -> MetadataResult<Option<UploadRecord>> {
        let sql = format!(
            "DELETE FROM uploads WHERE file_name = {UPLOAD_BY_PUBLIC_ID} AND api_key = ?2
             RETURNING *"
        );
        let record = sqlx::query_as::<_, UploadRecord>(&sql)
            .bind(public_id)
            .bind(api_key)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    async fn increment_views(&self, public_id: &str) -> MetadataResult<Option<UploadRecord>> {
        let sql = format!(
            "UPDATE uploads SET views = views + 1 WHERE file_name = {UPLOAD_BY_PUBLIC_ID}
             RETURNING *"
        );
        let record = sqlx::query_as::<_, UploadRecord>(&sql)
            .bind(public_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    async fn list_uploads(&self, api_key: &str) -> MetadataResult<Vec<UploadRecord>> {
        let records = sqlx::query_as::<_, UploadRecord>(
            "SELECT * FROM uploads WHERE api_key = ? ORDER BY id DESC",
        )
        .bind(api_key)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    async fn upload_keys(&self) -> MetadataResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>("SELECT file_name FROM uploads")
            .fetch_all(&*self.db)
            .await?;
        Ok(keys)
    }

    async fn insert_url(&self, url: &NewUrl) -> MetadataResult<UrlRecord> {
        let inserted = sqlx::query_as::<_, UrlRecord>(
            "INSERT INTO urls (api_key, url, slug, created_at, ip)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&url.api_key)
        .bind(&url.url)
        .bind(&url.slug)
        .bind(url.created_at)
        .bind(&url.ip)
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => Err(MetadataError::Conflict("urls.slug")),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_url(&self, slug: &str) -> MetadataResult<Option<UrlRecord>> {
        let record = sqlx::query_as::<_, UrlRecord>("SELECT * FROM urls WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    async fn rename_slug(
        &self,
        api_key: &str,
        old_slug: &str,
        new_slug: &str,
    ) -> MetadataResult<UrlRecord> {
        let renamed = sqlx::query_as::<_, UrlRecord>(
            "UPDATE urls SET slug = ? WHERE slug = ? AND api_key = ? RETURNING *",
        )
        .bind(new_slug)
        .bind(old_slug)
        .bind(api_key)
        .fetch_optional(&*self.db)
        .await;

        match renamed {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(MetadataError::NotFound),
            Err(err) if is_unique_violation(&err) => Err(MetadataError::Conflict("urls.slug")),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_url(&self, api_key: &str, slug: &str) -> MetadataResult<Option<UrlRecord>> {
        let record = sqlx::query_as::<_, UrlRecord>(
            "DELETE FROM urls WHERE slug = ? AND api_key = ? RETURNING *",
        )
        .bind(slug)
        .bind(api_key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn increment_clicks(&self, slug: &str) -> MetadataResult<Option<UrlRecord>> {
        let record = sqlx::query_as::<_, UrlRecord>(
            "UPDATE urls SET clicks = clicks + 1 WHERE slug = ? RETURNING *",
        )
        .bind(slug)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn list_urls(&self, api_key: &str) -> MetadataResult<Vec<UrlRecord>> {
        let records =
            sqlx::query_as::<_, UrlRecord>("SELECT * FROM urls WHERE api_key = ? ORDER BY id DESC")
                .bind(api_key)
                .fetch_all(&*self.db)
                .await?;
        Ok(records)
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&*self.db).await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
