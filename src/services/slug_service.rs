//! src/services/slug_service.rs
//!
//! SlugAllocator: short URL creation, rename, deletion and resolution.
//!
//! Slug uniqueness is ultimately enforced by the metadata store's unique index. Rename
//! still checks the target first so the common case reports a clean conflict; the
//! index covers the window between that check and the update.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::url::{NewUrl, UrlRecord},
    services::{
        account_service::{owns, resolve_owner},
        identifier::{self, ID_LENGTH},
        metadata_store::{MetadataError, MetadataStore},
    },
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

/// Fresh slugs tried before giving up on a run of collisions.
pub const MAX_SLUG_ATTEMPTS: u32 = 3;

const MAX_SLUG_LEN: usize = 64;
const MAX_URL_LEN: usize = 2048;

pub const MSG_SLUG_NOT_FOUND: &str = "Slug not found";
pub const MSG_SLUG_TAKEN: &str = "Slug already exists, choose another one";

/// A newly allocated short URL.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShortUrl {
    pub slug: String,
    /// Redirect target.
    pub url: String,
    pub full_url: String,
}

#[derive(Clone)]
pub struct SlugAllocator {
    metadata: Arc<dyn MetadataStore>,
}

impl SlugAllocator {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Mint a slug for `target`, regenerating on collision.
    pub async fn allocate(
        &self,
        credential: &str,
        target: &str,
        source_ip: &str,
    ) -> ServiceResult<ShortUrl> {
        let target = validate_target(target)?;
        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;

        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let record = NewUrl {
                api_key: owner.api_key.clone(),
                url: target.clone(),
                slug: identifier::generate(ID_LENGTH),
                created_at: Utc::now(),
                ip: source_ip.to_string(),
            };

            match self.metadata.insert_url(&record).await {
                Ok(stored) => {
                    info!(slug = %stored.slug, attempt, "short url created");
                    return Ok(ShortUrl {
                        full_url: format!("https://{}/u/{}", owner.domain, stored.slug),
                        slug: stored.slug,
                        url: stored.url,
                    });
                }
                Err(MetadataError::Conflict(_)) => {
                    warn!(slug = %record.slug, attempt, "generated slug collided");
                }
                Err(err) => {
                    error!(error = %err, "short url insert failed");
                    return Err(ServiceError::Internal("Failed to create URL".into()));
                }
            }
        }

        error!(attempts = MAX_SLUG_ATTEMPTS, "no free slug found");
        Err(ServiceError::Internal("Failed to create URL".into()))
    }

    /// Move `old_slug` to `new_slug` for its owner.
    pub async fn rename(
        &self,
        credential: &str,
        old_slug: &str,
        new_slug: &str,
    ) -> ServiceResult<UrlRecord> {
        let new_slug = new_slug.trim();
        if new_slug.is_empty() {
            return Err(ServiceError::BadRequest("New slug is required".into()));
        }
        if !is_valid_slug(new_slug) {
            return Err(ServiceError::BadRequest("Invalid slug".into()));
        }

        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;
        let current = self.find(old_slug).await?;
        if !owns(&current.api_key, &owner.api_key) {
            return Err(ServiceError::Forbidden(
                "Unauthorized to change this slug".into(),
            ));
        }

        if self.lookup(new_slug).await?.is_some() {
            return Err(ServiceError::Conflict(MSG_SLUG_TAKEN.into()));
        }

        match self
            .metadata
            .rename_slug(&current.api_key, old_slug, new_slug)
            .await
        {
            Ok(renamed) => {
                info!(old = old_slug, new = new_slug, "slug renamed");
                Ok(renamed)
            }
            Err(MetadataError::Conflict(_)) => {
                // Claimed by a concurrent rename after the check above.
                warn!(new = new_slug, "slug claimed concurrently");
                Err(ServiceError::Conflict(MSG_SLUG_TAKEN.into()))
            }
            Err(MetadataError::NotFound) => {
                Err(ServiceError::NotFound(MSG_SLUG_NOT_FOUND.into()))
            }
            Err(err) => {
                error!(old = old_slug, error = %err, "slug rename failed");
                Err(ServiceError::Internal("Failed to update slug".into()))
            }
        }
    }

    /// Remove a short URL. Only the owner may delete.
    pub async fn delete(&self, credential: &str, slug: &str) -> ServiceResult<UrlRecord> {
        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;
        let current = self.find(slug).await?;
        if !owns(&current.api_key, &owner.api_key) {
            return Err(ServiceError::Forbidden(
                "Unauthorized to delete this URL".into(),
            ));
        }

        match self.metadata.delete_url(&current.api_key, slug).await {
            Ok(Some(removed)) => {
                info!(slug, "short url deleted");
                Ok(removed)
            }
            Ok(None) => Err(ServiceError::NotFound(MSG_SLUG_NOT_FOUND.into())),
            Err(err) => {
                error!(slug, error = %err, "short url delete failed");
                Err(ServiceError::Internal("Failed to delete URL".into()))
            }
        }
    }

    /// Redirect target for `slug`, counting the click.
    pub async fn resolve(&self, slug: &str) -> ServiceResult<String> {
        match self.metadata.increment_clicks(slug).await {
            Ok(Some(record)) => Ok(record.url),
            Ok(None) => Err(ServiceError::NotFound(MSG_SLUG_NOT_FOUND.into())),
            Err(err) => {
                error!(slug, error = %err, "click increment failed");
                Err(ServiceError::Internal("Failed to resolve URL".into()))
            }
        }
    }

    /// URLs owned by `credential`, newest first.
    pub async fn list(&self, credential: &str) -> ServiceResult<Vec<UrlRecord>> {
        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;
        self.metadata.list_urls(&owner.api_key).await.map_err(|err| {
            error!(error = %err, "listing urls failed");
            ServiceError::Internal("Failed to list URLs".into())
        })
    }

    async fn find(&self, slug: &str) -> ServiceResult<UrlRecord> {
        self.lookup(slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(MSG_SLUG_NOT_FOUND.into()))
    }

    async fn lookup(&self, slug: &str) -> ServiceResult<Option<UrlRecord>> {
        self.metadata.find_url(slug).await.map_err(|err| {
            error!(slug, error = %err, "slug lookup failed");
            ServiceError::Internal("Failed to load URL".into())
        })
    }
}

fn validate_target(target: &str) -> ServiceResult<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ServiceError::BadRequest("URL is required".into()));
    }
    if target.len() > MAX_URL_LEN {
        return Err(ServiceError::BadRequest("URL is too long".into()));
    }
    match Url::parse(target) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
            Ok(target.to_string())
        }
        _ => Err(ServiceError::BadRequest("Invalid URL".into())),
    }
}

/// Slugs appear in paths, so only URL-safe characters are accepted.
fn is_valid_slug(slug: &str) -> bool {
    slug.len() <= MAX_SLUG_LEN
        && slug
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
