//! Account lookups shared by the upload and URL pipelines, plus the few account
//! operations the API exposes (display name, eligible domains, bootstrap).

use crate::{
    errors::{ServiceError, ServiceResult},
    models::user::User,
    services::{
        identifier::{self, CREDENTIAL_LENGTH},
        metadata_store::{MetadataError, MetadataStore},
    },
};
use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info};

pub const MSG_INVALID_KEY: &str = "Invalid key";

const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Resolve a bearer credential to its account.
pub async fn resolve_owner(metadata: &dyn MetadataStore, credential: &str) -> ServiceResult<User> {
    match metadata.find_user(credential).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ServiceError::Unauthorized(MSG_INVALID_KEY.into())),
        Err(err) => {
            error!(error = %err, "credential lookup failed");
            Err(ServiceError::Internal("Failed to verify key".into()))
        }
    }
}

/// Owner comparison that does not leak the matching prefix length through timing.
pub fn owns(owner: &str, credential: &str) -> bool {
    owner.as_bytes().ct_eq(credential.as_bytes()).into()
}

#[derive(Clone)]
pub struct AccountService {
    metadata: Arc<dyn MetadataStore>,
}

impl AccountService {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Create an account with a freshly minted credential and grant it `domain`.
    pub async fn create_account(
        &self,
        display_name: &str,
        domain: &str,
        ip: &str,
    ) -> ServiceResult<User> {
        let display_name = validate_display_name(display_name)?;
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(ServiceError::BadRequest("Domain is required".into()));
        }

        let user = User {
            api_key: identifier::generate(CREDENTIAL_LENGTH),
            display_name: display_name.to_string(),
            domain: domain.to_string(),
            ip: ip.to_string(),
            created_at: Utc::now(),
        };

        self.metadata.insert_user(&user).await.map_err(|err| {
            error!(error = %err, "account insert failed");
            ServiceError::Internal("Failed to create account".into())
        })?;
        self.metadata
            .grant_domain(&user.domain, &user.api_key)
            .await
            .map_err(|err| {
                error!(error = %err, domain = %user.domain, "domain grant failed");
                ServiceError::Internal("Failed to create account".into())
            })?;

        info!(display_name = %user.display_name, domain = %user.domain, "account created");
        Ok(user)
    }

    /// Rename the caller and every upload they own.
    pub async fn update_display_name(
        &self,
        credential: &str,
        display_name: &str,
    ) -> ServiceResult<u64> {
        let display_name = validate_display_name(display_name)?;
        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;

        match self
            .metadata
            .update_display_name(&owner.api_key, display_name)
            .await
        {
            Ok(updated) => {
                info!(uploads = updated, "display name updated");
                Ok(updated)
            }
            Err(MetadataError::NotFound) => Err(ServiceError::Unauthorized(MSG_INVALID_KEY.into())),
            Err(err) => {
                error!(error = %err, "display name update failed");
                Err(ServiceError::Internal("Failed to update display name".into()))
            }
        }
    }

    /// Domains the caller may use: their own grants plus public ones.
    pub async fn eligible_domains(&self, credential: &str) -> ServiceResult<Vec<String>> {
        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;
        self.metadata
            .eligible_domains(&owner.api_key)
            .await
            .map_err(|err| {
                error!(error = %err, "domain lookup failed");
                ServiceError::Internal("Failed to load domains".into())
            })
    }
}

fn validate_display_name(name: &str) -> ServiceResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::BadRequest("Display name is required".into()));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN || name.chars().any(char::is_control) {
        return Err(ServiceError::BadRequest("Invalid display name".into()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata_store::{PUBLIC_GRANT, SqliteMetadataStore};

    async fn service() -> (AccountService, Arc<SqliteMetadataStore>) {
        let metadata = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
        (AccountService::new(metadata.clone()), metadata)
    }

    #[tokio::test]
    async fn create_account_mints_credential_and_grant() {
        let (accounts, metadata) = service().await;
        let user = accounts
            .create_account("  alice ", "i.example.com", "127.0.0.1")
            .await
            .unwrap();

        assert_eq!(user.api_key.len(), CREDENTIAL_LENGTH);
        assert_eq!(user.display_name, "alice");
        assert_eq!(
            resolve_owner(metadata.as_ref(), &user.api_key)
                .await
                .unwrap(),
            user
        );
        assert_eq!(
            accounts.eligible_domains(&user.api_key).await.unwrap(),
            ["i.example.com"]
        );
    }

    #[tokio::test]
    async fn unknown_credential_is_unauthorized() {
        let (accounts, metadata) = service().await;
        assert_eq!(
            resolve_owner(metadata.as_ref(), "nope").await,
            Err(ServiceError::Unauthorized(MSG_INVALID_KEY.into()))
        );
        assert!(matches!(
            accounts.update_display_name("nope", "x").await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn display_name_is_validated() {
        let (accounts, _) = service().await;
        let user = accounts
            .create_account("bob", "b.example", "::1")
            .await
            .unwrap();

        assert!(matches!(
            accounts.update_display_name(&user.api_key, "   ").await,
            Err(ServiceError::BadRequest(_))
        ));
        assert!(matches!(
            accounts
                .update_display_name(&user.api_key, &"x".repeat(65))
                .await,
            Err(ServiceError::BadRequest(_))
        ));
        assert_eq!(
            accounts
                .update_display_name(&user.api_key, "robert")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn public_domains_are_eligible() {
        let (accounts, metadata) = service().await;
        metadata
            .grant_domain("shared.example", PUBLIC_GRANT)
            .await
            .unwrap();
        let user = accounts
            .create_account("carol", "c.example", "::1")
            .await
            .unwrap();

        assert_eq!(
            accounts.eligible_domains(&user.api_key).await.unwrap(),
            ["c.example", "shared.example"]
        );
    }
}
