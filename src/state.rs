use std::sync::Arc;

use crate::services::{
    account_service::AccountService,
    metadata_store::MetadataStore,
    object_store_client::{ObjectStoreClient, PollPolicy},
    rate_limiter::RateLimiter,
    slug_service::SlugAllocator,
    upload_service::UploadOrchestrator,
};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadOrchestrator,
    pub slugs: SlugAllocator,
    pub accounts: AccountService,
    /// Kept for readiness probes; request paths go through the services above.
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStoreClient>,
    /// Upload admission, applied as middleware on the upload route only.
    pub rate_limiter: RateLimiter,
    /// Base URL objects are publicly readable from, if any.
    pub public_base_url: Option<String>,
}

impl AppState {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStoreClient>,
        verify: PollPolicy,
        rate_limiter: RateLimiter,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            uploads: UploadOrchestrator::new(metadata.clone(), objects.clone(), verify),
            slugs: SlugAllocator::new(metadata.clone()),
            accounts: AccountService::new(metadata.clone()),
            metadata,
            objects,
            rate_limiter,
            public_base_url,
        }
    }
}

