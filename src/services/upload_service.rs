//! src/services/upload_service.rs
//!
//! UploadOrchestrator: the upload and deletion pipelines spanning the object store
//! and the metadata store.
//!
//! Upload: resolve owner, allocate key, `put`, verify visibility, persist the record.
//! Deletion: resolve owner, look up, check ownership, remove the record, delete the
//! object, wait for it to disappear. Neither pipeline rolls back; a partial failure is
//! logged with the orphaned key and reported to the caller.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::upload::{NewUpload, UploadRecord},
    services::{
        account_service::{owns, resolve_owner},
        identifier::{self, ID_LENGTH},
        metadata_store::MetadataStore,
        object_store_client::{ObjectStoreClient, PollPolicy, verify_presence, wait_until_absent},
    },
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Longest extension (without the dot) carried over from the original filename.
const MAX_EXTENSION_LEN: usize = 16;

pub const MSG_UPLOAD_NOT_FOUND: &str = "Upload not found";

/// An inbound upload, already read off the wire.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub credential: String,
    pub filename: String,
    pub content: Bytes,
    pub source_ip: String,
}

/// Where a stored asset can be fetched from.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicReference {
    /// Public identifier (object key without extension).
    pub id: String,
    /// Object key in the store.
    pub key: String,
    /// Path relative to the owner's domain.
    pub url: String,
    pub full_url: String,
}

impl PublicReference {
    fn new(domain: &str, key: String, id: String) -> Self {
        Self {
            url: format!("i/{id}"),
            full_url: format!("https://{domain}/i/{id}"),
            id,
            key,
        }
    }
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStoreClient>,
    verify: PollPolicy,
}

impl UploadOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStoreClient>,
        verify: PollPolicy,
    ) -> Self {
        Self {
            metadata,
            objects,
            verify,
        }
    }

    /// Store an asset and record it.
    ///
    /// Everything from the first byte sent to the object store onwards runs on a
    /// detached task, so dropping this future cannot leave the write half-recorded.
    pub async fn upload(&self, request: UploadRequest) -> ServiceResult<PublicReference> {
        let owner = resolve_owner(self.metadata.as_ref(), &request.credential).await?;

        let file_type = extension(&request.filename).to_string();
        let id = identifier::generate(ID_LENGTH);
        let key = format!("{id}{file_type}");

        let record = NewUpload {
            api_key: owner.api_key.clone(),
            display_name: owner.display_name.clone(),
            file_name: key.clone(),
            ip: request.source_ip,
            file_type,
            file_size: request.content.len() as i64,
            upload_date: Utc::now(),
        };

        let commit = tokio::spawn(commit_upload(
            self.metadata.clone(),
            self.objects.clone(),
            self.verify,
            record,
            request.content,
        ));
        match commit.await {
            Ok(result) => result?,
            Err(err) => {
                error!(key = %key, error = %err, "upload task aborted");
                return Err(ServiceError::Internal("Upload interrupted".into()));
            }
        };

        Ok(PublicReference::new(&owner.domain, key, id))
    }

    /// Remove an upload and its object. Only the owner may delete.
    pub async fn delete_upload(&self, credential: &str, public_id: &str) -> ServiceResult<()> {
        // Unknown keys are rejected before any lookup.
        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;
        if public_id.is_empty() {
            return Err(ServiceError::BadRequest("Missing upload ID".into()));
        }
        if !identifier::is_identifier(public_id) {
            return Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into()));
        }

        let record = self.find(public_id).await?;
        if !owns(&record.api_key, &owner.api_key) {
            return Err(ServiceError::Forbidden(
                "Unauthorized to delete this upload".into(),
            ));
        }

        let task = tokio::spawn(commit_delete(
            self.metadata.clone(),
            self.objects.clone(),
            self.verify,
            owner.api_key,
            public_id.to_string(),
        ));
        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!(key = %record.file_name, error = %err, "delete task aborted");
                Err(ServiceError::DeleteError)
            }
        }
    }

    /// Resolve `file` (bare id or the exact stored key) and count the view.
    pub async fn view(&self, file: &str) -> ServiceResult<UploadRecord> {
        let (public_id, with_extension) = match file.split_once('.') {
            Some((id, _)) => (id, true),
            None => (file, false),
        };
        if !identifier::is_identifier(public_id) {
            return Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into()));
        }
        // A suffix must be the stored extension, not just anything after the id.
        if with_extension && self.find(public_id).await?.file_name != file {
            return Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into()));
        }
        match self.metadata.increment_views(public_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into())),
            Err(err) => {
                error!(public_id, error = %err, "view increment failed");
                Err(ServiceError::Internal("Failed to load upload".into()))
            }
        }
    }

    /// Uploads owned by `credential`, newest first.
    pub async fn list(&self, credential: &str) -> ServiceResult<Vec<UploadRecord>> {
        let owner = resolve_owner(self.metadata.as_ref(), credential).await?;
        self.metadata
            .list_uploads(&owner.api_key)
            .await
            .map_err(|err| {
                error!(error = %err, "listing uploads failed");
                ServiceError::Internal("Failed to list uploads".into())
            })
    }

    async fn find(&self, public_id: &str) -> ServiceResult<UploadRecord> {
        match self.metadata.find_upload(public_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into())),
            Err(err) => {
                error!(public_id, error = %err, "upload lookup failed");
                Err(ServiceError::Internal("Failed to load upload".into()))
            }
        }
    }
}

async fn commit_upload(
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStoreClient>,
    verify: PollPolicy,
    record: NewUpload,
    content: Bytes,
) -> ServiceResult<()> {
    let key = record.file_name.as_str();

    if let Err(err) = objects.put(key, content).await {
        error!(key, error = %err, "object write failed");
        return Err(ServiceError::StorageWriteFailed);
    }

    if let Err(err) = verify_presence(objects.as_ref(), key, verify).await {
        // The object may still appear later; nothing references it yet.
        error!(key, error = %err, "object write not confirmed");
        return Err(ServiceError::StorageVerificationFailed);
    }

    match metadata.insert_upload(&record).await {
        Ok(stored) => {
            info!(
                key,
                size = stored.file_size,
                owner = %stored.display_name,
                "upload stored"
            );
            Ok(())
        }
        Err(err) => {
            error!(key, orphan = true, error = %err, "upload record not saved; object orphaned");
            Err(ServiceError::Internal("Failed to save upload".into()))
        }
    }
}

async fn commit_delete(
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStoreClient>,
    verify: PollPolicy,
    owner_key: String,
    public_id: String,
) -> ServiceResult<()> {
    let removed = match metadata.delete_upload(&owner_key, &public_id).await {
        Ok(Some(record)) => record,
        // Lost a race with a concurrent delete.
        Ok(None) => return Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into())),
        Err(err) => {
            error!(public_id = %public_id, error = %err, "upload record delete failed");
            return Err(ServiceError::DeleteError);
        }
    };
    let key = removed.file_name.as_str();

    if let Err(err) = objects.delete(key).await {
        error!(key, orphan = true, error = %err, "object delete failed after record removal");
        return Err(ServiceError::DeleteError);
    }

    if let Err(err) = wait_until_absent(objects.as_ref(), key, verify).await {
        warn!(key, orphan = true, error = %err, "object still visible after delete");
        return Err(ServiceError::DeleteError);
    }

    info!(key, "upload deleted");
    Ok(())
}

/// Extension of `filename` including the dot, or empty when it has none or it does
/// not look like one (non-alphanumeric or too long).
pub fn extension(filename: &str) -> &str {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let Some(dot) = base.rfind('.') else {
        return "";
    };
    let ext = &base[dot + 1..];
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return "";
    }
    &base[dot..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::User;
    use crate::services::{
        account_service::MSG_INVALID_KEY,
        metadata_store::{MetadataError, MockMetadataStore, SqliteMetadataStore},
        object_store_client::{
            MockObjectStoreClient, RemoteObjectStore, StoreError, StoreResult, StoredObject,
        },
    };
    use async_trait::async_trait;
    use object_store::memory::InMemory;
    use std::time::Duration;
    use tokio::sync::Notify;

    const FAST: PollPolicy = PollPolicy {
        max_attempts: 2,
        interval: Duration::from_millis(1),
    };

    struct Harness {
        orchestrator: UploadOrchestrator,
        metadata: Arc<SqliteMetadataStore>,
        objects: Arc<RemoteObjectStore>,
    }

    async fn harness() -> Harness {
        let metadata = Arc::new(SqliteMetadataStore::in_memory().await.unwrap());
        for key in ["K1", "K2"] {
            metadata
                .insert_user(&User {
                    api_key: key.into(),
                    display_name: format!("{key}-name"),
                    domain: "i.example.com".into(),
                    ip: "127.0.0.1".into(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let objects = Arc::new(RemoteObjectStore::new(
            Arc::new(InMemory::new()),
            Duration::from_secs(5),
        ));
        Harness {
            orchestrator: UploadOrchestrator::new(metadata.clone(), objects.clone(), FAST),
            metadata,
            objects,
        }
    }

    fn request(credential: &str, filename: &str, size: usize) -> UploadRequest {
        UploadRequest {
            credential: credential.into(),
            filename: filename.into(),
            content: Bytes::from(vec![7u8; size]),
            source_ip: "1.2.3.4".into(),
        }
    }

    fn user(api_key: &str) -> User {
        User {
            api_key: api_key.into(),
            display_name: "someone".into(),
            domain: "i.example.com".into(),
            ip: "127.0.0.1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn extension_rules() {
        assert_eq!(extension("photo.png"), ".png");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("dir.d/README"), "");
        assert_eq!(extension("C:\\shots\\img.JPG"), ".JPG");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension("trailing."), "");
        assert_eq!(extension("evil.p/ng"), "");
        assert_eq!(extension("weird.p ng"), "");
        assert_eq!(extension("long.abcdefghijklmnopq"), "");
        assert_eq!(extension(".bashrc"), ".bashrc");
    }

    #[tokio::test]
    async fn upload_photo_records_metadata() {
        let h = harness().await;
        let reference = h
            .orchestrator
            .upload(request("K1", "photo.png", 500_000))
            .await
            .unwrap();

        assert_eq!(reference.id.len(), 10);
        assert!(identifier::is_identifier(&reference.id));
        assert_eq!(reference.key, format!("{}.png", reference.id));
        assert_eq!(reference.url, format!("i/{}", reference.id));
        assert_eq!(
            reference.full_url,
            format!("https://i.example.com/i/{}", reference.id)
        );

        let record = h.metadata.find_upload(&reference.id).await.unwrap().unwrap();
        assert_eq!(record.file_size, 500_000);
        assert_eq!(record.views, 0);
        assert_eq!(record.file_type, ".png");
        assert_eq!(record.ip, "1.2.3.4");
        assert_eq!(record.api_key, "K1");
        assert!(h.objects.head_exists(&reference.key).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_credential_is_unauthorized() {
        let h = harness().await;
        let err = h
            .orchestrator
            .upload(request("nobody", "a.png", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert!(h.objects.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_then_delete_leaves_nothing() {
        let h = harness().await;
        let reference = h
            .orchestrator
            .upload(request("K1", "doc.txt", 12))
            .await
            .unwrap();

        h.orchestrator
            .delete_upload("K1", &reference.id)
            .await
            .unwrap();

        assert!(h.metadata.find_upload(&reference.id).await.unwrap().is_none());
        assert!(!h.objects.head_exists(&reference.key).await.unwrap());
        assert_eq!(
            h.orchestrator.delete_upload("K1", &reference.id).await,
            Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into()))
        );
    }

    #[tokio::test]
    async fn delete_by_other_owner_is_forbidden() {
        let h = harness().await;
        let reference = h
            .orchestrator
            .upload(request("K1", "photo.png", 64))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .delete_upload("K2", &reference.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        assert!(h.metadata.find_upload(&reference.id).await.unwrap().is_some());
        assert!(h.objects.head_exists(&reference.key).await.unwrap());
    }

    #[tokio::test]
    async fn delete_rejects_bad_ids() {
        let h = harness().await;
        assert!(matches!(
            h.orchestrator.delete_upload("K1", "").await,
            Err(ServiceError::BadRequest(_))
        ));
        assert!(matches!(
            h.orchestrator.delete_upload("K1", "../etc").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn view_counts_and_accepts_extension() {
        let h = harness().await;
        let reference = h
            .orchestrator
            .upload(request("K1", "clip.mp4", 5))
            .await
            .unwrap();

        h.orchestrator.view(&reference.id).await.unwrap();
        let record = h.orchestrator.view(&reference.key).await.unwrap();
        assert_eq!(record.views, 2);
        assert!(matches!(
            h.orchestrator.view("missing").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_failure_creates_no_record() {
        let mut metadata = MockMetadataStore::new();
        metadata
            .expect_find_user()
            .returning(|key| Ok(Some(user(key))));
        metadata.expect_insert_upload().never();

        let mut objects = MockObjectStoreClient::new();
        objects.expect_put().returning(|_, _| {
            Err(crate::services::object_store_client::StoreError::Config(
                "bucket gone".into(),
            ))
        });

        let orchestrator = UploadOrchestrator::new(Arc::new(metadata), Arc::new(objects), FAST);
        let err = orchestrator
            .upload(request("K1", "a.png", 3))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::StorageWriteFailed);
    }

    #[tokio::test]
    async fn unverified_write_creates_no_record() {
        let mut metadata = MockMetadataStore::new();
        metadata
            .expect_find_user()
            .returning(|key| Ok(Some(user(key))));
        metadata.expect_insert_upload().never();

        let mut objects = MockObjectStoreClient::new();
        objects.expect_put().returning(|_, _| Ok(()));
        objects
            .expect_head_exists()
            .times(FAST.max_attempts as usize)
            .returning(|_| Ok(false));

        let orchestrator = UploadOrchestrator::new(Arc::new(metadata), Arc::new(objects), FAST);
        let err = orchestrator
            .upload(request("K1", "a.png", 3))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::StorageVerificationFailed);
    }

    #[tokio::test]
    async fn record_failure_leaves_object_and_fails_request() {
        let mut metadata = MockMetadataStore::new();
        metadata
            .expect_find_user()
            .returning(|key| Ok(Some(user(key))));
        metadata
            .expect_insert_upload()
            .times(1)
            .returning(|_| Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut)));

        let mut objects = MockObjectStoreClient::new();
        objects.expect_put().times(1).returning(|_, _| Ok(()));
        objects.expect_head_exists().returning(|_| Ok(true));
        objects.expect_delete().never();

        let orchestrator = UploadOrchestrator::new(Arc::new(metadata), Arc::new(objects), FAST);
        let err = orchestrator
            .upload(request("K1", "a.png", 3))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[tokio::test]
    async fn lingering_object_after_delete_is_delete_error() {
        let h = harness().await;
        h.metadata
            .insert_upload(&NewUpload {
                api_key: "K1".into(),
                display_name: "K1-name".into(),
                file_name: "stuck12345.png".into(),
                ip: "1.2.3.4".into(),
                file_type: ".png".into(),
                file_size: 1,
                upload_date: Utc::now(),
            })
            .await
            .unwrap();

        let mut objects = MockObjectStoreClient::new();
        objects.expect_delete().times(1).returning(|_| Ok(()));
        objects.expect_head_exists().returning(|_| Ok(true));

        let orchestrator = UploadOrchestrator::new(h.metadata.clone(), Arc::new(objects), FAST);
        let err = orchestrator
            .delete_upload("K1", "stuck12345")
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::DeleteError);

        // The record is gone regardless; no attempt is made to restore it.
        assert!(h.metadata.find_upload("stuck12345").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_credential_cannot_delete_or_discover_ids() {
        let h = harness().await;
        let reference = h
            .orchestrator
            .upload(request("K1", "photo.png", 8))
            .await
            .unwrap();

        let invalid = Err(ServiceError::Unauthorized(MSG_INVALID_KEY.into()));
        assert_eq!(
            h.orchestrator.delete_upload("bogus", &reference.id).await,
            invalid
        );
        assert_eq!(
            h.orchestrator.delete_upload("bogus", "Missing123").await,
            invalid
        );
        assert!(h.metadata.find_upload(&reference.id).await.unwrap().is_some());
        assert!(h.objects.head_exists(&reference.key).await.unwrap());
    }

    #[tokio::test]
    async fn view_rejects_suffix_other_than_stored_extension() {
        let h = harness().await;
        let reference = h
            .orchestrator
            .upload(request("K1", "photo.png", 5))
            .await
            .unwrap();

        for file in [
            format!("{}.jpg", reference.id),
            format!("{}.png.txt", reference.id),
            format!("{}.", reference.id),
        ] {
            assert_eq!(
                h.orchestrator.view(&file).await,
                Err(ServiceError::NotFound(MSG_UPLOAD_NOT_FOUND.into())),
                "{file}"
            );
        }

        let record = h.orchestrator.view(&reference.key).await.unwrap();
        assert_eq!(record.views, 1);
    }

    /// Holds every `put` until released, so a test can drop the caller mid-write.
    struct GatedStore {
        inner: RemoteObjectStore,
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ObjectStoreClient for GatedStore {
        async fn put(&self, key: &str, content: Bytes) -> StoreResult<()> {
            self.started.notify_one();
            self.release.notified().await;
            self.inner.put(key, content).await
        }

        async fn head_exists(&self, key: &str) -> StoreResult<bool> {
            self.inner.head_exists(key).await
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.inner.delete(key).await
        }

        async fn list(&self) -> StoreResult<Vec<StoredObject>> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn dropped_caller_does_not_abandon_started_upload() {
        let h = harness().await;
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let objects = Arc::new(GatedStore {
            inner: RemoteObjectStore::new(Arc::new(InMemory::new()), Duration::from_secs(5)),
            started: started.clone(),
            release: release.clone(),
        });
        let orchestrator = UploadOrchestrator::new(h.metadata.clone(), objects.clone(), FAST);

        let caller = tokio::spawn(async move {
            orchestrator
                .upload(request("K1", "photo.png", 32))
                .await
        });
        started.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        release.notify_one();
        let record = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = h.metadata.list_uploads("K1").await.unwrap().pop() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("upload committed after caller went away");

        assert_eq!(record.file_size, 32);
        assert!(objects.head_exists(&record.file_name).await.unwrap());
    }

    #[tokio::test]
    async fn failed_object_delete_is_delete_error() {
        let h = harness().await;
        h.metadata
            .insert_upload(&NewUpload {
                api_key: "K1".into(),
                display_name: "K1-name".into(),
                file_name: "gone123456.png".into(),
                ip: "1.2.3.4".into(),
                file_type: ".png".into(),
                file_size: 1,
                upload_date: Utc::now(),
            })
            .await
            .unwrap();

        let mut objects = MockObjectStoreClient::new();
        objects
            .expect_delete()
            .times(1)
            .returning(|_| Err(StoreError::Config("bucket gone".into())));
        objects.expect_head_exists().never();

        let orchestrator = UploadOrchestrator::new(h.metadata.clone(), Arc::new(objects), FAST);
        let err = orchestrator
            .delete_upload("K1", "gone123456")
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::DeleteError);
        assert!(h.metadata.find_upload("gone123456").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner() {
        let h = harness().await;
        h.orchestrator
            .upload(request("K1", "a.png", 1))
            .await
            .unwrap();
        h.orchestrator
            .upload(request("K2", "b.png", 1))
            .await
            .unwrap();

        let listed = h.orchestrator.list("K1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].api_key, "K1");
    }
}
