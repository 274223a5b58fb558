//! Remote blob storage for uploaded assets.
//!
//! The backing store (S3 or any S3-compatible service) is only eventually consistent:
//! a successful `put` or `delete` may not be visible to the next `head`. Callers that
//! need to observe the effect use [`verify_presence`] / [`wait_until_absent`], which poll
//! under a [`PollPolicy`] budget that is separate from the per-call timeout.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
#[cfg(test)]
use mockall::automock;
use object_store::{
    ClientOptions, ObjectStore, PutPayload, aws::AmazonS3Builder, path::Path as ObjectPath,
};
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} on `{key}` timed out after {after:?}")]
    CallTimeout {
        operation: &'static str,
        key: String,
        after: Duration,
    },
    #[error("object `{key}` did not become {expected} after {attempts} attempts")]
    NotSettled {
        key: String,
        expected: &'static str,
        attempts: u32,
    },
    #[error("object store configuration invalid: {0}")]
    Config(String),
    #[error(transparent)]
    Backend(#[from] object_store::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Listing entry, used by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Port for the remote blob store.
///
/// `put` and `delete` are not retried here; the orchestrator decides what a failure means.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Upload `content` under `key`, overwriting anything already there.
    async fn put(&self, key: &str, content: Bytes) -> StoreResult<()>;

    /// Whether `key` is currently visible.
    async fn head_exists(&self, key: &str) -> StoreResult<bool>;

    /// Request deletion of `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Every object currently visible in the bucket.
    async fn list(&self) -> StoreResult<Vec<StoredObject>>;
}

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, Backblaze, ...). `http://` endpoints are allowed.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// [`ObjectStoreClient`] backed by any `object_store` implementation.
#[derive(Clone, Debug)]
pub struct RemoteObjectStore {
    inner: Arc<dyn ObjectStore>,
    call_timeout: Duration,
}

impl RemoteObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>, call_timeout: Duration) -> Self {
        Self {
            inner,
            call_timeout,
        }
    }

    /// Build a client for an S3-compatible bucket using path-style requests.
    pub fn s3(settings: &S3Settings, call_timeout: Duration) -> StoreResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_virtual_hosted_style_request(false)
            .with_client_options(ClientOptions::new().with_timeout(call_timeout));

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        if let Some(key_id) = &settings.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &settings.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Self::new(Arc::new(store), call_timeout))
    }

    async fn timed<T, F>(&self, operation: &'static str, key: &str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = object_store::Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::CallTimeout {
                operation,
                key: key.to_string(),
                after: self.call_timeout,
            }),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for RemoteObjectStore {
    async fn put(&self, key: &str, content: Bytes) -> StoreResult<()> {
        let path = ObjectPath::from(key);
        let size = content.len();
        self.timed("put", key, self.inner.put(&path, PutPayload::from(content)))
            .await?;
        debug!(key, size, "object written");
        Ok(())
    }

    async fn head_exists(&self, key: &str) -> StoreResult<bool> {
        let path = ObjectPath::from(key);
        match self.timed("head", key, self.inner.head(&path)).await {
            Ok(_) => Ok(true),
            Err(StoreError::Backend(object_store::Error::NotFound { .. })) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = ObjectPath::from(key);
        match self.timed("delete", key, self.inner.delete(&path)).await {
            Ok(()) | Err(StoreError::Backend(object_store::Error::NotFound { .. })) => {
                debug!(key, "object delete requested");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list(&self) -> StoreResult<Vec<StoredObject>> {
        // Paginated; not bounded by the per-call timeout.
        let metas: Vec<_> = self.inner.list(None).try_collect().await?;
        Ok(metas
            .into_iter()
            .map(|meta| StoredObject {
                key: meta.location.to_string(),
                size: meta.size,
                last_modified: meta.last_modified,
            })
            .collect())
    }
}

/// Attempt budget for visibility polling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(2),
        }
    }
}

/// Poll until `key` is visible, defeating read-after-write lag after a `put`.
pub async fn verify_presence(
    store: &dyn ObjectStoreClient,
    key: &str,
    policy: PollPolicy,
) -> StoreResult<()> {
    poll_until(store, key, policy, true).await
}

/// Poll until `key` is reported absent after a `delete`.
pub async fn wait_until_absent(
    store: &dyn ObjectStoreClient,
    key: &str,
    policy: PollPolicy,
) -> StoreResult<()> {
    poll_until(store, key, policy, false).await
}

async fn poll_until(
    store: &dyn ObjectStoreClient,
    key: &str,
    policy: PollPolicy,
    want_present: bool,
) -> StoreResult<()> {
    let attempts = policy.max_attempts.max(1);
    let expected = if want_present { "present" } else { "absent" };

    for attempt in 1..=attempts {
        match store.head_exists(key).await {
            Ok(present) if present == want_present => {
                debug!(key, attempt, expected, "object settled");
                return Ok(());
            }
            Ok(_) => debug!(key, attempt, expected, "object not settled yet"),
            // A failed probe counts as an attempt; only the overall budget is terminal.
            Err(err) => warn!(key, attempt, error = %err, "visibility probe failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(StoreError::NotSettled {
        key: key.to_string(),
        expected,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn memory_store() -> RemoteObjectStore {
        RemoteObjectStore::new(Arc::new(InMemory::new()), Duration::from_secs(5))
    }

    /// Reports `present` only from the `settles_on`-th probe onwards.
    struct LaggingStore {
        probes: AtomicU32,
        settles_on: u32,
        present_when_settled: bool,
    }

    impl LaggingStore {
        fn new(settles_on: u32, present_when_settled: bool) -> Self {
            Self {
                probes: AtomicU32::new(0),
                settles_on,
                present_when_settled,
            }
        }
    }

    #[async_trait]
    impl ObjectStoreClient for LaggingStore {
        async fn put(&self, _key: &str, _content: Bytes) -> StoreResult<()> {
            Ok(())
        }

        async fn head_exists(&self, _key: &str) -> StoreResult<bool> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.settles_on {
                Ok(self.present_when_settled)
            } else {
                Ok(!self.present_when_settled)
            }
        }

        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Ok(())
        }

        async fn list(&self) -> StoreResult<Vec<StoredObject>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn put_head_delete_roundtrip() {
        let store = memory_store();
        assert!(!store.head_exists("abc.png").await.unwrap());

        store
            .put("abc.png", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert!(store.head_exists("abc.png").await.unwrap());

        store.delete("abc.png").await.unwrap();
        assert!(!store.head_exists("abc.png").await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let store = memory_store();
        store.delete("never-written.txt").await.unwrap();
    }

    #[tokio::test]
    async fn list_reports_sizes() {
        let store = memory_store();
        store.put("a.txt", Bytes::from_static(b"12345")).await.unwrap();
        store.put("b.txt", Bytes::from_static(b"1")).await.unwrap();

        let mut listed = store.list().await.unwrap();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "a.txt");
        assert_eq!(listed[0].size, 5);
        assert_eq!(listed[1].size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_presence_succeeds_once_visible() {
        let store = LaggingStore::new(3, true);
        let start = Instant::now();

        verify_presence(&store, "k.png", PollPolicy::default())
            .await
            .unwrap();

        assert_eq!(store.probes.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn verify_presence_gives_up_after_budget() {
        let store = LaggingStore::new(u32::MAX, true);
        let start = Instant::now();

        let err = verify_presence(&store, "k.png", PollPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotSettled { attempts: 5, .. }));
        assert_eq!(store.probes.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn verify_presence_tolerates_probe_errors() {
        let mut store = MockObjectStoreClient::new();
        let mut calls = 0;
        store.expect_head_exists().times(2).returning(move |key| {
            calls += 1;
            if calls == 1 {
                Err(StoreError::CallTimeout {
                    operation: "head",
                    key: key.to_string(),
                    after: Duration::from_secs(5),
                })
            } else {
                Ok(true)
            }
        });

        verify_presence(&store, "k.png", PollPolicy::default())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_absent_succeeds_once_gone() {
        let store = LaggingStore::new(2, false);
        wait_until_absent(&store, "k.png", PollPolicy::default())
            .await
            .unwrap();
        assert_eq!(store.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_absent_times_out() {
        let store = LaggingStore::new(u32::MAX, false);
        let policy = PollPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(500),
        };
        let err = wait_until_absent(&store, "k.png", policy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotSettled {
                expected: "absent",
                attempts: 3,
                ..
            }
        ));
    }
}
