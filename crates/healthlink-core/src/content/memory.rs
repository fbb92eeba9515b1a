//! In-memory content store for tests and offline use.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::error::PinError;
use super::{ContentBlob, ContentStoreClient, PinMetadata};

#[derive(Debug, Default)]
struct StoreState {
    pins: BTreeMap<String, (PinMetadata, Vec<u8>)>,
    upload_failure: Option<PinError>,
    unpinned: Vec<String>,
}

/// [`ContentStoreClient`] backed by process memory.
///
/// Identifiers are derived from the content, so pinning the same bytes
/// twice yields the same identifier.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    state: Mutex<StoreState>,
}

impl InMemoryContentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes uploads fail with `error` (`None` clears it).
    pub fn fail_uploads(&self, error: Option<PinError>) {
        self.lock().upload_failure = error;
    }

    /// Whether `cid` is currently pinned.
    #[must_use]
    pub fn is_pinned(&self, cid: &str) -> bool {
        self.lock().pins.contains_key(cid)
    }

    /// Bytes pinned under `cid`.
    #[must_use]
    pub fn bytes(&self, cid: &str) -> Option<Vec<u8>> {
        self.lock().pins.get(cid).map(|(_, bytes)| bytes.clone())
    }

    /// Identifiers removed with `unpin`, in order.
    #[must_use]
    pub fn unpinned(&self) -> Vec<String> {
        self.lock().unpinned.clone()
    }

    fn content_id(bytes: &[u8]) -> String {
        // FNV-1a; stable and good enough to tell test fixtures apart
        let hash = bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| {
            (acc ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
        });
        format!("Qm{}", hex::encode(hash.to_be_bytes()))
    }
}

#[async_trait]
impl ContentStoreClient for InMemoryContentStore {
    async fn upload(
        &self,
        blob: ContentBlob,
        name: &str,
        category: &str,
    ) -> Result<String, PinError> {
        let mut state = self.lock();
        if let Some(err) = state.upload_failure.clone() {
            return Err(err);
        }
        let cid = Self::content_id(&blob.bytes);
        let metadata = PinMetadata {
            name: name.to_string(),
            category: Some(category.to_string()),
            upload_date: Some(Utc::now()),
            size: Some(blob.bytes.len() as u64),
        };
        state.pins.insert(cid.clone(), (metadata, blob.bytes));
        Ok(cid)
    }

    async fn metadata(&self, cid: &str) -> Result<Option<PinMetadata>, PinError> {
        Ok(self.lock().pins.get(cid).map(|(meta, _)| meta.clone()))
    }

    async fn unpin(&self, cid: &str) -> Result<(), PinError> {
        let mut state = self.lock();
        if state.pins.remove(cid).is_none() {
            return Err(PinError::NotFound {
                cid: cid.to_string(),
            });
        }
        state.unpinned.push(cid.to_string());
        Ok(())
    }

    fn resolve_url(&self, cid: &str) -> String {
        format!("memory://ipfs/{cid}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_metadata_unpin() {
        let store = InMemoryContentStore::new();
        let cid = store
            .upload(ContentBlob::new("x-ray.png", vec![1, 2, 3]), "Chest X-ray", "Radiology")
            .await
            .unwrap();
        assert!(cid.starts_with("Qm"));

        let meta = store.metadata(&cid).await.unwrap().unwrap();
        assert_eq!(meta.name, "Chest X-ray");
        assert_eq!(meta.category.as_deref(), Some("Radiology"));
        assert_eq!(meta.size, Some(3));

        store.unpin(&cid).await.unwrap();
        assert_eq!(store.metadata(&cid).await.unwrap(), None);
        assert_eq!(
            store.unpin(&cid).await,
            Err(PinError::NotFound { cid: cid.clone() })
        );
        assert_eq!(store.unpinned(), vec![cid]);
    }

    #[tokio::test]
    async fn test_same_bytes_same_id() {
        let store = InMemoryContentStore::new();
        let a = store
            .upload(ContentBlob::new("a", vec![9; 16]), "A", "Lab")
            .await
            .unwrap();
        let b = store
            .upload(ContentBlob::new("b", vec![9; 16]), "B", "Lab")
            .await
            .unwrap();
        let c = store
            .upload(ContentBlob::new("c", vec![8; 16]), "C", "Lab")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_injected_upload_failure() {
        let store = InMemoryContentStore::new();
        store.fail_uploads(Some(PinError::Unauthorized));
        assert_eq!(
            store
                .upload(ContentBlob::new("a", vec![1]), "A", "Lab")
                .await,
            Err(PinError::Unauthorized)
        );
    }
}
