//! InMemoryBlobStore - 開発・テスト用の BlobStore
//!
//! # 実装詳細
//! - HashMap<BlobId, StoredBlob> が唯一の正本
//! - owner 索引は同じロック内で更新する派生データ（永続化しない）
//! - capacity を指定すると、それを超える put を CapacityExceeded で拒否

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{BlobId, BlobRecord, BlobUpload, ReportId, StoreError};
use crate::ports::{BlobStore, Clock, IdGenerator};

struct StoredBlob {
    record: BlobRecord,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct InMemoryBlobState {
    blobs: HashMap<BlobId, StoredBlob>,
    by_owner: HashMap<ReportId, BTreeSet<BlobId>>,
}

impl InMemoryBlobState {
    fn used(&self) -> u64 {
        self.blobs.values().map(|b| b.record.byte_size).sum()
    }

    fn remove(&mut self, id: &BlobId) -> Option<StoredBlob> {
        let removed = self.blobs.remove(id)?;
        let owner = &removed.record.owner_report_id;
        if let Some(ids) = self.by_owner.get_mut(owner) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_owner.remove(owner);
            }
        }
        Some(removed)
    }
}

/// InMemoryBlobStore はプロセス内だけで生きる BlobStore
///
/// # 使用例
/// ```ignore
/// let store = InMemoryBlobStore::new(id_gen, clock);
/// let id = store.put(BlobUpload::new(report_id, "crack.jpg", "image/jpeg", bytes)).await?;
/// let bytes = store.get(&id).await?;
/// ```
pub struct InMemoryBlobStore {
    state: Arc<Mutex<InMemoryBlobState>>,
    id_gen: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    capacity: Option<u64>,
}

impl InMemoryBlobStore {
    pub fn new(id_gen: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryBlobState::default())),
            id_gen,
            clock,
            capacity: None,
        }
    }

    /// Reject writes that would take the total past `bytes`.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Drop everything, as if the medium had been wiped externally.
    pub async fn wipe(&self) {
        let mut state = self.state.lock().await;
        state.blobs.clear();
        state.by_owner.clear();
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, upload: BlobUpload) -> Result<BlobId, StoreError> {
        let size = upload.byte_size();
        let mut state = self.state.lock().await;

        if let Some(capacity) = self.capacity {
            let used = state.used();
            if used + size > capacity {
                return Err(StoreError::CapacityExceeded {
                    needed: size,
                    available: capacity.saturating_sub(used),
                });
            }
        }

        let id = self.id_gen.blob_id(&upload.owner_report_id, &upload.file_name);
        let record = BlobRecord {
            id: id.clone(),
            owner_report_id: upload.owner_report_id.clone(),
            file_name: upload.file_name,
            media_type: upload.media_type,
            byte_size: size,
            created_at: self.clock.now(),
        };
        state
            .by_owner
            .entry(upload.owner_report_id)
            .or_default()
            .insert(id.clone());
        state.blobs.insert(
            id.clone(),
            StoredBlob {
                record,
                bytes: upload.bytes,
            },
        );
        debug!(blob_id = %id, bytes = size, "stored blob");
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StoreError> {
        let state = self.state.lock().await;
        state
            .blobs
            .get(id)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn record(&self, id: &BlobId) -> Result<BlobRecord, StoreError> {
        let state = self.state.lock().await;
        state
            .blobs
            .get(id)
            .map(|b| b.record.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &BlobId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.remove(id).is_some() {
            debug!(blob_id = %id, "deleted blob");
        }
        Ok(())
    }

    async fn records(&self) -> Result<Vec<BlobRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.blobs.values().map(|b| b.record.clone()).collect())
    }

    async fn list_by_owner(&self, owner: &ReportId) -> Result<Vec<BlobId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .by_owner
            .get(owner)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn total_size_by_owner(&self, owner: &ReportId) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        let Some(ids) = state.by_owner.get(owner) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.blobs.get(id))
            .map(|b| b.record.byte_size)
            .sum())
    }

    async fn total_size(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{StampedIdGenerator, SystemClock};

    fn store() -> InMemoryBlobStore {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        InMemoryBlobStore::new(Arc::new(StampedIdGenerator::new(clock.clone())), clock)
    }

    fn upload(owner: &str, bytes: &[u8]) -> BlobUpload {
        BlobUpload::new(ReportId::new(owner), "shot.png", "image/png", bytes.to_vec())
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = store();
        let id = store.put(upload("QA-a", b"\x89PNG-bytes")).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), b"\x89PNG-bytes".to_vec());

        let record = store.record(&id).await.unwrap();
        assert_eq!(record.media_type, "image/png");
        assert_eq!(record.byte_size, 10);
        assert_eq!(record.owner_report_id, ReportId::new("QA-a"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store();
        let id = store.put(upload("QA-a", b"xyz")).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap_err().is_not_found());
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_sizes_by_owner() {
        let store = store();
        store.put(upload("QA-a", &[0; 100])).await.unwrap();
        store.put(upload("QA-a", &[0; 50])).await.unwrap();
        let other = store.put(upload("QA-b", &[0; 7])).await.unwrap();

        assert_eq!(store.total_size().await.unwrap(), 157);
        assert_eq!(store.total_size_by_owner(&ReportId::new("QA-a")).await.unwrap(), 150);
        assert_eq!(store.list_by_owner(&ReportId::new("QA-b")).await.unwrap(), vec![other.clone()]);

        store.delete(&other).await.unwrap();
        assert_eq!(store.total_size().await.unwrap(), 150);
        assert!(store.list_by_owner(&ReportId::new("QA-b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_rejects_without_side_effects() {
        let store = store().with_capacity(100);
        store.put(upload("QA-a", &[0; 80])).await.unwrap();

        let err = store.put(upload("QA-a", &[0; 30])).await.unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { needed: 30, available: 20 }));
        assert_eq!(store.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_owner_leaves_others() {
        let store = store();
        store.put(upload("QA-a", b"1")).await.unwrap();
        store.put(upload("QA-a", b"2")).await.unwrap();
        store.put(upload("QA-b", b"3")).await.unwrap();

        let removed = store.delete_by_owner(&ReportId::new("QA-a")).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.total_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wipe_resets_accounting() {
        let store = store();
        store.put(upload("QA-a", &[0; 64])).await.unwrap();
        store.wipe().await;
        assert_eq!(store.total_size().await.unwrap(), 0);
    }
}
