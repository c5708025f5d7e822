//! BlobStore port - 画像バイナリの保存先（InMemory / Local filesystem）
//!
//! Blob は合成 ID で引き、所有 report の ID で索引されます。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{BlobId, BlobRecord, BlobUpload, ReportId, StoreError};

/// BlobStore は画像の永続化を担当
///
/// # 設計原則
/// - `get` は保存したバイト列をそのまま返す（再圧縮しない）
/// - `delete` は冪等（OrphanCollector と競合しても問題ない）
/// - 集計は保存済みレコードを毎回走査して求める（別途カウンタを永続化しない）
/// - 書き込み途中の blob は `records` に現れない
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a new blob and return its freshly generated id.
    async fn put(&self, upload: BlobUpload) -> Result<BlobId, StoreError>;

    /// Bytes exactly as stored. `NotFound` if absent.
    async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StoreError>;

    /// Metadata only. `NotFound` if absent.
    async fn record(&self, id: &BlobId) -> Result<BlobRecord, StoreError>;

    /// Idempotent.
    async fn delete(&self, id: &BlobId) -> Result<(), StoreError>;

    /// Snapshot of every committed record.
    async fn records(&self) -> Result<Vec<BlobRecord>, StoreError>;

    async fn list_by_owner(&self, owner: &ReportId) -> Result<Vec<BlobId>, StoreError> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| &r.owner_report_id == owner)
            .map(|r| r.id)
            .collect())
    }

    async fn total_size_by_owner(&self, owner: &ReportId) -> Result<u64, StoreError> {
        Ok(self
            .records()
            .await?
            .iter()
            .filter(|r| &r.owner_report_id == owner)
            .map(|r| r.byte_size)
            .sum())
    }

    async fn total_size(&self) -> Result<u64, StoreError> {
        Ok(self.records().await?.iter().map(|r| r.byte_size).sum())
    }

    /// Remove leftovers of writes that never committed and are at least
    /// `grace` old. Returns how many files were removed. Backends whose
    /// writes cannot be interrupted halfway have nothing to sweep.
    async fn sweep_uncommitted(&self, _grace: Duration) -> Result<usize, StoreError> {
        Ok(0)
    }

    /// Delete every blob owned by `owner`. Returns how many were removed.
    async fn delete_by_owner(&self, owner: &ReportId) -> Result<usize, StoreError> {
        let ids = self.list_by_owner(owner).await?;
        for id in &ids {
            self.delete(id).await?;
        }
        Ok(ids.len())
    }
}
