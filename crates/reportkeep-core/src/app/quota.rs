//! QuotaOracle - BlobStore の使用量と総容量
//!
//! `used` は BlobStore のレコードを毎回合計した値、`total` は
//! CapacityProbe が返した値（分からなければ既定値）です。

use std::sync::Arc;

use tracing::warn;

use crate::app::documents::DocumentStore;
use crate::domain::{DEFAULT_CAPACITY_BYTES, ReportFootprint, StorageOverview, StorageUsage, StoreError};
use crate::ports::{BlobStore, CapacityProbe};

#[derive(Clone)]
pub struct QuotaOracle {
    blobs: Arc<dyn BlobStore>,
    probe: Arc<dyn CapacityProbe>,
    default_total: u64,
}

impl QuotaOracle {
    pub fn new(blobs: Arc<dyn BlobStore>, probe: Arc<dyn CapacityProbe>) -> Self {
        Self {
            blobs,
            probe,
            default_total: DEFAULT_CAPACITY_BYTES,
        }
    }

    pub fn with_default_total(mut self, bytes: u64) -> Self {
        self.default_total = bytes;
        self
    }

    fn total(&self) -> u64 {
        self.probe.capacity().unwrap_or(self.default_total)
    }

    /// Never fails. A medium that cannot be read counts as empty.
    pub async fn usage(&self) -> StorageUsage {
        let used = match self.blobs.total_size().await {
            Ok(used) => used,
            Err(e) => {
                warn!(error = %e, "could not sum blob sizes, reporting zero usage");
                0
            }
        };
        StorageUsage {
            used,
            total: self.total(),
        }
    }

    /// Usage plus the JSON and image bytes of every submitted report,
    /// largest first.
    pub async fn overview(&self, documents: &DocumentStore) -> Result<StorageOverview, StoreError> {
        let mut reports = Vec::new();
        for (key, report) in documents.enumerate().await? {
            let json_bytes = documents.stored_len(&key).await?.unwrap_or(0);
            let image_bytes = self.blobs.total_size_by_owner(&report.report_id).await?;
            reports.push(ReportFootprint {
                key,
                report_id: report.report_id.to_string(),
                json_bytes,
                image_bytes,
            });
        }
        reports.sort_by(|a, b| b.total_bytes().cmp(&a.total_bytes()).then(a.key.cmp(&b.key)));

        Ok(StorageOverview {
            usage: self.usage().await,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlobUpload, Report, ReportId, report_key};
    use crate::impls::{FixedCapacity, InMemoryBlobStore, InMemoryMedium, UnknownCapacity};
    use crate::ports::{StampedIdGenerator, SystemClock};

    fn blobs() -> Arc<InMemoryBlobStore> {
        let clock = Arc::new(SystemClock);
        Arc::new(InMemoryBlobStore::new(
            Arc::new(StampedIdGenerator::new(clock.clone())),
            clock,
        ))
    }

    #[tokio::test]
    async fn test_usage_tracks_puts_and_deletes() {
        let blobs = blobs();
        let oracle = QuotaOracle::new(blobs.clone(), Arc::new(FixedCapacity(1000)));
        let owner = ReportId::new("QA-a");

        let a = blobs
            .put(BlobUpload::new(owner.clone(), "a.jpg", "image/jpeg", vec![0; 100]))
            .await
            .unwrap();
        blobs
            .put(BlobUpload::new(owner.clone(), "b.jpg", "image/jpeg", vec![0; 50]))
            .await
            .unwrap();
        assert_eq!(oracle.usage().await, StorageUsage { used: 150, total: 1000 });

        blobs.delete(&a).await.unwrap();
        assert_eq!(oracle.usage().await.used, 50);
    }

    #[tokio::test]
    async fn test_unknown_capacity_falls_back_to_default() {
        let oracle = QuotaOracle::new(blobs(), Arc::new(UnknownCapacity));
        assert_eq!(oracle.usage().await.total, DEFAULT_CAPACITY_BYTES);

        let oracle = oracle.with_default_total(42);
        assert_eq!(oracle.usage().await.total, 42);
    }

    #[tokio::test]
    async fn test_overview_breaks_down_per_report() {
        let blobs = blobs();
        let documents = DocumentStore::new(Arc::new(InMemoryMedium::new()));
        let oracle = QuotaOracle::new(blobs.clone(), Arc::new(FixedCapacity(1 << 20)));

        let heavy = Report::new("alice", "forest-pack", ReportId::new("QA-heavy"));
        let light = Report::new("bob", "desert-pack", ReportId::new("QA-light"));
        documents.put(&report_key("alice", "forest-pack"), &heavy).await.unwrap();
        documents.put(&report_key("bob", "desert-pack"), &light).await.unwrap();
        blobs
            .put(BlobUpload::new(heavy.report_id.clone(), "a.jpg", "image/jpeg", vec![1; 4096]))
            .await
            .unwrap();

        let overview = oracle.overview(&documents).await.unwrap();
        assert_eq!(overview.usage.used, 4096);
        assert_eq!(overview.reports.len(), 2);
        assert_eq!(overview.reports[0].report_id, "QA-heavy");
        assert_eq!(overview.reports[0].image_bytes, 4096);
        assert_eq!(
            overview.reports[1].json_bytes,
            light.to_json().unwrap().len() as u64
        );
    }
}
