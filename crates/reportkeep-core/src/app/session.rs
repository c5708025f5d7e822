//! ReportSession - 編集中の report 1 件を持つ facade
//!
//! 編集 UI はメモリ上の report をこの session 経由で触ります。画像は
//! 1 枚ずつ BlobStore に書き、返ってきた id を issue に足します。
//!
//! # 順序の約束
//! - 画像: blob を put した直後に imageIds を更新する（間に await を挟まない）
//! - 提出: DocumentStore に書いてから draft を消す
//!
//! blob を put してから report を保存するまでの間に OrphanCollector が走ると、
//! その blob は回収され得ます（既知の競合、ここでは塞がない）。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::autosave::SnapshotSource;
use crate::app::documents::DocumentStore;
use crate::app::drafts::{DraftStore, SaveOutcome};
use crate::config::{DEFAULT_MAX_IMAGES_PER_ISSUE, DEFAULT_MAX_UPLOAD_BYTES};
use crate::domain::{
    BlobId, BlobUpload, DraftError, Issue, Report, ReportId, StoreError, report_key,
};
use crate::ports::{BlobStore, Clock, IdGenerator};

/// Where an opened session got its report from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Document,
    Draft,
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_upload_bytes: u64,
    pub max_images_per_issue: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_images_per_issue: DEFAULT_MAX_IMAGES_PER_ISSUE,
        }
    }
}

/// Everything a session needs, shared by all sessions of one depot.
#[derive(Clone)]
pub struct SessionStores {
    pub blobs: Arc<dyn BlobStore>,
    pub documents: DocumentStore,
    pub drafts: DraftStore,
    pub id_gen: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
    pub limits: UploadLimits,
}

pub struct ReportSession {
    stores: SessionStores,
    origin: SessionOrigin,
    report: Mutex<Report>,
}

fn issue_mut(report: &mut Report, index: usize) -> Result<&mut Issue, StoreError> {
    let len = report.issues.len();
    report
        .issues
        .get_mut(index)
        .ok_or_else(|| StoreError::InvalidInput(format!("issue {index} out of range ({len} issues)")))
}

impl ReportSession {
    /// Open the report for `(tester, pack)`: the submitted document if there
    /// is one, else a fresh draft, else a new report with a new id.
    pub async fn open(stores: SessionStores, tester: &str, pack: &str) -> Result<Self, StoreError> {
        let (origin, mut report) = match stores.documents.get_for(tester, pack).await {
            Ok(report) => (SessionOrigin::Document, report),
            Err(e) if e.is_not_found() => match stores.drafts.load(tester, pack).await? {
                Some(slot) => (SessionOrigin::Draft, slot.report),
                None => {
                    let id = stores.id_gen.report_id(tester, pack);
                    (SessionOrigin::New, Report::new(tester, pack, id))
                }
            },
            Err(e) => return Err(e),
        };
        // 旧いドキュメントに reportId が無ければここで一度だけ振る
        if report.report_id.as_str().is_empty() {
            report.report_id = stores.id_gen.report_id(tester, pack);
        }
        report.tester_name = tester.to_string();
        report.pack_name = pack.to_string();

        debug!(tester, pack, report_id = %report.report_id, ?origin, "opened report session");
        Ok(Self {
            stores,
            origin,
            report: Mutex::new(report),
        })
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    /// Snapshot of the in-memory report.
    pub async fn report(&self) -> Report {
        self.report.lock().await.clone()
    }

    pub async fn report_id(&self) -> ReportId {
        self.report.lock().await.report_id.clone()
    }

    /// Apply an arbitrary edit. The report id, tester and pack stay fixed.
    pub async fn update<R>(&self, edit: impl FnOnce(&mut Report) -> R) -> R {
        let mut report = self.report.lock().await;
        let id = report.report_id.clone();
        let tester = report.tester_name.clone();
        let pack = report.pack_name.clone();
        let out = edit(&mut *report);
        report.report_id = id;
        report.tester_name = tester;
        report.pack_name = pack;
        out
    }

    /// Append an empty issue and return its index.
    pub async fn add_issue(&self) -> usize {
        let mut report = self.report.lock().await;
        report.issues.push(Issue::default());
        report.issues.len() - 1
    }

    /// Store one image and reference it from issue `index`.
    pub async fn attach_image(
        &self,
        index: usize,
        file_name: &str,
        media_type: &str,
        bytes: Vec<u8>,
    ) -> Result<BlobId, StoreError> {
        let limits = self.stores.limits;
        let size = bytes.len() as u64;
        if size > limits.max_upload_bytes {
            return Err(StoreError::PayloadTooLarge {
                size,
                limit: limits.max_upload_bytes,
            });
        }

        // put と imageIds の更新を同じロックの中で行う
        let mut report = self.report.lock().await;
        let owner = report.report_id.clone();
        let count = issue_mut(&mut report, index)?.image_ids.len();
        if count >= limits.max_images_per_issue {
            return Err(StoreError::InvalidInput(format!(
                "issue {index} already has {count} images (limit {})",
                limits.max_images_per_issue
            )));
        }

        let id = self
            .stores
            .blobs
            .put(BlobUpload::new(owner, file_name, media_type, bytes))
            .await?;
        issue_mut(&mut report, index)?.image_ids.push(id.clone());
        debug!(blob_id = %id, issue = index, bytes = size, "attached image");
        Ok(id)
    }

    /// Drop `id` from issue `index` and delete the blob. Returns whether the
    /// issue referenced it.
    pub async fn detach_image(&self, index: usize, id: &BlobId) -> Result<bool, StoreError> {
        let mut report = self.report.lock().await;
        let issue = issue_mut(&mut report, index)?;
        let before = issue.image_ids.len();
        issue.image_ids.retain(|existing| existing != id);
        let referenced = issue.image_ids.len() != before;
        self.stores.blobs.delete(id).await?;
        Ok(referenced)
    }

    /// Remove issue `index`, deleting its blobs first. Blob deletion is best
    /// effort; anything left behind is reclaimed by the collector.
    pub async fn remove_issue(&self, index: usize) -> Result<Issue, StoreError> {
        let mut report = self.report.lock().await;
        let ids = issue_mut(&mut report, index)?.image_ids.clone();
        for id in &ids {
            if let Err(e) = self.stores.blobs.delete(id).await {
                warn!(blob_id = %id, error = %e, "could not delete image of removed issue");
            }
        }
        Ok(report.issues.remove(index))
    }

    /// Bytes of a referenced image, for rendering.
    pub async fn image(&self, id: &BlobId) -> Result<Vec<u8>, StoreError> {
        self.stores.blobs.get(id).await
    }

    /// Write the current snapshot to the draft slot.
    pub async fn autosave(&self) -> Result<SaveOutcome, DraftError> {
        let report = self.report().await;
        self.stores
            .drafts
            .save(&report, &report.tester_name, &report.pack_name)
            .await
    }

    /// Store the report as a document, then clear its draft.
    pub async fn submit(&self) -> Result<Report, StoreError> {
        let mut report = self.report.lock().await;
        report.timestamp = Some(self.stores.clock.now());
        let key = report_key(&report.tester_name, &report.pack_name);
        self.stores.documents.put(&key, &report).await?;
        self.stores
            .drafts
            .clear(&report.tester_name, &report.pack_name)
            .await?;
        info!(key = %key, report_id = %report.report_id, issues = report.issues.len(), "submitted report");
        Ok(report.clone())
    }
}

#[async_trait]
impl SnapshotSource for ReportSession {
    async fn snapshot(&self) -> Option<Report> {
        Some(self.report().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryBlobStore, InMemoryMedium};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn stores() -> (SessionStores, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let id_gen: Arc<dyn IdGenerator> =
            Arc::new(crate::ports::StampedIdGenerator::new(clock.clone()));
        let medium = Arc::new(InMemoryMedium::new());
        let stores = SessionStores {
            blobs: Arc::new(InMemoryBlobStore::new(id_gen.clone(), clock.clone())),
            documents: DocumentStore::new(medium.clone()),
            drafts: DraftStore::new(medium, clock.clone()),
            id_gen,
            clock: clock.clone(),
            limits: UploadLimits {
                max_upload_bytes: 16,
                max_images_per_issue: 2,
            },
        };
        (stores, clock)
    }

    #[tokio::test]
    async fn test_open_prefers_document_then_draft_then_new() {
        let (stores, _) = stores();

        let fresh = ReportSession::open(stores.clone(), "alice", "forest-pack").await.unwrap();
        assert_eq!(fresh.origin(), SessionOrigin::New);
        assert_eq!(fresh.report().await.issues.len(), 1);
        let id = fresh.report_id().await;

        fresh.autosave().await.unwrap();
        let restored = ReportSession::open(stores.clone(), "alice", "forest-pack").await.unwrap();
        assert_eq!(restored.origin(), SessionOrigin::Draft);
        assert_eq!(restored.report_id().await, id);

        restored.submit().await.unwrap();
        let submitted = ReportSession::open(stores.clone(), "alice", "forest-pack").await.unwrap();
        assert_eq!(submitted.origin(), SessionOrigin::Document);
        assert_eq!(submitted.report_id().await, id);
        assert!(stores.drafts.load("alice", "forest-pack").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_cannot_change_report_id() {
        let (stores, _) = stores();
        let session = ReportSession::open(stores, "alice", "forest-pack").await.unwrap();
        let id = session.report_id().await;

        session
            .update(|r| {
                r.report_id = ReportId::new("hijacked");
                r.issues[0].description = "seam".into();
            })
            .await;
        let report = session.report().await;
        assert_eq!(report.report_id, id);
        assert_eq!(report.issues[0].description, "seam");
    }

    #[tokio::test]
    async fn test_upload_guard() {
        let (stores, _) = stores();
        let session = ReportSession::open(stores, "alice", "forest-pack").await.unwrap();

        let err = session
            .attach_image(0, "big.jpg", "image/jpeg", vec![0; 17])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PayloadTooLarge { size: 17, limit: 16 }));

        session.attach_image(0, "a.jpg", "image/jpeg", vec![1; 4]).await.unwrap();
        session.attach_image(0, "b.jpg", "image/jpeg", vec![2; 4]).await.unwrap();
        let err = session
            .attach_image(0, "c.jpg", "image/jpeg", vec![3; 4])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));

        let err = session
            .attach_image(5, "d.jpg", "image/jpeg", vec![3; 4])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_attach_detach_and_remove_issue_delete_blobs() {
        let (stores, _) = stores();
        let blobs = stores.blobs.clone();
        let session = ReportSession::open(stores, "alice", "forest-pack").await.unwrap();

        let a = session.attach_image(0, "a.jpg", "image/jpeg", vec![1; 4]).await.unwrap();
        assert_eq!(session.image(&a).await.unwrap(), vec![1; 4]);
        assert!(session.detach_image(0, &a).await.unwrap());
        assert!(blobs.get(&a).await.unwrap_err().is_not_found());
        assert!(session.report().await.issues[0].image_ids.is_empty());

        let second = session.add_issue().await;
        let b = session
            .attach_image(second, "b.jpg", "image/jpeg", vec![2; 4])
            .await
            .unwrap();
        let removed = session.remove_issue(second).await.unwrap();
        assert_eq!(removed.image_ids, vec![b.clone()]);
        assert!(blobs.get(&b).await.unwrap_err().is_not_found());
        assert_eq!(session.report().await.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_stamps_timestamp() {
        let (stores, clock) = stores();
        let documents = stores.documents.clone();
        let session = ReportSession::open(stores, "alice", "forest-pack").await.unwrap();

        let submitted = session.submit().await.unwrap();
        assert_eq!(submitted.timestamp, Some(clock.now()));
        assert_eq!(documents.get_for("alice", "forest-pack").await.unwrap(), submitted);
    }
}
