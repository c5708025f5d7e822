//! OrphanCollector / GcLoop - 参照されなくなった blob の回収
//!
//! # フロー
//! 1. BlobStore の全レコードを snapshot
//! 2. DocumentStore の全 report を snapshot
//! 3. live 集合 = 全 issue の imageIds の和集合
//! 4. owner が既知の reportId に無い、または live 集合に無い blob が orphan
//! 5. orphan を 1 件ずつ delete（失敗はログを出して次へ）
//! 6. 中断された書き込みの残骸を BlobStore に掃除させる
//!
//! blob を先に snapshot するので、その後に書かれた blob は今回の対象外です。
//! ただし「blob を書いた直後、report に id を足す前」に走ると、その blob は
//! 回収されます。呼び出し側は blob の put 直後に report を保存してください。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::app::documents::DocumentStore;
use crate::domain::{BlobId, ReportId, StoreError};
use crate::ports::BlobStore;

/// Default time between collector runs.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const MIN_GC_INTERVAL: Duration = Duration::from_millis(10);

/// Uncommitted blob files younger than this are left for their writer.
pub const DEFAULT_UNCOMMITTED_GRACE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorPhase {
    Idle,
    Scanning,
    Deleting,
}

/// Counts from one collector run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub scanned: usize,
    pub orphaned: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Leftover files of interrupted writes removed.
    pub swept: usize,
}

/// OrphanCollector は BlobStore と DocumentStore を突き合わせる
///
/// 同時に走るのは 1 回分だけ（2 つ目の呼び出しは前の run の終了を待つ）。
pub struct OrphanCollector {
    blobs: Arc<dyn BlobStore>,
    documents: DocumentStore,
    grace: Duration,
    phase: Mutex<CollectorPhase>,
    run_lock: tokio::sync::Mutex<()>,
}

/// run の終わり方に関わらず Idle に戻す
struct PhaseReset<'a>(&'a OrphanCollector);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        self.0.set_phase(CollectorPhase::Idle);
    }
}

impl OrphanCollector {
    pub fn new(blobs: Arc<dyn BlobStore>, documents: DocumentStore) -> Self {
        Self {
            blobs,
            documents,
            grace: DEFAULT_UNCOMMITTED_GRACE,
            phase: Mutex::new(CollectorPhase::Idle),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_uncommitted_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn phase(&self) -> CollectorPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: CollectorPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// One full scan-and-delete pass.
    ///
    /// Fails only if either snapshot cannot be taken; per-blob deletion
    /// failures are logged and counted in `failed`.
    pub async fn collect_once(&self) -> Result<CollectReport, StoreError> {
        let _run = self.run_lock.lock().await;
        let _reset = PhaseReset(self);
        self.set_phase(CollectorPhase::Scanning);

        let records = self.blobs.records().await?;
        let reports = self.documents.enumerate().await?;

        let known_owners: HashSet<&ReportId> = reports.iter().map(|(_, r)| &r.report_id).collect();
        let live: HashSet<&BlobId> = reports
            .iter()
            .flat_map(|(_, r)| r.referenced_blob_ids())
            .collect();

        let orphans: Vec<&BlobId> = records
            .iter()
            .filter(|rec| !known_owners.contains(&rec.owner_report_id) || !live.contains(&rec.id))
            .map(|rec| &rec.id)
            .collect();

        let mut report = CollectReport {
            scanned: records.len(),
            orphaned: orphans.len(),
            ..CollectReport::default()
        };

        self.set_phase(CollectorPhase::Deleting);
        for id in orphans {
            match self.blobs.delete(id).await {
                Ok(()) => {
                    debug!(blob_id = %id, "collected orphaned blob");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(blob_id = %id, error = %e, "failed to delete orphaned blob, skipping");
                    report.failed += 1;
                }
            }
        }

        match self.blobs.sweep_uncommitted(self.grace).await {
            Ok(swept) => report.swept = swept,
            Err(e) => warn!(error = %e, "failed to sweep uncommitted blob files"),
        }

        info!(
            scanned = report.scanned,
            orphaned = report.orphaned,
            deleted = report.deleted,
            failed = report.failed,
            swept = report.swept,
            "orphan collection finished"
        );
        Ok(report)
    }
}

/// GcLoop は OrphanCollector を定期実行する
///
/// - spawn 直後に 1 回、その後は `period` ごと
/// - `shutdown_and_join()` で以降の実行を止める（実行中の run は最後まで走る）
pub struct GcLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl GcLoop {
    pub fn spawn(collector: Arc<OrphanCollector>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = period.max(MIN_GC_INTERVAL);

        let join = tokio::spawn(async move {
            gc_loop(collector, period, &mut shutdown_rx).await;
        });

        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver が既に落ちていても構わない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn gc_loop(
    collector: Arc<OrphanCollector>,
    period: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    // 最初の tick は即座に来る
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        if let Err(e) = collector.collect_once().await {
            warn!(error = %e, "orphan collection aborted, will retry next period");
        }
    }
    debug!("gc loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlobRecord, BlobUpload, Report, report_key};
    use crate::impls::{InMemoryBlobStore, InMemoryMedium};
    use crate::ports::{KeyValueMedium, StampedIdGenerator, SystemClock};
    use async_trait::async_trait;

    struct Fixture {
        blobs: Arc<InMemoryBlobStore>,
        documents: DocumentStore,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(SystemClock);
        Fixture {
            blobs: Arc::new(InMemoryBlobStore::new(
                Arc::new(StampedIdGenerator::new(clock.clone())),
                clock,
            )),
            documents: DocumentStore::new(Arc::new(InMemoryMedium::new())),
        }
    }

    async fn put(blobs: &InMemoryBlobStore, owner: &ReportId, name: &str) -> BlobId {
        blobs
            .put(BlobUpload::new(owner.clone(), name, "image/jpeg", vec![0; 8]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_referenced_kept_and_unreferenced_collected() {
        let fx = fixture();
        let owner = ReportId::new("QA-alice-forest-pack-1");
        let kept = put(&fx.blobs, &owner, "kept.jpg").await;
        let dropped = put(&fx.blobs, &owner, "dropped.jpg").await;
        let stranger = put(&fx.blobs, &ReportId::new("QA-gone-1"), "x.jpg").await;

        let mut report = Report::new("alice", "forest-pack", owner);
        report.issues[0].image_ids.push(kept.clone());
        fx.documents
            .put(&report_key("alice", "forest-pack"), &report)
            .await
            .unwrap();

        let collector = OrphanCollector::new(fx.blobs.clone(), fx.documents.clone());
        let outcome = collector.collect_once().await.unwrap();

        assert_eq!(
            outcome,
            CollectReport { scanned: 3, orphaned: 2, deleted: 2, failed: 0, swept: 0 }
        );
        assert!(fx.blobs.get(&kept).await.is_ok());
        assert!(fx.blobs.get(&dropped).await.unwrap_err().is_not_found());
        assert!(fx.blobs.get(&stranger).await.unwrap_err().is_not_found());
        assert_eq!(collector.phase(), CollectorPhase::Idle);
    }

    #[tokio::test]
    async fn test_null_fields_in_document_keep_its_blobs() {
        let fx = fixture();
        let owner = ReportId::new("R1");
        let blob = put(&fx.blobs, &owner, "shot.jpg").await;

        let medium = Arc::new(InMemoryMedium::new());
        let documents = DocumentStore::new(medium.clone());
        let raw = format!(
            r#"{{"reportId":"R1","testerName":"alice","packName":"forest-pack","issues":[{{"notes":null,"imageIds":["{blob}"]}}]}}"#
        );
        medium.set(&report_key("alice", "forest-pack"), &raw).await.unwrap();
        assert_eq!(documents.get_for("alice", "forest-pack").await.unwrap().issues[0].notes, "");

        let collector = OrphanCollector::new(fx.blobs.clone(), documents);
        let outcome = collector.collect_once().await.unwrap();
        assert_eq!(outcome.orphaned, 0);
        assert!(fx.blobs.get(&blob).await.is_ok());
    }

    #[tokio::test]
    async fn test_collect_sweeps_uncommitted_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let clock: Arc<dyn crate::ports::Clock> = Arc::new(SystemClock);
        let blobs = Arc::new(
            crate::impls::FsBlobStore::open(
                dir.path(),
                Arc::new(StampedIdGenerator::new(clock.clone())),
                clock,
            )
            .await
            .unwrap(),
        );
        std::fs::write(dir.path().join("abandoned.bin.tmp"), [0u8; 16]).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let collector = OrphanCollector::new(blobs, DocumentStore::new(Arc::new(InMemoryMedium::new())))
            .with_uncommitted_grace(Duration::ZERO);
        assert_eq!(collector.collect_once().await.unwrap().swept, 1);
        assert!(!dir.path().join("abandoned.bin.tmp").exists());
    }

    #[tokio::test]
    async fn test_reference_from_another_report_does_not_keep_foreign_blob() {
        // owner の report が消えていれば、他の report が id を持っていても回収する
        let fx = fixture();
        let gone = ReportId::new("QA-gone-1");
        let blob = put(&fx.blobs, &gone, "shared.jpg").await;

        let mut other = Report::new("bob", "desert-pack", ReportId::new("QA-bob-1"));
        other.issues[0].image_ids.push(blob.clone());
        fx.documents
            .put(&report_key("bob", "desert-pack"), &other)
            .await
            .unwrap();

        let collector = OrphanCollector::new(fx.blobs.clone(), fx.documents.clone());
        assert_eq!(collector.collect_once().await.unwrap().deleted, 1);
    }

    /// delete だけ失敗する BlobStore
    struct StubbornBlobStore {
        inner: Arc<InMemoryBlobStore>,
        stubborn: BlobId,
    }

    #[async_trait]
    impl BlobStore for StubbornBlobStore {
        async fn put(&self, upload: BlobUpload) -> Result<BlobId, StoreError> {
            self.inner.put(upload).await
        }
        async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StoreError> {
            self.inner.get(id).await
        }
        async fn record(&self, id: &BlobId) -> Result<BlobRecord, StoreError> {
            self.inner.record(id).await
        }
        async fn delete(&self, id: &BlobId) -> Result<(), StoreError> {
            if id == &self.stubborn {
                return Err(StoreError::StorageUnavailable("locked".into()));
            }
            self.inner.delete(id).await
        }
        async fn records(&self) -> Result<Vec<BlobRecord>, StoreError> {
            self.inner.records().await
        }
    }

    #[tokio::test]
    async fn test_delete_failure_is_skipped() {
        let fx = fixture();
        let owner = ReportId::new("QA-gone-1");
        let stubborn = put(&fx.blobs, &owner, "a.jpg").await;
        put(&fx.blobs, &owner, "b.jpg").await;

        let store = Arc::new(StubbornBlobStore {
            inner: fx.blobs.clone(),
            stubborn: stubborn.clone(),
        });
        let collector = OrphanCollector::new(store, fx.documents.clone());
        let outcome = collector.collect_once().await.unwrap();

        assert_eq!(outcome.orphaned, 2);
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.failed, 1);
        assert!(fx.blobs.get(&stubborn).await.is_ok());
    }

    #[tokio::test]
    async fn test_loop_runs_on_spawn_and_stops() {
        let fx = fixture();
        put(&fx.blobs, &ReportId::new("QA-gone-1"), "a.jpg").await;

        let collector = Arc::new(OrphanCollector::new(fx.blobs.clone(), fx.documents.clone()));
        let gc = GcLoop::spawn(collector, Duration::from_secs(3600));

        tokio::time::timeout(Duration::from_secs(5), async {
            while fx.blobs.total_size().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        gc.shutdown_and_join().await;
    }
}
