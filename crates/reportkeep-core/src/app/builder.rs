//! DepotBuilder - ストア一式の構築とワイヤリング
//!
//! StoreConfig から媒体（メモリ / ファイルシステム）を選び、全コンポーネントを
//! 同じ媒体ハンドルでつなぎます。グローバルな singleton は作りません。
//!
//! # Fail-fast 設計
//! - root ディレクトリが作れない・読めない場合は build() が BuildError を返す

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::app::autosave::{AutosaveScheduler, SnapshotSource};
use crate::app::compression::CompressionLadder;
use crate::app::documents::DocumentStore;
use crate::app::drafts::DraftStore;
use crate::app::gc_loop::{GcLoop, OrphanCollector};
use crate::app::quota::QuotaOracle;
use crate::app::session::{ReportSession, SessionStores, UploadLimits};
use crate::config::StoreConfig;
use crate::domain::{StoreError, report_key};
use crate::impls::{
    FilesystemCapacityProbe, FixedCapacity, FsBlobStore, FsMedium, InMemoryBlobStore,
    InMemoryMedium, UnknownCapacity,
};
use crate::ports::{
    BlobStore, CapacityProbe, Clock, IdGenerator, KeyValueMedium, StampedIdGenerator, SystemClock,
};

const BLOB_DIR: &str = "blobs";
const KV_DIR: &str = "kv";

/// BuildError はストア構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("could not open store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// 選ばれた媒体
struct Backend {
    blobs: Arc<dyn BlobStore>,
    medium: Arc<dyn KeyValueMedium>,
    probe: Arc<dyn CapacityProbe>,
}

/// DepotBuilder は Depot を構築
///
/// # 使用例
/// ```ignore
/// let depot = DepotBuilder::new(StoreConfig::from_env()).build().await?;
/// let session = depot.open_session("alice", "forest-pack").await?;
/// ```
pub struct DepotBuilder {
    config: StoreConfig,
    clock: Option<Arc<dyn Clock>>,
    probe: Option<Arc<dyn CapacityProbe>>,
}

impl DepotBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            clock: None,
            probe: None,
        }
    }

    /// Clock を差し替え（テスト用）
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// CapacityProbe を差し替え
    pub fn with_capacity_probe(mut self, probe: Arc<dyn CapacityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub async fn build(self) -> Result<Depot, BuildError> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let id_gen: Arc<dyn IdGenerator> = Arc::new(StampedIdGenerator::new(clock.clone()));

        let backend = match &config.root {
            None => {
                let mut blobs = InMemoryBlobStore::new(id_gen.clone(), clock.clone());
                if let Some(quota) = config.blob_quota_bytes {
                    blobs = blobs.with_capacity(quota);
                }
                let mut medium = InMemoryMedium::new();
                if let Some(quota) = config.document_quota_bytes {
                    medium = medium.with_capacity(quota);
                }
                Backend {
                    blobs: Arc::new(blobs),
                    medium: Arc::new(medium),
                    probe: Arc::new(UnknownCapacity),
                }
            }
            Some(root) => {
                let blob_dir = root.join(BLOB_DIR);
                let mut blobs = FsBlobStore::open(&blob_dir, id_gen.clone(), clock.clone())
                    .await
                    .map_err(|source| open_error(&blob_dir, source))?;
                if let Some(quota) = config.blob_quota_bytes {
                    blobs = blobs.with_capacity(quota);
                }
                let kv_dir = root.join(KV_DIR);
                let mut medium = FsMedium::open(&kv_dir)
                    .await
                    .map_err(|source| open_error(&kv_dir, source))?;
                if let Some(quota) = config.document_quota_bytes {
                    medium = medium.with_capacity(quota);
                }
                Backend {
                    blobs: Arc::new(blobs),
                    medium: Arc::new(medium),
                    probe: Arc::new(FilesystemCapacityProbe::new(root.clone())),
                }
            }
        };

        // blob の hard limit があれば、それが総容量
        let probe: Arc<dyn CapacityProbe> = match (self.probe, config.blob_quota_bytes) {
            (Some(probe), _) => probe,
            (None, Some(quota)) => Arc::new(FixedCapacity(quota)),
            (None, None) => backend.probe,
        };
        let Backend { blobs, medium, .. } = backend;

        let documents = DocumentStore::new(medium.clone());
        let drafts = DraftStore::new(medium.clone(), clock.clone())
            .with_ttl(config.draft_ttl)
            .with_ladder(CompressionLadder::new(
                config.compress_max_edge,
                config.compress_quality,
            ));
        let quota = QuotaOracle::new(blobs.clone(), probe)
            .with_default_total(config.default_capacity_bytes);
        let collector = Arc::new(OrphanCollector::new(blobs.clone(), documents.clone()));

        info!(
            root = ?config.root,
            blob_quota = ?config.blob_quota_bytes,
            document_quota = ?config.document_quota_bytes,
            "store opened"
        );

        Ok(Depot {
            stores: SessionStores {
                blobs,
                documents,
                drafts,
                id_gen,
                clock,
                limits: UploadLimits {
                    max_upload_bytes: config.max_upload_bytes,
                    max_images_per_issue: config.max_images_per_issue,
                },
            },
            medium,
            quota,
            collector,
            config,
        })
    }
}

fn open_error(path: &Path, source: StoreError) -> BuildError {
    BuildError::Open {
        path: path.display().to_string(),
        source,
    }
}

/// Depot は構築済みのストア一式
pub struct Depot {
    stores: SessionStores,
    medium: Arc<dyn KeyValueMedium>,
    quota: QuotaOracle,
    collector: Arc<OrphanCollector>,
    config: StoreConfig,
}

impl Depot {
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.stores.blobs
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.stores.documents
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.stores.drafts
    }

    pub fn quota(&self) -> &QuotaOracle {
        &self.quota
    }

    pub fn collector(&self) -> &Arc<OrphanCollector> {
        &self.collector
    }

    /// The shared key/value medium under documents and drafts.
    pub fn medium(&self) -> &Arc<dyn KeyValueMedium> {
        &self.medium
    }

    pub async fn open_session(&self, tester: &str, pack: &str) -> Result<ReportSession, StoreError> {
        ReportSession::open(self.stores.clone(), tester, pack).await
    }

    /// Remove the submitted report for `(tester, pack)`, every blob it owns,
    /// and its draft. Returns the number of blobs deleted.
    pub async fn delete_report(&self, tester: &str, pack: &str) -> Result<usize, StoreError> {
        let key = report_key(tester, pack);
        let deleted = match self.stores.documents.get(&key).await {
            Ok(report) => {
                self.stores.documents.delete(&key).await?;
                self.stores.blobs.delete_by_owner(&report.report_id).await?
            }
            Err(e) if e.is_not_found() => {
                // 壊れていても消す
                self.stores.documents.delete(&key).await?;
                0
            }
            Err(e) => return Err(e),
        };
        self.stores.drafts.clear(tester, pack).await?;
        info!(key = %key, blobs = deleted, "deleted report");
        Ok(deleted)
    }

    /// Start the orphan collector on the configured period.
    pub fn spawn_gc(&self) -> GcLoop {
        GcLoop::spawn(self.collector.clone(), self.config.gc_interval)
    }

    /// Start autosaving `source` on the configured interval.
    pub fn spawn_autosave(&self, source: Arc<dyn SnapshotSource>) -> AutosaveScheduler {
        AutosaveScheduler::spawn(
            self.stores.drafts.clone(),
            source,
            self.config.autosave_interval,
        )
    }
}
