//! FsBlobStore - ローカルファイルシステム上の BlobStore
//!
//! # レイアウト
//! - `<root>/<sha3(id)>.bin`  : バイト列
//! - `<root>/<sha3(id)>.json` : BlobRecord（コミットマーカー）
//!
//! バイト列を先に書き、メタデータを最後に temp + rename で置きます。
//! メタデータが無い blob は存在しないものとして扱うので、書き込み途中の
//! blob が集計に混ざることはありません。中断された put が残した `.bin` や
//! `*.tmp` は `sweep_uncommitted` が猶予期間の後に消します。

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use sha3::{Digest, Sha3_256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{BlobId, BlobRecord, BlobUpload, StoreError};
use crate::impls::fs_io::{remove_if_present, write_atomic};
use crate::ports::{BlobStore, Clock, IdGenerator};

const DATA_EXT: &str = "bin";
const META_EXT: &str = "json";

pub struct FsBlobStore {
    root: PathBuf,
    id_gen: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    capacity: Option<u64>,
    /// put を直列化（容量チェックと書き込みの間に割り込ませない）
    write_lock: Mutex<()>,
}

impl FsBlobStore {
    /// Open (creating if needed) a blob directory.
    pub async fn open(
        root: impl AsRef<Path>,
        id_gen: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::from_io(&root.display().to_string(), e))?;
        debug!(root = %root.display(), "opened blob directory");
        Ok(Self {
            root,
            id_gen,
            clock,
            capacity: None,
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stem(id: &BlobId) -> String {
        hex::encode(Sha3_256::digest(id.as_str().as_bytes()))
    }

    fn data_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(format!("{}.{DATA_EXT}", Self::stem(id)))
    }

    fn meta_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(format!("{}.{META_EXT}", Self::stem(id)))
    }

    async fn read_record(&self, id: &BlobId) -> Result<BlobRecord, StoreError> {
        let path = self.meta_path(id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StoreError::from_io(&path.display().to_string(), e)),
        };
        serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
            key: id.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, upload: BlobUpload) -> Result<BlobId, StoreError> {
        let _guard = self.write_lock.lock().await;
        let size = upload.byte_size();

        if let Some(capacity) = self.capacity {
            let used = self.total_size().await?;
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
            owner_report_id: upload.owner_report_id,
            file_name: upload.file_name,
            media_type: upload.media_type,
            byte_size: size,
            created_at: self.clock.now(),
        };
        let meta = serde_json::to_vec(&record)
            .map_err(|e| StoreError::InvalidInput(e.to_string()))?;

        let data_path = self.data_path(&id);
        write_atomic(&data_path, &upload.bytes).await?;
        if let Err(e) = write_atomic(&self.meta_path(&id), &meta).await {
            let _ = remove_if_present(&data_path).await;
            return Err(e);
        }
        debug!(blob_id = %id, bytes = size, "stored blob");
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StoreError> {
        self.read_record(id).await?;
        let path = self.data_path(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::from_io(&path.display().to_string(), e)),
        }
    }

    async fn record(&self, id: &BlobId) -> Result<BlobRecord, StoreError> {
        self.read_record(id).await
    }

    async fn delete(&self, id: &BlobId) -> Result<(), StoreError> {
        // メタデータを先に消す（以降この blob は見えない）
        remove_if_present(&self.meta_path(id)).await?;
        remove_if_present(&self.data_path(id)).await?;
        debug!(blob_id = %id, "deleted blob");
        Ok(())
    }

    async fn records(&self) -> Result<Vec<BlobRecord>, StoreError> {
        let context = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::from_io(&context, e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(&context, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(META_EXT) {
                continue;
            }
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                // 並行 delete で消えた
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::from_io(&path.display().to_string(), e)),
            };
            match serde_json::from_slice::<BlobRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt blob record"),
            }
        }
        Ok(records)
    }

    async fn sweep_uncommitted(&self, grace: Duration) -> Result<usize, StoreError> {
        // 進行中の put のファイルは消さない
        let _guard = self.write_lock.lock().await;
        let now = SystemTime::from(self.clock.now());
        let context = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::from_io(&context, e))?;

        let mut swept = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(&context, e))?
        {
            let path = entry.path();
            let leftover = match path.extension().and_then(|s| s.to_str()) {
                Some("tmp") => true,
                Some(DATA_EXT) => !fs::try_exists(path.with_extension(META_EXT))
                    .await
                    .unwrap_or(true),
                _ => false,
            };
            if !leftover {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat leftover blob file");
                    continue;
                }
            };
            if !now.duration_since(modified).is_ok_and(|age| age >= grace) {
                continue;
            }

            remove_if_present(&path).await?;
            debug!(path = %path.display(), "swept uncommitted blob file");
            swept += 1;
        }
        Ok(swept)
    }
}
