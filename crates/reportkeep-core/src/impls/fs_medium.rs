//! FsMedium - ローカルファイルシステム上の KeyValueMedium
//!
//! 1 key = 1 ファイル（`<root>/<sha3(key)>.json`）。長い key や非 ASCII の
//! key でもファイル名の長さが一定になるよう hash にします。元の key は
//! ファイルの中身（`{"key": ..., "value": ...}`）に残すので `keys` で列挙できます。
//! 書き込みは temp + rename。
//!
//! 容量は InMemoryMedium と同じく「key の長さ + value の長さ」で数えます。

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::StoreError;
use crate::impls::fs_io::{remove_if_present, write_atomic};
use crate::ports::KeyValueMedium;

const VALUE_EXT: &str = "json";

/// ファイル 1 つ分の中身
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: String,
}

impl StoredEntry {
    fn cost(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64
    }
}

pub struct FsMedium {
    root: PathBuf,
    capacity: Option<u64>,
    write_lock: Mutex<()>,
}

impl FsMedium {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::from_io(&root.display().to_string(), e))?;
        debug!(root = %root.display(), "opened key/value directory");
        Ok(Self {
            root,
            capacity: None,
            write_lock: Mutex::new(()),
        })
    }

    /// Reject writes that would take the summed key and value lengths
    /// past `bytes`.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    pub(crate) fn path_for(&self, key: &str) -> PathBuf {
        let stem = hex::encode(Sha3_256::digest(key.as_bytes()));
        self.root.join(format!("{stem}.{VALUE_EXT}"))
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>, StoreError> {
        let context = path.display().to_string();
        match fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: context,
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::from_io(&context, e)),
        }
    }

    /// Every readable entry. Unreadable files are logged and skipped.
    async fn entries(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let context = self.root.display().to_string();
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::from_io(&context, e))?;

        let mut out = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(&context, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(VALUE_EXT) {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(Some(stored)) => out.push(stored),
                // 並行 remove で消えた
                Ok(None) => continue,
                Err(e @ StoreError::Corrupt { .. }) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable key/value file");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl KeyValueMedium for FsMedium {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match Self::read_entry(&self.path_for(key)).await {
            Ok(Some(stored)) if stored.key == key => Ok(Some(stored.value)),
            Ok(Some(stored)) => Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("file holds key {:?}", stored.key),
            }),
            Ok(None) => Ok(None),
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(key, reason = %reason, "stored value is unreadable");
                Err(StoreError::Corrupt {
                    key: key.to_string(),
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let stored = StoredEntry {
            key: key.to_string(),
            value: value.to_string(),
        };

        if let Some(capacity) = self.capacity {
            // 上書きされる値の分は差し引いて数える
            let others: u64 = self
                .entries()
                .await?
                .iter()
                .filter(|e| e.key != key)
                .map(StoredEntry::cost)
                .sum();
            let needed = stored.cost();
            if others + needed > capacity {
                debug!(key, needed, "medium write rejected for capacity");
                return Err(StoreError::CapacityExceeded {
                    needed,
                    available: capacity.saturating_sub(others),
                });
            }
        }

        let raw = serde_json::to_vec(&stored).map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        write_atomic(&self.path_for(key), &raw).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        remove_if_present(&self.path_for(key)).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries().await?.into_iter().map(|e| e.key).collect())
    }
}
