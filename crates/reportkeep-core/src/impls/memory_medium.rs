//! InMemoryMedium - 開発・テスト用の KeyValueMedium
//!
//! 容量は「key の長さ + value の長さ」の合計で数えます（ブラウザの
//! key/value ストレージと同じ数え方）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::StoreError;
use crate::ports::KeyValueMedium;

#[derive(Clone, Default)]
pub struct InMemoryMedium {
    entries: Arc<Mutex<HashMap<String, String>>>,
    capacity: Option<u64>,
}

fn entry_cost(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

impl InMemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would take the total past `bytes`.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Bytes currently accounted against the capacity.
    pub async fn used(&self) -> u64 {
        let entries = self.entries.lock().await;
        entries.iter().map(|(k, v)| entry_cost(k, v)).sum()
    }
}

#[async_trait]
impl KeyValueMedium for InMemoryMedium {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;

        if let Some(capacity) = self.capacity {
            // 上書きされる値の分は差し引いて数える
            let others: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_cost(k, v))
                .sum();
            let needed = entry_cost(key, value);
            if others + needed > capacity {
                debug!(key, needed, "medium write rejected for capacity");
                return Err(StoreError::CapacityExceeded {
                    needed,
                    available: capacity.saturating_sub(others),
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}
