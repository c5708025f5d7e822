//! DocumentStore - 提出済み report の保存先
//!
//! KeyValueMedium の `qa-report-` 名前空間だけを扱います。同じ媒体に
//! 下書き（`qa-form-temp-`）や無関係なキーがあっても拾いません。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{Report, StoreError, is_report_key, report_key};
use crate::ports::KeyValueMedium;

/// DocumentStore は key → Report のフラットな保存先
///
/// # 設計原則
/// - `put` は上書き（last write wins、楽観ロックなし）
/// - 壊れたドキュメントは NotFound と同じ扱い（warn ログのみ）
/// - `delete` は冪等
#[derive(Clone)]
pub struct DocumentStore {
    medium: Arc<dyn KeyValueMedium>,
}

impl DocumentStore {
    pub fn new(medium: Arc<dyn KeyValueMedium>) -> Self {
        Self { medium }
    }

    pub async fn put(&self, key: &str, report: &Report) -> Result<(), StoreError> {
        let json = report.to_json()?;
        self.medium.set(key, &json).await?;
        debug!(key, bytes = json.len(), "stored report document");
        Ok(())
    }

    /// Raw value of `key`. An entry the medium cannot read is absent.
    async fn read_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.medium.get(key).await {
            Err(e @ StoreError::Corrupt { .. }) => {
                warn!(key, error = %e, "treating unreadable report entry as absent");
                Ok(None)
            }
            other => other,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Report, StoreError> {
        let raw = self
            .read_raw(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        match Report::from_json(key, &raw) {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(key, error = %e, "treating corrupt report document as absent");
                Err(StoreError::NotFound(key.to_string()))
            }
        }
    }

    /// `get` keyed by `(tester, pack)`.
    pub async fn get_for(&self, tester: &str, pack: &str) -> Result<Report, StoreError> {
        self.get(&report_key(tester, pack)).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.medium.remove(key).await
    }

    /// Every readable report document. Corrupt entries are skipped.
    pub async fn enumerate(&self) -> Result<Vec<(String, Report)>, StoreError> {
        let mut keys: Vec<String> = self
            .medium
            .keys()
            .await?
            .into_iter()
            .filter(|k| is_report_key(k))
            .collect();
        keys.sort();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            // enumerate と get の間に消えたものは飛ばす
            let Some(raw) = self.read_raw(&key).await? else {
                continue;
            };
            match Report::from_json(&key, &raw) {
                Ok(report) => out.push((key, report)),
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt report document"),
            }
        }
        Ok(out)
    }

    /// Stored JSON length of `key`, if present.
    pub async fn stored_len(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.read_raw(key).await?.map(|raw| raw.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReportId, draft_key};
    use crate::impls::{FsMedium, InMemoryMedium};
    use tempfile::TempDir;

    fn store() -> (DocumentStore, Arc<InMemoryMedium>) {
        let medium = Arc::new(InMemoryMedium::new());
        (DocumentStore::new(medium.clone()), medium)
    }

    #[tokio::test]
    async fn test_put_get_overwrites() {
        let (docs, _) = store();
        let key = report_key("alice", "forest-pack");
        let mut report = Report::new("alice", "forest-pack", ReportId::new("QA-1"));

        docs.put(&key, &report).await.unwrap();
        report.issues[0].description = "seam".into();
        docs.put(&key, &report).await.unwrap();

        let loaded = docs.get_for("alice", "forest-pack").await.unwrap();
        assert_eq!(loaded.issues[0].description, "seam");
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_read_as_not_found() {
        let (docs, medium) = store();
        assert!(docs.get("qa-report-x-y").await.unwrap_err().is_not_found());

        medium.set("qa-report-x-y", "{broken").await.unwrap();
        assert!(docs.get("qa-report-x-y").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_enumerate_ignores_other_namespaces() {
        let (docs, medium) = store();
        let report = Report::new("alice", "forest-pack", ReportId::new("QA-1"));
        docs.put(&report_key("alice", "forest-pack"), &report).await.unwrap();
        medium
            .set(&draft_key("alice", "forest-pack"), &report.to_json().unwrap())
            .await
            .unwrap();
        medium.set("theme", "dark").await.unwrap();
        medium.set("qa-report-bad-entry", "nope").await.unwrap();

        let all = docs.enumerate().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "qa-report-alice-forest-pack");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (docs, _) = store();
        let key = report_key("a", "b");
        docs.put(&key, &Report::default()).await.unwrap();
        docs.delete(&key).await.unwrap();
        docs.delete(&key).await.unwrap();
        assert!(docs.get(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped_and_absent() {
        let dir = TempDir::new().unwrap();
        let medium = Arc::new(FsMedium::open(dir.path()).await.unwrap());
        let docs = DocumentStore::new(medium.clone());
        let report = Report::new("alice", "forest-pack", ReportId::new("QA-1"));
        docs.put(&report_key("alice", "forest-pack"), &report).await.unwrap();

        let damaged = report_key("bob", "desert-pack");
        std::fs::write(medium.path_for(&damaged), [0xc3, 0x28, 0xff]).unwrap();

        assert!(docs.get(&damaged).await.unwrap_err().is_not_found());
        assert_eq!(docs.stored_len(&damaged).await.unwrap(), None);
        let all = docs.enumerate().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1, report);
    }
}
