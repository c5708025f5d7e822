//! DraftStore - 編集中 report の autosave 先
//!
//! `(tester, pack)` ごとに 1 スロット。`qa-form-temp-` 名前空間を使い、
//! DocumentStore とは key が衝突しません。
//!
//! # 容量不足時の fallback ladder
//! 1. そのまま書く
//! 2. CapacityExceeded なら inline 画像を CompressionLadder にかけて再試行
//! 3. まだ駄目なら inline 画像を外して再試行（`SaveOutcome::Degraded` を返す）
//! 4. それでも駄目なら `DraftError::Unsavable`
//!
//! 容量以外のエラーは ladder を回さずにそのまま返します。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::app::compression::CompressionLadder;
use crate::domain::{DEFAULT_DRAFT_TTL, DraftError, DraftSlot, Report, StoreError, draft_key};
use crate::ports::{Clock, KeyValueMedium};

/// How a successful `save` got its snapshot onto the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Inline images were recompressed to fit.
    Compressed,
    /// Inline images were dropped from the durable copy. The in-memory
    /// report still has them.
    Degraded { stripped_images: usize },
}

impl SaveOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SaveOutcome::Degraded { .. })
    }
}

#[derive(Clone)]
pub struct DraftStore {
    medium: Arc<dyn KeyValueMedium>,
    clock: Arc<dyn Clock>,
    ladder: CompressionLadder,
    ttl: Duration,
}

impl DraftStore {
    pub fn new(medium: Arc<dyn KeyValueMedium>, clock: Arc<dyn Clock>) -> Self {
        Self {
            medium,
            clock,
            ladder: CompressionLadder::default(),
            ttl: DEFAULT_DRAFT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_ladder(mut self, ladder: CompressionLadder) -> Self {
        self.ladder = ladder;
        self
    }

    async fn write(
        &self,
        key: &str,
        report: Report,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let json = DraftSlot::new(report, now).to_json()?;
        self.medium.set(key, &json).await?;
        debug!(key, bytes = json.len(), "wrote draft slot");
        Ok(())
    }

    /// Stamp `lastSavedAt = now` and write the snapshot, walking the
    /// fallback ladder on capacity errors.
    pub async fn save(
        &self,
        report: &Report,
        tester: &str,
        pack: &str,
    ) -> Result<SaveOutcome, DraftError> {
        let key = draft_key(tester, pack);
        let now = self.clock.now();

        let first = match self.write(&key, report.clone(), now).await {
            Ok(()) => return Ok(SaveOutcome::Saved),
            Err(e) if e.is_capacity() => e,
            Err(e) => return Err(e.into()),
        };
        if !report.has_inline_images() {
            // 外す画像が無いので、これ以上小さくできない
            return Err(DraftError::Unsavable {
                reason: first.to_string(),
            });
        }

        debug!(key = %key, "draft over capacity, compressing inline images");
        match self
            .write(&key, self.ladder.compress_report(report), now)
            .await
        {
            Ok(()) => return Ok(SaveOutcome::Compressed),
            Err(e) if e.is_capacity() => {}
            Err(e) => return Err(e.into()),
        }

        let stripped_images: usize = report.issues.iter().map(|i| i.images.len()).sum();
        match self.write(&key, report.without_inline_images(), now).await {
            Ok(()) => {
                warn!(key = %key, stripped_images, "draft saved without inline images");
                Ok(SaveOutcome::Degraded { stripped_images })
            }
            Err(e) if e.is_capacity() => {
                warn!(key = %key, error = %e, "draft could not be saved");
                Err(DraftError::Unsavable {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current slot, or `None` if absent, unreadable, or stale. A stale slot
    /// is removed by this read.
    pub async fn load(&self, tester: &str, pack: &str) -> Result<Option<DraftSlot>, StoreError> {
        let key = draft_key(tester, pack);
        let raw = match self.medium.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e @ StoreError::Corrupt { .. }) => {
                warn!(key = %key, error = %e, "treating unreadable draft as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let slot = match DraftSlot::from_json(&key, &raw) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(key = %key, error = %e, "treating corrupt draft as absent");
                return Ok(None);
            }
        };
        if slot.is_stale(self.clock.now(), self.ttl) {
            self.medium.remove(&key).await?;
            info!(key = %key, last_saved_at = %slot.last_saved_at, "discarded stale draft");
            return Ok(None);
        }
        Ok(Some(slot))
    }

    /// Idempotent.
    pub async fn clear(&self, tester: &str, pack: &str) -> Result<(), StoreError> {
        self.medium.remove(&draft_key(tester, pack)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::compression::tests::noisy_png;
    use crate::domain::{InlineImage, ReportId};
    use crate::impls::InMemoryMedium;
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn fixture() -> (Arc<FixedClock>, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        (Arc::new(FixedClock::new(now)), now)
    }

    fn report_with_image() -> Report {
        let mut report = Report::new("alice", "forest-pack", ReportId::new("QA-alice-forest-pack-1"));
        report.issues[0]
            .images
            .push(InlineImage::from_bytes("image/png", &noisy_png(200, 200)));
        report
    }

    fn slot_cost(report: Report, now: DateTime<Utc>) -> u64 {
        let key = draft_key("alice", "forest-pack");
        (key.len() + DraftSlot::new(report, now).to_json().unwrap().len()) as u64
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (clock, now) = fixture();
        let drafts = DraftStore::new(Arc::new(InMemoryMedium::new()), clock);
        let report = Report::new("alice", "forest-pack", ReportId::new("QA-1"));

        let outcome = drafts.save(&report, "alice", "forest-pack").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);

        let slot = drafts.load("alice", "forest-pack").await.unwrap().unwrap();
        assert_eq!(slot.report, report);
        assert_eq!(slot.last_saved_at, now);
    }

    #[tokio::test]
    async fn test_compressed_rung_succeeds_when_it_fits() {
        let (clock, now) = fixture();
        let report = report_with_image();
        let ladder = CompressionLadder::default();
        let capacity = slot_cost(ladder.compress_report(&report), now);

        let drafts = DraftStore::new(
            Arc::new(InMemoryMedium::new().with_capacity(capacity)),
            clock,
        );
        let outcome = drafts.save(&report, "alice", "forest-pack").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Compressed);
    }

    #[tokio::test]
    async fn test_degraded_rung_strips_images() {
        let (clock, now) = fixture();
        let report = report_with_image();
        let capacity = slot_cost(report.without_inline_images(), now);

        let drafts = DraftStore::new(
            Arc::new(InMemoryMedium::new().with_capacity(capacity)),
            clock,
        );
        let outcome = drafts.save(&report, "alice", "forest-pack").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Degraded { stripped_images: 1 });
        assert!(outcome.is_degraded());

        let slot = drafts.load("alice", "forest-pack").await.unwrap().unwrap();
        assert!(!slot.report.has_inline_images());
    }

    #[tokio::test]
    async fn test_exhausted_ladder_is_unsavable() {
        let (clock, _) = fixture();
        let drafts = DraftStore::new(Arc::new(InMemoryMedium::new().with_capacity(10)), clock);

        let err = drafts
            .save(&report_with_image(), "alice", "forest-pack")
            .await
            .unwrap_err();
        assert!(matches!(err, DraftError::Unsavable { .. }));
    }

    struct BrokenMedium;

    #[async_trait]
    impl KeyValueMedium for BrokenMedium {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn set(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::StorageUnavailable("disk gone".into()))
        }
        async fn remove(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn keys(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_non_capacity_failure_skips_ladder() {
        let (clock, _) = fixture();
        let drafts = DraftStore::new(Arc::new(BrokenMedium), clock);
        let err = drafts
            .save(&report_with_image(), "alice", "forest-pack")
            .await
            .unwrap_err();
        assert!(matches!(err, DraftError::Store(StoreError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_stale_slot_is_removed_on_load() {
        let (clock, _) = fixture();
        let medium = Arc::new(InMemoryMedium::new());
        let drafts = DraftStore::new(medium.clone(), clock.clone());
        drafts
            .save(&Report::default(), "alice", "forest-pack")
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(24));
        assert!(drafts.load("alice", "forest-pack").await.unwrap().is_some());

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(drafts.load("alice", "forest-pack").await.unwrap().is_none());
        assert_eq!(medium.get(&draft_key("alice", "forest-pack")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (clock, _) = fixture();
        let drafts = DraftStore::new(Arc::new(InMemoryMedium::new()), clock);
        drafts.clear("a", "b").await.unwrap();
        drafts.save(&Report::default(), "a", "b").await.unwrap();
        drafts.clear("a", "b").await.unwrap();
        drafts.clear("a", "b").await.unwrap();
        assert!(drafts.load("a", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_draft_file_loads_as_none() {
        let (clock, _) = fixture();
        let dir = tempfile::TempDir::new().unwrap();
        let medium = Arc::new(crate::impls::FsMedium::open(dir.path()).await.unwrap());
        let drafts = DraftStore::new(medium.clone(), clock);

        std::fs::write(medium.path_for(&draft_key("alice", "forest-pack")), [0xff, 0x00, 0xfe]).unwrap();
        assert!(drafts.load("alice", "forest-pack").await.unwrap().is_none());

        // 上書き保存で復旧する
        drafts.save(&Report::default(), "alice", "forest-pack").await.unwrap();
        assert!(drafts.load("alice", "forest-pack").await.unwrap().is_some());
    }
}
