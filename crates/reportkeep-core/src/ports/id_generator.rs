//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために trait として抽象化しています。
//!
//! # 実装
//! - **StampedIdGenerator**: Clock の millis を単調増加させて埋め込む

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::domain::ids::{BlobId, ReportId, compose_blob_id, compose_report_id};
use crate::ports::Clock;

/// IdGenerator は report / blob の ID を生成
///
/// # 一意性
/// - 同じ generator から出る millis は厳密に単調増加
/// - 時計が止まっていても（FixedClock）、巻き戻っても重複しない
pub trait IdGenerator: Send + Sync {
    /// Report ID を生成（report の最初の作成時にだけ呼ぶ）
    fn report_id(&self, tester: &str, pack: &str) -> ReportId;

    /// Blob ID を生成
    fn blob_id(&self, owner: &ReportId, file_name: &str) -> BlobId;
}

/// StampedIdGenerator は Clock ベースの ID 生成器
pub struct StampedIdGenerator {
    clock: Arc<dyn Clock>,
    last_millis: AtomicI64,
}

impl StampedIdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_millis: AtomicI64::new(i64::MIN),
        }
    }

    /// max(clock, last + 1)
    fn next_millis(&self) -> i64 {
        let now = self.clock.now().timestamp_millis();
        let mut last = self.last_millis.load(Ordering::Relaxed);
        loop {
            let next = if now > last { now } else { last + 1 };
            match self.last_millis.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

impl IdGenerator for StampedIdGenerator {
    fn report_id(&self, tester: &str, pack: &str) -> ReportId {
        compose_report_id(tester, pack, self.next_millis())
    }

    fn blob_id(&self, owner: &ReportId, file_name: &str) -> BlobId {
        compose_blob_id(owner, self.next_millis(), file_name)
    }
}
