//! Domain identifiers (strongly-typed IDs).
//!
//! ID は文字列ですが、Phantom type パターンで種類を区別します。
//! `ReportId` と `BlobId` はどちらも `Id<T>` で、混同するとコンパイルエラーになります。
//!
//! ## 生成規則
//! - **ReportId**: `QA-{tester}-{pack}-{millis}`（最初の作成時に一度だけ決まる）
//! - **BlobId**: `{reportId}-{millis}-{fileName}`（単調増加する millis + ファイル名で一意）
//!
//! 生成そのものは `ports::IdGenerator` が担当し、ここでは形だけを定義します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
///
/// ログやエラーメッセージに使うラベル（"report", "blob"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn label() -> &'static str;
}

/// ジェネリック ID 型
///
/// JSON 上はただの文字列（`#[serde(transparent)]`）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 既存の文字列から Id を作成（保存済みドキュメントの復元など）
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn label() -> &'static str {
        T::label()
    }
}

/// 空文字列（まだ割り当てられていない ID）
impl<T: IdMarker> Default for Id<T> {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> AsRef<str> for Id<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Report のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Report {}

impl IdMarker for Report {
    fn label() -> &'static str {
        "report"
    }
}

/// Blob のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Blob {}

impl IdMarker for Blob {
    fn label() -> &'static str {
        "blob"
    }
}

/// Stable token scoping blob ownership for one logical report.
pub type ReportId = Id<Report>;

/// Identifier of a stored image blob.
pub type BlobId = Id<Blob>;

/// Build a report id from its parts. Pure; the caller supplies the instant.
pub fn compose_report_id(tester: &str, pack: &str, millis: i64) -> ReportId {
    ReportId::new(format!("QA-{tester}-{pack}-{millis}"))
}

/// Build a blob id from its parts. Pure; the caller supplies the instant.
pub fn compose_blob_id(owner: &ReportId, millis: i64, file_name: &str) -> BlobId {
    BlobId::new(format!("{owner}-{millis}-{file_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = BlobId::new("QA-alice-forest-1-2-shot.png");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"QA-alice-forest-1-2-shot.png\"");

        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn composed_ids_follow_layout() {
        let report = compose_report_id("alice", "forest-pack", 1_700_000_000_000);
        assert_eq!(report.as_str(), "QA-alice-forest-pack-1700000000000");

        let blob = compose_blob_id(&report, 1_700_000_000_123, "crack.jpg");
        assert_eq!(
            blob.as_str(),
            "QA-alice-forest-pack-1700000000000-1700000000123-crack.jpg"
        );
    }

    #[test]
    fn labels_differ_per_marker() {
        assert_eq!(ReportId::label(), "report");
        assert_eq!(BlobId::label(), "blob");
        // let _: BlobId = ReportId::new("x"); // <- does not compile
    }
}
