//! KeyValueMedium port - フラットな文字列 key/value 媒体
//!
//! DocumentStore と DraftStore は同じ媒体を共有し、キーの prefix で
//! 名前空間を分けます（`qa-report-` / `qa-form-temp-`）。

use async_trait::async_trait;

use crate::domain::StoreError;

/// KeyValueMedium は文字列値を保存する媒体
///
/// # 設計原則
/// - `set` は上書き（last write wins）
/// - 容量を超える書き込みは `CapacityExceeded` で拒否し、既存の値は変えない
/// - `remove` は冪等
#[async_trait]
pub trait KeyValueMedium: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently present, in no particular order.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}
