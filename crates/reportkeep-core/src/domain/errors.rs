//! Errors - エラー型と分類
//!
//! # 伝播方針
//! - BlobStore / DocumentStore: そのまま呼び出し側へ返す
//! - DraftStore: CapacityExceeded は内部の ladder で吸収し、最後の失敗だけ返す
//! - OrphanCollector: 個別の失敗はログのみ

use thiserror::Error;

/// ErrorKind はストアエラーの運用分類
///
/// - Recoverable: 対象が無い・壊れている（呼び出し側がデフォルトで代用）
/// - Capacity: 容量不足（DraftStore の fallback ladder が反応する）
/// - Infrastructure: 媒体そのものが使えない（リトライはこの層ではしない）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Recoverable,
    Capacity,
    Infrastructure,
}

/// StoreError は永続化層の共通エラー
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exceeded: needed {needed} bytes, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("payload of {size} bytes exceeds the {limit} byte upload limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) | StoreError::Corrupt { .. } => ErrorKind::Recoverable,
            StoreError::CapacityExceeded { .. } => ErrorKind::Capacity,
            StoreError::StorageUnavailable(_) => ErrorKind::Infrastructure,
            StoreError::PayloadTooLarge { .. } | StoreError::InvalidInput(_) => {
                ErrorKind::Recoverable
            }
        }
    }

    pub fn is_capacity(&self) -> bool {
        self.kind() == ErrorKind::Capacity
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Map an I/O failure from a backing medium.
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(context.to_string()),
            std::io::ErrorKind::StorageFull => StoreError::CapacityExceeded {
                needed: 0,
                available: 0,
            },
            _ => StoreError::StorageUnavailable(format!("{context}: {err}")),
        }
    }
}

/// DraftError は DraftStore::save の最終的な失敗
#[derive(Debug, Error)]
pub enum DraftError {
    /// Every rung of the fallback ladder was rejected. Only the durable
    /// backup is lost; the in-memory report is untouched.
    #[error("draft could not be saved even without images: {reason}")]
    Unsavable { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(StoreError::NotFound("k".into()), ErrorKind::Recoverable)]
    #[case::corrupt(StoreError::Corrupt { key: "k".into(), reason: "eof".into() }, ErrorKind::Recoverable)]
    #[case::capacity(StoreError::CapacityExceeded { needed: 10, available: 1 }, ErrorKind::Capacity)]
    #[case::unavailable(StoreError::StorageUnavailable("disk".into()), ErrorKind::Infrastructure)]
    fn errors_are_classified(#[case] err: StoreError, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn storage_full_io_maps_to_capacity() {
        let err = StoreError::from_io(
            "write",
            std::io::Error::from(std::io::ErrorKind::StorageFull),
        );
        assert!(err.is_capacity());

        let err = StoreError::from_io("read", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_not_found());
    }
}
