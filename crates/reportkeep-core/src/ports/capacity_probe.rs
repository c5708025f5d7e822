//! CapacityProbe port - 媒体の総容量の問い合わせ
//!
//! # 実装
//! - **FilesystemCapacityProbe**: fs4 で実際のファイルシステム容量を取得
//! - **FixedCapacity**: 固定値（InMemory 構成やテスト用）

/// Best-effort capacity discovery. `None` means "unknown"; the caller
/// falls back to its default.
pub trait CapacityProbe: Send + Sync {
    fn capacity(&self) -> Option<u64>;
}
