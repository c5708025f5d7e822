//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBlobStore / InMemoryMedium**: テスト・一時利用向け（プロセス終了で消える）
//! - **FsBlobStore / FsMedium**: ローカルディレクトリに永続化
//! - **FixedCapacity / FilesystemCapacityProbe**: QuotaOracle の容量取得

pub mod capacity;
pub mod fs_blob;
mod fs_io;
pub mod fs_medium;
pub mod memory_blob;
pub mod memory_medium;

// 主要な型を再エクスポート
pub use self::capacity::{FilesystemCapacityProbe, FixedCapacity, UnknownCapacity};
pub use self::fs_blob::FsBlobStore;
pub use self::fs_medium::FsMedium;
pub use self::memory_blob::InMemoryBlobStore;
pub use self::memory_medium::InMemoryMedium;
