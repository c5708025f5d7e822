//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は永続化媒体（メモリ, ローカルファイルシステム）や時刻への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 画像は BlobStore、JSON ドキュメントは KeyValueMedium
//! - 二つの媒体をまたぐトランザクションは無い（整合性は OrphanCollector が回収）

pub mod blob_store;
pub mod capacity_probe;
pub mod clock;
pub mod id_generator;
pub mod kv_medium;

// 主要な trait を再エクスポート
pub use self::blob_store::BlobStore;
pub use self::capacity_probe::CapacityProbe;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, StampedIdGenerator};
pub use self::kv_medium::KeyValueMedium;
