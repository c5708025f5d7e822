//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて永続化の手順を実装します。
//!
//! # 主要コンポーネント
//! - **DepotBuilder / Depot**: 媒体の選択とワイヤリング
//! - **DocumentStore**: 提出済み report（`qa-report-*`）
//! - **DraftStore**: 編集中 report の autosave 先（`qa-form-temp-*`）と fallback ladder
//! - **CompressionLadder**: draft 用の画像縮小・再エンコード
//! - **QuotaOracle**: 使用量と総容量
//! - **OrphanCollector / GcLoop**: 参照されない blob の定期回収
//! - **AutosaveScheduler**: interval + 終了時フックの draft 保存
//! - **ReportSession**: 編集 UI 向けの facade

pub mod autosave;
pub mod builder;
pub mod compression;
pub mod documents;
pub mod drafts;
pub mod gc_loop;
pub mod quota;
pub mod session;

// 主要な型を再エクスポート
pub use self::autosave::{AutosaveScheduler, FlushOutcome, SnapshotSource};
pub use self::builder::{BuildError, Depot, DepotBuilder};
pub use self::compression::{CompressionError, CompressionLadder};
pub use self::documents::DocumentStore;
pub use self::drafts::{DraftStore, SaveOutcome};
pub use self::gc_loop::{CollectReport, CollectorPhase, GcLoop, OrphanCollector};
pub use self::quota::QuotaOracle;
pub use self::session::{ReportSession, SessionOrigin, SessionStores, UploadLimits};
