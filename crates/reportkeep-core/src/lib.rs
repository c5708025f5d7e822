//! reportkeep-core
//!
//! Local persistence for QA inspection reports: image blobs, submitted
//! report documents and autosaved drafts, kept consistent without
//! cross-store transactions.
//!
//! # モジュール構成
//! - **domain**: 値型（ids, Report / Issue / ChecklistStatus, DraftSlot, BlobRecord, errors, keys）
//! - **ports**: 抽象化レイヤー（BlobStore, KeyValueMedium, CapacityProbe, Clock, IdGenerator）
//! - **impls**: 実装（InMemory / ファイルシステム）
//! - **app**: DocumentStore, DraftStore, CompressionLadder, QuotaOracle, OrphanCollector, AutosaveScheduler, ReportSession
//! - **config**: 環境変数からの StoreConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{Depot, DepotBuilder};
pub use config::StoreConfig;
