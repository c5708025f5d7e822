//! Store configuration.
//!
//! Loaded from `REPORTKEEP_*` environment variables; anything missing or
//! unparseable keeps its default.

use std::path::PathBuf;
use std::time::Duration;

use crate::app::gc_loop::DEFAULT_GC_INTERVAL;
use crate::domain::{DEFAULT_CAPACITY_BYTES, DEFAULT_DRAFT_TTL};

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_IMAGES_PER_ISSUE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Directory for the filesystem backend. `None` keeps everything in memory.
    pub root: Option<PathBuf>,
    /// Time between autosave flushes (default: 30s)
    pub autosave_interval: Duration,
    /// Time between orphan collector runs (default: 24h)
    pub gc_interval: Duration,
    /// Drafts older than this are discarded on load (default: 24h)
    pub draft_ttl: Duration,
    /// Total reported when the platform capacity is unknown (default: 10 GiB)
    pub default_capacity_bytes: u64,
    /// Hard limit on the blob medium
    pub blob_quota_bytes: Option<u64>,
    /// Hard limit on the document/draft medium
    pub document_quota_bytes: Option<u64>,
    /// Largest single image upload (default: 10 MiB)
    pub max_upload_bytes: u64,
    /// Images per issue (default: 10)
    pub max_images_per_issue: usize,
    /// Longer edge after draft compression (default: 1024)
    pub compress_max_edge: u32,
    /// JPEG quality for draft compression (default: 70)
    pub compress_quality: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            gc_interval: DEFAULT_GC_INTERVAL,
            draft_ttl: DEFAULT_DRAFT_TTL,
            default_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            blob_quota_bytes: None,
            document_quota_bytes: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_images_per_issue: DEFAULT_MAX_IMAGES_PER_ISSUE,
            compress_max_edge: 1024,
            compress_quality: 70,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let secs = |name: &str, default: Duration| {
            parsed(name)
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let root = lookup("REPORTKEEP_ROOT")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            root,
            autosave_interval: secs("REPORTKEEP_AUTOSAVE_SECS", defaults.autosave_interval),
            gc_interval: secs("REPORTKEEP_GC_INTERVAL_SECS", defaults.gc_interval),
            draft_ttl: secs("REPORTKEEP_DRAFT_TTL_SECS", defaults.draft_ttl),
            default_capacity_bytes: parsed("REPORTKEEP_DEFAULT_CAPACITY_BYTES")
                .unwrap_or(defaults.default_capacity_bytes),
            blob_quota_bytes: parsed("REPORTKEEP_BLOB_QUOTA_BYTES"),
            document_quota_bytes: parsed("REPORTKEEP_DOCUMENT_QUOTA_BYTES"),
            max_upload_bytes: parsed("REPORTKEEP_MAX_UPLOAD_BYTES")
                .unwrap_or(defaults.max_upload_bytes),
            max_images_per_issue: parsed("REPORTKEEP_MAX_IMAGES_PER_ISSUE")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.max_images_per_issue),
            compress_max_edge: parsed("REPORTKEEP_COMPRESS_MAX_EDGE")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.compress_max_edge),
            compress_quality: parsed("REPORTKEEP_COMPRESS_QUALITY")
                .and_then(|v| u8::try_from(v).ok())
                .filter(|v| (1..=100).contains(v))
                .unwrap_or(defaults.compress_quality),
        }
    }

    /// Use the filesystem backend under `path`.
    pub fn with_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }
}
