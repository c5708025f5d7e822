//! Usage figures reported by the quota oracle.

use serde::Serialize;

/// 10 GiB, used when the platform cannot report a capacity.
pub const DEFAULT_CAPACITY_BYTES: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub used: u64,
    pub total: u64,
}

impl StorageUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64 * 100.0
    }
}

/// Per-report share of storage: the document JSON plus its blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFootprint {
    pub key: String,
    pub report_id: String,
    pub json_bytes: u64,
    pub image_bytes: u64,
}

impl ReportFootprint {
    pub fn total_bytes(&self) -> u64 {
        self.json_bytes + self.image_bytes
    }
}

/// Usage plus per-report breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageOverview {
    pub usage: StorageUsage,
    pub reports: Vec<ReportFootprint>,
}

/// "1.50 MB" style size string.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}
