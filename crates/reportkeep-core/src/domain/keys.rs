//! Key constructors for the flat key/value medium.
//!
//! Documents and drafts share one medium, so their prefixes must never
//! overlap: `qa-report-` vs `qa-form-temp-`.

pub const REPORT_KEY_PREFIX: &str = "qa-report-";
pub const DRAFT_KEY_PREFIX: &str = "qa-form-temp-";

/// Document key for a submitted report.
pub fn report_key(tester: &str, pack: &str) -> String {
    format!("{REPORT_KEY_PREFIX}{tester}-{pack}")
}

/// Draft slot key for an in-progress report.
pub fn draft_key(tester: &str, pack: &str) -> String {
    format!("{DRAFT_KEY_PREFIX}{tester}-{pack}")
}

pub fn is_report_key(key: &str) -> bool {
    key.starts_with(REPORT_KEY_PREFIX)
}
