//! Draft slot: the last autosaved snapshot of a report being edited.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;
use super::report::Report;

/// Drafts older than this are discarded on read.
pub const DEFAULT_DRAFT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Stored as the report JSON flattened with `lastSavedAt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSlot {
    #[serde(flatten)]
    pub report: Report,
    #[serde(alias = "lastSaved")]
    pub last_saved_at: DateTime<Utc>,
}

impl DraftSlot {
    pub fn new(report: Report, last_saved_at: DateTime<Utc>) -> Self {
        Self {
            report,
            last_saved_at,
        }
    }

    /// Strictly older than `ttl` counts as stale.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age_ms = (now - self.last_saved_at).num_milliseconds();
        age_ms > i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn from_json(key: &str, raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::InvalidInput(e.to_string()))
    }
}
