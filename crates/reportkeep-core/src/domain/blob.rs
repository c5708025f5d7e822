//! Blob metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BlobId, ReportId};

/// Everything about a stored blob except its bytes.
///
/// `byte_size` is recorded at write time; size accounting sums this field
/// over the records actually present in the medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    pub id: BlobId,
    pub owner_report_id: ReportId,
    #[serde(default)]
    pub file_name: String,
    pub media_type: String,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
}

/// Input to `BlobStore::put`.
#[derive(Debug, Clone)]
pub struct BlobUpload {
    pub owner_report_id: ReportId,
    pub file_name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl BlobUpload {
    pub fn new(
        owner_report_id: ReportId,
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            owner_report_id,
            file_name: file_name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
