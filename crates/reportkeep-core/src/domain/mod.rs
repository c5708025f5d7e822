//! Domain model (IDs, report documents, drafts, blob metadata, errors).
//!
//! ここには値型だけを置きます。I/O は ports / impls、手順は app の担当です。

pub mod blob;
pub mod draft;
pub mod errors;
pub mod ids;
pub mod keys;
pub mod quota;
pub mod report;

pub use blob::{BlobRecord, BlobUpload};
pub use draft::{DEFAULT_DRAFT_TTL, DraftSlot};
pub use errors::{DraftError, ErrorKind, StoreError};
pub use ids::{BlobId, ReportId, compose_blob_id, compose_report_id};
pub use keys::{DRAFT_KEY_PREFIX, REPORT_KEY_PREFIX, draft_key, is_report_key, report_key};
pub use quota::{
    DEFAULT_CAPACITY_BYTES, ReportFootprint, StorageOverview, StorageUsage, format_size,
};
pub use report::{ChecklistItem, ChecklistStatus, InlineImage, Issue, Report, SCHEMA_VERSION, Severity};
