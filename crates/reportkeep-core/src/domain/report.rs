//! Report document model.
//!
//! JSON shape is camelCase and decoding is permissive: anything missing or
//! `null` falls back to a default so documents written by earlier versions
//! (or hand-edited ones) still load. A document that fails to decode loses
//! its blobs at the next orphan collection.

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::errors::StoreError;
use super::ids::{BlobId, ReportId};

/// Current document schema version written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Issue severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Trivial,
}

impl Severity {
    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            "trivial" => Severity::Trivial,
            _ => Severity::Medium,
        }
    }
}

/// `null` reads the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Sequence with `null` items dropped; a `null` sequence is empty.
fn without_null_items<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let items = Option::<Vec<Option<T>>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(items.into_iter().flatten().collect())
}

fn lenient_schema_version<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or(SCHEMA_VERSION))
}

fn lenient_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(Severity::parse_lenient).unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|v| v.as_str().map(str::to_owned))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

/// One checklist entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecklistItem {
    #[serde(deserialize_with = "null_as_default")]
    pub checked: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub notes: String,
}

/// category -> item -> entry.
///
/// Keys come from an external vocabulary; anything missing or `null` reads
/// as unchecked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChecklistStatus(pub BTreeMap<String, BTreeMap<String, ChecklistItem>>);

impl<'de> Deserialize<'de> for ChecklistStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        type Loose = BTreeMap<String, Option<BTreeMap<String, Option<ChecklistItem>>>>;
        let loose = Option::<Loose>::deserialize(deserializer)?.unwrap_or_default();
        Ok(Self(
            loose
                .into_iter()
                .map(|(category, items)| {
                    let items = items
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(item, entry)| (item, entry.unwrap_or_default()))
                        .collect();
                    (category, items)
                })
                .collect(),
        ))
    }
}

impl ChecklistStatus {
    /// Entry for `category`/`item`, or an unchecked empty one.
    pub fn item(&self, category: &str, item: &str) -> ChecklistItem {
        self.0
            .get(category)
            .and_then(|items| items.get(item))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&mut self, category: &str, item: &str, entry: ChecklistItem) {
        self.0
            .entry(category.to_string())
            .or_default()
            .insert(item.to_string(), entry);
    }

    /// Copy with every vocabulary entry present. Entries outside the
    /// vocabulary are kept as they are.
    pub fn normalized<'a, C, I>(&self, vocabulary: C) -> Self
    where
        C: IntoIterator<Item = (&'a str, I)>,
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = self.clone();
        for (category, items) in vocabulary {
            let entries = out.0.entry(category.to_string()).or_default();
            for item in items {
                entries.entry(item.to_string()).or_default();
            }
        }
        out
    }
}

/// An image held inline in an editing snapshot, as a `data:` URL.
///
/// Submitted documents reference blobs by id instead; inline images only
/// live in drafts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InlineImage(String);

impl InlineImage {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{media_type};base64,{}", BASE64.encode(bytes)))
    }

    pub fn as_data_url(&self) -> &str {
        &self.0
    }

    /// Encoded length as stored in JSON.
    pub fn encoded_len(&self) -> usize {
        self.0.len()
    }

    /// Split the data URL into `(media_type, bytes)`.
    pub fn decode(&self) -> Result<(String, Vec<u8>), StoreError> {
        let rest = self
            .0
            .strip_prefix("data:")
            .ok_or_else(|| StoreError::InvalidInput("inline image is not a data URL".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| StoreError::InvalidInput("inline image has no payload".into()))?;
        let media_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| StoreError::InvalidInput("inline image is not base64".into()))?;
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| StoreError::InvalidInput(format!("inline image payload: {e}")))?;
        Ok((media_type.to_string(), bytes))
    }
}

/// One reported issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Issue {
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub object_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub material_name: String,
    #[serde(deserialize_with = "lenient_severity")]
    pub severity: Severity,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: BTreeSet<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub notes: String,
    /// Ordered blob references. Ids without a blob are tolerated.
    #[serde(deserialize_with = "without_null_items")]
    pub image_ids: Vec<BlobId>,
    #[serde(
        deserialize_with = "without_null_items",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub images: Vec<InlineImage>,
}

impl Issue {
    pub fn toggle_tag(&mut self, tag: &str) {
        if !self.tags.remove(tag) {
            self.tags.insert(tag.to_string());
        }
    }

    pub fn inline_bytes(&self) -> usize {
        self.images.iter().map(InlineImage::encoded_len).sum()
    }
}

/// A QA report. Keyed in the document store by `(tester_name, pack_name)`;
/// `report_id` only scopes blob ownership and never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Report {
    #[serde(
        default = "default_schema_version",
        deserialize_with = "lenient_schema_version"
    )]
    pub schema_version: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub tester_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub pack_name: String,
    pub checklist_status: ChecklistStatus,
    #[serde(deserialize_with = "without_null_items")]
    pub issues: Vec<Issue>,
    #[serde(
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_default")]
    pub report_id: ReportId,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tester_name: String::new(),
            pack_name: String::new(),
            checklist_status: ChecklistStatus::default(),
            issues: Vec::new(),
            timestamp: None,
            report_id: ReportId::default(),
        }
    }
}

impl Report {
    /// Fresh report with one empty issue, the way a new editing session starts.
    pub fn new(tester_name: &str, pack_name: &str, report_id: ReportId) -> Self {
        Self {
            tester_name: tester_name.to_string(),
            pack_name: pack_name.to_string(),
            issues: vec![Issue::default()],
            report_id,
            ..Self::default()
        }
    }

    /// Every blob id referenced by any issue, in order, duplicates included.
    pub fn referenced_blob_ids(&self) -> impl Iterator<Item = &BlobId> {
        self.issues.iter().flat_map(|issue| issue.image_ids.iter())
    }

    pub fn has_inline_images(&self) -> bool {
        self.issues.iter().any(|issue| !issue.images.is_empty())
    }

    /// Copy with all inline images dropped. Blob references are kept.
    pub fn without_inline_images(&self) -> Self {
        let mut stripped = self.clone();
        for issue in &mut stripped.issues {
            issue.images.clear();
        }
        stripped
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

    /// Indented JSON for export/download.
    pub fn to_pretty_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::InvalidInput(e.to_string()))
    }
}
