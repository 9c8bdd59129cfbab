//! Core data models for the legal retrieval pipeline.
//!
//! Documents arrive from the store with loosely-typed metadata keyed by
//! Vietnamese field names. [`LegalMetadata::from_raw`] maps them once into
//! named, typed fields; everything downstream (chunks, artifacts, citations)
//! works with the struct and never looks keys up by string.
//!
//! | Raw key | Field |
//! |---------|-------|
//! | `so_hieu` | [`LegalMetadata::document_number`] |
//! | `loai_van_ban` | [`LegalMetadata::category`] |
//! | `co_quan_ban_hanh`, `noi_ban_hanh` | [`LegalMetadata::issuing_body`] |
//! | `tinh_trang`, `tinh_trang_hieu_luc` | [`LegalMetadata::status`] |
//! | `ngay_ban_hanh` | [`LegalMetadata::issued_on`] |
//! | `ngay_hieu_luc` | [`LegalMetadata::effective_on`] |
//! | `url`, `source_url` | [`LegalMetadata::source_url`] |
//! | `van_ban_lien_quan` | [`LegalMetadata::related`] |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Validation failure while mapping raw store metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata for document {document_id} must be a JSON object")]
    NotAnObject { document_id: String },
    #[error("field `{field}` of document {document_id} must be a scalar value")]
    NotScalar { document_id: String, field: String },
    #[error("`van_ban_lien_quan` of document {document_id} must be an array of objects")]
    InvalidRelated { document_id: String },
    #[error("document id must not be empty")]
    EmptyId,
}

/// Weak reference to another document. Never implies ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedDocument {
    pub id: String,
    pub title: String,
    pub status: Option<String>,
}

/// Structured legal metadata attached to a document and copied onto each
/// of its chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalMetadata {
    pub document_id: String,
    pub title: String,
    /// Số hiệu, e.g. `15/2020/NĐ-CP`.
    pub document_number: Option<String>,
    pub category: Option<String>,
    pub issuing_body: Option<String>,
    pub status: Option<String>,
    /// ISO `YYYY-MM-DD` when the raw value parsed as a date, raw text otherwise.
    pub issued_on: Option<String>,
    pub effective_on: Option<String>,
    pub source_url: Option<String>,
    pub related: Vec<RelatedDocument>,
}

impl LegalMetadata {
    /// Map a raw metadata object from the document store.
    ///
    /// `raw` may be `null` (no metadata). Scalar values of any JSON type are
    /// coerced to strings; blank strings become `None`.
    pub fn from_raw(document_id: &str, title: &str, raw: &Value) -> Result<Self, MetadataError> {
        if document_id.trim().is_empty() {
            return Err(MetadataError::EmptyId);
        }

        let mut meta = LegalMetadata {
            document_id: document_id.trim().to_string(),
            title: title.trim().to_string(),
            ..Default::default()
        };

        let map = match raw {
            Value::Null => return Ok(meta),
            Value::Object(map) => map,
            _ => {
                return Err(MetadataError::NotAnObject {
                    document_id: meta.document_id,
                })
            }
        };

        let field = |keys: &[&str]| -> Result<Option<String>, MetadataError> {
            for key in keys {
                if let Some(v) = map.get(*key) {
                    let coerced = coerce_scalar(v).ok_or_else(|| MetadataError::NotScalar {
                        document_id: document_id.to_string(),
                        field: key.to_string(),
                    })?;
                    if coerced.is_some() {
                        return Ok(coerced);
                    }
                }
            }
            Ok(None)
        };

        meta.document_number = field(&["so_hieu"])?;
        meta.category = field(&["loai_van_ban"])?;
        meta.issuing_body = field(&["co_quan_ban_hanh", "noi_ban_hanh"])?;
        meta.status = field(&["tinh_trang", "tinh_trang_hieu_luc"])?;
        meta.issued_on = field(&["ngay_ban_hanh"])?.map(normalize_date);
        meta.effective_on = field(&["ngay_hieu_luc"])?.map(normalize_date);
        meta.source_url = field(&["url", "source_url"])?;

        if let Some(related) = map.get("van_ban_lien_quan") {
            meta.related = parse_related(document_id, related)?;
        }

        Ok(meta)
    }

    /// Document number for display, `"N/A"` when unknown.
    pub fn document_number_or_na(&self) -> &str {
        self.document_number.as_deref().unwrap_or("N/A")
    }
}

fn parse_related(document_id: &str, value: &Value) -> Result<Vec<RelatedDocument>, MetadataError> {
    let invalid = || MetadataError::InvalidRelated {
        document_id: document_id.to_string(),
    };
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(invalid()),
    };

    let mut related = Vec::with_capacity(items.len());
    for item in items {
        let obj = item.as_object().ok_or_else(invalid)?;
        let get = |k: &str| obj.get(k).and_then(coerce_scalar).flatten();
        let Some(id) = get("id") else {
            continue;
        };
        related.push(RelatedDocument {
            id,
            title: get("title").or_else(|| get("ten")).unwrap_or_default(),
            status: get("tinh_trang").or_else(|| get("status")),
        });
    }
    Ok(related)
}

/// `Some(None)` for null/blank, `Some(Some(s))` for scalars, `None` for
/// arrays and objects.
fn coerce_scalar(v: &Value) -> Option<Option<String>> {
    match v {
        Value::Null => Some(None),
        Value::String(s) => {
            let t = s.trim();
            Some(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Value::Number(n) => Some(Some(n.to_string())),
        Value::Bool(b) => Some(Some(b.to_string())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn normalize_date(raw: String) -> String {
    for fmt in ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&raw, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }
    raw
}

/// One legal document as loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub body: String,
    pub metadata: LegalMetadata,
}

impl Document {
    pub fn id(&self) -> &str {
        &self.metadata.document_id
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }
}

/// Large chunk handed to the language model as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentChunk {
    /// `{document_id}-{index}`.
    pub id: String,
    pub index: usize,
    pub total: usize,
    pub text: String,
    pub metadata: LegalMetadata,
}

impl ParentChunk {
    pub fn make_id(document_id: &str, index: usize) -> String {
        format!("{}-{}", document_id, index)
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }
}

/// Small chunk carved from one parent; the unit of lexical and vector
/// matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildChunk {
    /// `{parent_id}-{index}`.
    pub id: String,
    pub parent_id: String,
    pub index: usize,
    pub total: usize,
    pub text: String,
    /// Segmented word tokens fed to the lexical index.
    pub tokens: Vec<String>,
    pub document_id: String,
    pub title: String,
    pub document_number: Option<String>,
}
