//! SQLite-backed legal document store and JSON Lines import.
//!
//! Documents live in `legal_documents` with their raw metadata (Vietnamese
//! keys, unvalidated). Related-document references are split out into
//! `document_relations` on import and folded back into the metadata as
//! `van_ban_lien_quan` on load, so the loader sees exactly the shape it
//! was given.
//!
//! # Import format
//!
//! One JSON object per line:
//!
//! ```json
//! {"id": "15-2020-nd-cp", "title": "Nghị định 15/2020/NĐ-CP", "content": "Điều 1. ...",
//!  "metadata": {"so_hieu": "15/2020/NĐ-CP", "tinh_trang": "Còn hiệu lực"}}
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use phaply_core::{DocumentStore, RawDocument};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

const RELATED_KEY: &str = "van_ban_lien_quan";

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load_all_documents(&self) -> Result<Vec<RawDocument>> {
        let rows = sqlx::query("SELECT id, title, body, metadata_json FROM legal_documents ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read legal_documents")?;

        let relation_rows = sqlx::query(
            r#"
            SELECT document_id, related_id, related_title, related_status
            FROM document_relations
            ORDER BY document_id, position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read document_relations")?;

        let mut relations: HashMap<String, Vec<Value>> = HashMap::new();
        for row in &relation_rows {
            relations
                .entry(row.get("document_id"))
                .or_default()
                .push(json!({
                    "id": row.get::<String, _>("related_id"),
                    "title": row.get::<String, _>("related_title"),
                    "tinh_trang": row.get::<Option<String>, _>("related_status"),
                }));
        }

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let raw_meta: String = row.get("metadata_json");
            // Unparseable JSON is handed on as a string so validation reports it per document.
            let mut metadata = serde_json::from_str(&raw_meta).unwrap_or(Value::String(raw_meta));
            if let (Value::Object(map), Some(related)) = (&mut metadata, relations.remove(&id)) {
                map.insert(RELATED_KEY.to_string(), Value::Array(related));
            }
            documents.push(RawDocument {
                id,
                title: row.get("title"),
                body: row.get("body"),
                metadata,
            });
        }
        Ok(documents)
    }
}

/// One line of an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    pub id: String,
    pub title: String,
    #[serde(alias = "body")]
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub records: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Parse a whole JSON Lines file. Any bad line rejects the file.
pub fn parse_jsonl(content: &str) -> Result<Vec<ImportRecord>> {
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ImportRecord =
            serde_json::from_str(line).with_context(|| format!("line {}: invalid record", i + 1))?;
        if record.id.trim().is_empty() {
            bail!("line {}: id must not be empty", i + 1);
        }
        records.push(record);
    }
    Ok(records)
}

pub async fn import_records(pool: &SqlitePool, records: &[ImportRecord]) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        records: records.len(),
        ..Default::default()
    };
    for record in records {
        match upsert_document(pool, record).await? {
            UpsertOutcome::Inserted => summary.inserted += 1,
            UpsertOutcome::Updated => summary.updated += 1,
            UpsertOutcome::Unchanged => summary.unchanged += 1,
        }
    }
    Ok(summary)
}

pub async fn upsert_document(pool: &SqlitePool, record: &ImportRecord) -> Result<UpsertOutcome> {
    let id = record.id.trim();
    let (metadata, related) = split_relations(&record.metadata);
    let metadata_json = serde_json::to_string(&metadata)?;
    let content_hash = hash_record(&record.title, &record.content, &metadata_json, &related);

    let existing: Option<String> =
        sqlx::query_scalar("SELECT content_hash FROM legal_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    if existing.as_deref() == Some(content_hash.as_str()) {
        return Ok(UpsertOutcome::Unchanged);
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO legal_documents (id, title, body, metadata_json, content_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(id)
    .bind(&record.title)
    .bind(&record.content)
    .bind(&metadata_json)
    .bind(&content_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM document_relations WHERE document_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for (position, rel) in related.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO document_relations (document_id, position, related_id, related_title, related_status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(position as i64)
        .bind(&rel.id)
        .bind(&rel.title)
        .bind(&rel.status)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(if existing.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    })
}

pub async fn count_documents(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM legal_documents")
        .fetch_one(pool)
        .await?)
}

struct Relation {
    id: String,
    title: String,
    status: Option<String>,
}

/// Pull a well-formed `van_ban_lien_quan` array out of the metadata. A
/// malformed value is left in place for load-time validation to reject.
fn split_relations(metadata: &Value) -> (Value, Vec<Relation>) {
    let Value::Object(map) = metadata else {
        return (metadata.clone(), Vec::new());
    };
    let Some(Value::Array(items)) = map.get(RELATED_KEY) else {
        return (metadata.clone(), Vec::new());
    };
    if !items.iter().all(Value::is_object) {
        return (metadata.clone(), Vec::new());
    }

    let text = |v: Option<&Value>| -> Option<String> {
        match v? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };
    let related = items
        .iter()
        .filter_map(|item| {
            Some(Relation {
                id: text(item.get("id"))?,
                title: text(item.get("title").or_else(|| item.get("ten"))).unwrap_or_default(),
                status: text(item.get("tinh_trang").or_else(|| item.get("status"))),
            })
        })
        .collect();

    let rest: Map<String, Value> = map
        .iter()
        .filter(|(k, _)| k.as_str() != RELATED_KEY)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (Value::Object(rest), related)
}

fn hash_record(title: &str, body: &str, metadata_json: &str, related: &[Relation]) -> String {
    let mut hasher = Sha256::new();
    for part in [title, body, metadata_json] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    for rel in related {
        hasher.update(rel.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(rel.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(rel.status.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// `phaply import <file.jsonl>`
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let records = parse_jsonl(&content)?;

    let pool = db::connect(config).await?;
    let summary = import_records(&pool, &records).await?;
    pool.close().await;

    println!("import {}", path.display());
    println!("  records: {}", summary.records);
    println!("  inserted: {}", summary.inserted);
    println!("  updated: {}", summary.updated);
    println!("  unchanged: {}", summary.unchanged);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use tempfile::TempDir;

    async fn test_pool(tmp: &TempDir) -> SqlitePool {
        let pool = db::connect_path(&tmp.path().join("phaply.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    const SAMPLE: &str = r#"
{"id": "nd-15", "title": "Nghị định 15/2020/NĐ-CP", "content": "Điều 1. Phạm vi điều chỉnh", "metadata": {"so_hieu": "15/2020/NĐ-CP", "van_ban_lien_quan": [{"id": "luat-cntt", "title": "Luật Công nghệ thông tin", "tinh_trang": "Còn hiệu lực"}]}}

{"id": "bllđ", "title": "Bộ luật Lao động", "body": "Điều 1."}
"#;

    #[test]
    fn test_parse_jsonl_reports_line() {
        let err = parse_jsonl("{\"id\":\"a\",\"title\":\"A\",\"content\":\"x\"}\nnot json\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        assert!(parse_jsonl("{\"id\":\" \",\"title\":\"A\",\"content\":\"x\"}").is_err());
    }

    #[tokio::test]
    async fn test_import_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        let records = parse_jsonl(SAMPLE).unwrap();

        let summary = import_records(&pool, &records).await.unwrap();
        assert_eq!(summary.inserted, 2);

        let docs = SqliteDocumentStore::new(pool.clone()).load_all_documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        let nd = docs.iter().find(|d| d.id == "nd-15").unwrap();
        assert_eq!(nd.metadata["so_hieu"], "15/2020/NĐ-CP");
        assert_eq!(nd.metadata[RELATED_KEY][0]["id"], "luat-cntt");
        assert_eq!(nd.metadata[RELATED_KEY][0]["tinh_trang"], "Còn hiệu lực");
        let bl = docs.iter().find(|d| d.id == "bllđ").unwrap();
        assert_eq!(bl.body, "Điều 1.");
        assert_eq!(bl.metadata, Value::Null);
    }

    #[tokio::test]
    async fn test_reimport_detects_unchanged_and_updated() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        let mut records = parse_jsonl(SAMPLE).unwrap();
        import_records(&pool, &records).await.unwrap();

        records[1].content = "Điều 1. Sửa đổi.".to_string();
        let summary = import_records(&pool, &records).await.unwrap();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(count_documents(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_relations_kept_for_validation() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        let records =
            parse_jsonl(r#"{"id": "x", "title": "X", "content": "c", "metadata": {"van_ban_lien_quan": "oops"}}"#)
                .unwrap();
        import_records(&pool, &records).await.unwrap();
        let docs = SqliteDocumentStore::new(pool).load_all_documents().await.unwrap();
        assert_eq!(docs[0].metadata[RELATED_KEY], "oops");
    }
}
