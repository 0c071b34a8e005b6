//! Vector store (C6): one cosine-similarity collection per table, persisted
//! to disk as JSON, grounded in `intelligence/core/vector_engine.py::VectorEngine`.
//! No vector-index crate is pulled in (none of the pack's dependency stacks
//! carry one); embedding is expressed as a pluggable [`Embedder`] so the
//! similarity math and persistence stay engine-agnostic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::vector::FieldSummary;
use crate::models::{CollectionInfo, PatternResult, SimilarRecord};
use crate::utils::ApiError;

/// Turns text into a fixed-length embedding. Upserts are idempotent by id
/// and need not be strictly ordered across concurrent callers (spec.md §5).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;
}

/// Calls the same chat-completions-shaped endpoint family as [`crate::services::llm::LlmClient`],
/// against an `/v1/embeddings` path.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .map_err(|e| ApiError::external(format!("embedding call failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::external(format!("embedding endpoint returned {}", response.status())));
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| ApiError::external(format!("bad embedding response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ApiError::external("embedding endpoint returned no vectors".to_string()))
    }
}

/// Deterministic, dependency-free fallback used when no embedding endpoint
/// is configured: feature-hashes whitespace tokens into a fixed bucket
/// count and L2-normalizes. Never fails, never suspends.
pub const FALLBACK_DIMENSIONS: usize = 64;

pub struct FallbackEmbedder;

#[async_trait]
impl Embedder for FallbackEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vector = vec![0f32; FALLBACK_DIMENSIONS];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % FALLBACK_DIMENSIONS;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: String,
    text: String,
    embedding: Vec<f32>,
    metadata: Map<String, Value>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Collection {
    entries: Vec<VectorEntry>,
}

pub struct VectorStore {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl VectorStore {
    pub async fn new(dir: PathBuf, embedder: Arc<dyn Embedder>) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ApiError::storage(format!("creating vector store dir: {e}")))?;

        let mut collections = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ApiError::storage(format!("reading vector store dir: {e}")))?;
        while let Some(entry) =
            entries.next_entry().await.map_err(|e| ApiError::storage(format!("reading vector store dir: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            if let Ok(raw) = tokio::fs::read_to_string(&path).await {
                match serde_json::from_str::<Collection>(&raw) {
                    Ok(collection) => {
                        collections.insert(stem.to_string(), collection);
                    },
                    Err(err) => tracing::warn!(table = stem, error = %err, "ignoring malformed vector collection"),
                }
            }
        }

        Ok(Self { dir, embedder, collections: RwLock::new(collections) })
    }

    /// Renders + embeds a batch of records, upserting by `id_field` (or a
    /// stable hash of the record's JSON form), mirroring `embed_records`.
    pub async fn upsert_records(
        &self,
        table: &str,
        records: &[Map<String, Value>],
        id_field: Option<&str>,
    ) -> Result<usize, ApiError> {
        let mut new_entries = Vec::with_capacity(records.len());
        for record in records {
            let id = id_field
                .and_then(|field| record.get(field))
                .map(value_to_text)
                .unwrap_or_else(|| hash_record(record));
            let text = record_to_text(record);
            let embedding = self.embedder.embed(&text).await?;
            new_entries.push(VectorEntry { id, text, embedding, metadata: flatten_metadata(record) });
        }

        let embedded = new_entries.len();
        {
            let mut collections = self.collections.write().await;
            let collection = collections.entry(table.to_string()).or_default();
            for entry in new_entries {
                if let Some(existing) = collection.entries.iter_mut().find(|e| e.id == entry.id) {
                    *existing = entry;
                } else {
                    collection.entries.push(entry);
                }
            }
        }
        self.persist(table).await?;
        Ok(embedded)
    }

    pub async fn search_similar(
        &self,
        table: &str,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<SimilarRecord>, ApiError> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(table) else { return Ok(Vec::new()) };
        if collection.entries.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;
        Ok(rank_by_similarity(&collection.entries, &query_embedding, n_results, None))
    }

    /// Re-uses the seed record's stored embedding and excludes it from the
    /// result set, mirroring `search_by_example`.
    pub async fn search_by_example(
        &self,
        table: &str,
        record_id: &str,
        n_results: usize,
    ) -> Result<Vec<SimilarRecord>, ApiError> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(table) else { return Ok(Vec::new()) };
        let Some(seed) = collection.entries.iter().find(|e| e.id == record_id) else {
            return Err(ApiError::not_found(format!("record '{record_id}' not found in collection '{table}'")));
        };
        Ok(rank_by_similarity(&collection.entries, &seed.embedding.clone(), n_results, Some(record_id)))
    }

    /// Summarizes each metadata field across a set of "positive" ids as a
    /// numeric range when every value parses as a number, otherwise a
    /// value-frequency histogram, mirroring `find_patterns`.
    pub async fn find_patterns(&self, table: &str, positive_ids: &[String]) -> Result<PatternResult, ApiError> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(table) else {
            return Ok(PatternResult {
                sample_count: 0,
                numeric_ranges: HashMap::new(),
                frequent_values: HashMap::new(),
            });
        };

        let matched: Vec<&VectorEntry> =
            collection.entries.iter().filter(|e| positive_ids.contains(&e.id)).collect();

        let mut fields: HashMap<String, Vec<Value>> = HashMap::new();
        for entry in &matched {
            for (key, value) in &entry.metadata {
                fields.entry(key.clone()).or_default().push(value.clone());
            }
        }

        let mut numeric_ranges = HashMap::new();
        let mut frequent_values = HashMap::new();
        for (field, values) in fields {
            let parsed: Option<Vec<f64>> = values.iter().map(value_as_f64).collect();
            if let Some(numbers) = parsed.filter(|n| !n.is_empty()) {
                let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let avg = numbers.iter().sum::<f64>() / numbers.len() as f64;
                numeric_ranges.insert(field, FieldSummary::NumericRange { min, max, avg });
            } else {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for value in &values {
                    *counts.entry(value_to_text(value)).or_insert(0) += 1;
                }
                frequent_values.insert(field, FieldSummary::ValueFrequency(counts));
            }
        }

        Ok(PatternResult { sample_count: matched.len(), numeric_ranges, frequent_values })
    }

    pub async fn list_collections(&self) -> Vec<String> {
        self.collections.read().await.keys().cloned().collect()
    }

    /// Collection lifecycle "info" (spec.md §4.6), mirroring
    /// `VectorEngine.get_collection_info`'s catch-all-falls-back-to-zero shape:
    /// an absent collection reports `count: 0` rather than erroring.
    pub async fn get_collection_info(&self, table: &str) -> CollectionInfo {
        let count = self.collections.read().await.get(table).map(|c| c.entries.len()).unwrap_or(0);
        CollectionInfo { name: table.to_string(), count, metadata: Map::new() }
    }

    /// (I3) called whenever the relational store drops the matching table.
    pub async fn delete_collection(&self, table: &str) -> Result<bool, ApiError> {
        let removed = self.collections.write().await.remove(table).is_some();
        if removed {
            let path = self.collection_path(table);
            if path.exists() {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| ApiError::storage(format!("deleting vector collection: {e}")))?;
            }
        }
        Ok(removed)
    }

    fn collection_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    async fn persist(&self, table: &str) -> Result<(), ApiError> {
        let collection = self.collections.read().await.get(table).cloned().unwrap_or_default();
        let json = serde_json::to_string(&collection)
            .map_err(|e| ApiError::storage(format!("serializing vector collection: {e}")))?;
        tokio::fs::write(self.collection_path(table), json)
            .await
            .map_err(|e| ApiError::storage(format!("writing vector collection: {e}")))
    }
}

fn rank_by_similarity(
    entries: &[VectorEntry],
    query: &[f32],
    n_results: usize,
    exclude_id: Option<&str>,
) -> Vec<SimilarRecord> {
    let mut scored: Vec<SimilarRecord> = entries
        .iter()
        .filter(|e| exclude_id != Some(e.id.as_str()))
        .map(|e| {
            let similarity = cosine_similarity(query, &e.embedding) as f64;
            SimilarRecord { id: e.id.clone(), record: e.metadata.clone(), distance: 1.0 - similarity, similarity }
        })
        .collect();
    scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(n_results);
    scored
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}

/// `"Key: value. "`-joined rendering of every non-null field, mirroring
/// `_record_to_text`.
fn record_to_text(record: &Map<String, Value>) -> String {
    record
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{}: {}", title_case_label(k), value_to_text(v)))
        .collect::<Vec<_>>()
        .join(". ")
}

fn title_case_label(key: &str) -> String {
    key.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn flatten_metadata(record: &Map<String, Value>) -> Map<String, Value> {
    record
        .iter()
        .map(|(k, v)| {
            let scalar = match v {
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => v.clone(),
                other => Value::String(other.to_string()),
            };
            (k.clone(), scalar)
        })
        .collect()
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn hash_record(record: &Map<String, Value>) -> String {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(record).unwrap_or_default().hash(&mut hasher);
    hasher.finish().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path().to_path_buf(), Arc::new(FallbackEmbedder)).await.unwrap();

        let mut record = Map::new();
        record.insert("id".to_string(), json!("abc"));
        record.insert("make".to_string(), json!("Toyota"));

        store.upsert_records("cars", &[record.clone()], Some("id")).await.unwrap();
        store.upsert_records("cars", &[record], Some("id")).await.unwrap();

        assert_eq!(store.get_collection_info("cars").await.count, 1);
    }

    #[tokio::test]
    async fn collection_info_reports_zero_for_unknown_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path().to_path_buf(), Arc::new(FallbackEmbedder)).await.unwrap();
        let info = store.get_collection_info("ghost").await;
        assert_eq!(info.name, "ghost");
        assert_eq!(info.count, 0);
    }

    #[tokio::test]
    async fn search_similar_returns_empty_for_unknown_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path().to_path_buf(), Arc::new(FallbackEmbedder)).await.unwrap();
        let results = store.search_similar("ghost", "anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_by_example_excludes_the_seed() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path().to_path_buf(), Arc::new(FallbackEmbedder)).await.unwrap();

        let mut a = Map::new();
        a.insert("id".to_string(), json!("a"));
        a.insert("note".to_string(), json!("fast turnaround"));
        let mut b = Map::new();
        b.insert("id".to_string(), json!("b"));
        b.insert("note".to_string(), json!("fast turnaround"));

        store.upsert_records("deals", &[a, b], Some("id")).await.unwrap();
        let results = store.search_by_example("deals", "a", 5).await.unwrap();
        assert!(results.iter().all(|r| r.id != "a"));
    }
}
