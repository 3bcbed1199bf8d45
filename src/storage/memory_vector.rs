//! In-memory reference `VectorStore`: brute-force cosine distance, no
//! native hybrid support (the query service does the merge itself).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{StorageError, StorageResult, VectorHit, VectorStore};

struct Entry {
    document: String,
    embedding: Vec<f32>,
    metadata: HashMap<String, Value>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let similarity = dot / (norm_a * norm_b);
    (1.0 - similarity).max(0.0)
}

fn matches_where(metadata: &HashMap<String, Value>, where_clause: &HashMap<String, Value>) -> bool {
    where_clause.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        id: &str,
        document: &str,
        embedding: Vec<f32>,
        metadata: HashMap<String, Value>,
    ) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        entries.insert(
            id.to_string(),
            Entry {
                document: document.to_string(),
                embedding,
                metadata,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        where_clause: &HashMap<String, Value>,
    ) -> StorageResult<Vec<VectorHit>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;

        let mut hits: Vec<VectorHit> = entries
            .iter()
            .filter(|(_, entry)| matches_where(&entry.metadata, where_clause))
            .map(|(id, entry)| VectorHit {
                id: id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(embedding, &entry.embedding),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(n);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> StorageResult<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        Ok(entries.len())
    }

    async fn reset(&self) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        entries.clear();
        Ok(())
    }
}
