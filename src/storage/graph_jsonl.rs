//! Append-only journal `GraphStore`: every mutation is written to a JSONL
//! file before the in-memory index is updated, and the journal is replayed
//! on startup to rebuild that index.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::graph::{EdgeType, GraphEdge};

use super::{GraphStore, InMemoryGraphStore, StorageError, StorageResult};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op")]
enum JournalEntry {
    AddEdge { edge: GraphEdge },
    RemoveEdge {
        from: String,
        to: String,
        edge_type: Option<EdgeType>,
    },
}

pub struct JsonlGraphStore {
    inner: InMemoryGraphStore,
    journal_path: PathBuf,
    journal: Mutex<File>,
}

impl JsonlGraphStore {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let journal_path = path.as_ref().to_path_buf();
        let inner = InMemoryGraphStore::new();

        if journal_path.exists() {
            Self::replay(&journal_path, &inner)?;
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .map_err(|e| StorageError::Unavailable(format!("failed to open graph journal: {e}")))?;

        Ok(Self {
            inner,
            journal_path,
            journal: Mutex::new(journal),
        })
    }

    fn replay(path: &Path, inner: &InMemoryGraphStore) -> StorageResult<()> {
        let file = File::open(path)
            .map_err(|e| StorageError::Unavailable(format!("failed to open graph journal: {e}")))?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line.map_err(|e| StorageError::Unavailable(format!("failed to read graph journal: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)
                .map_err(|e| StorageError::Unavailable(format!("corrupt graph journal entry: {e}")))?;

            // `InMemoryGraphStore`'s operations are plain `RwLock` access and
            // never actually suspend, so driving them to completion outside
            // a running executor is safe here.
            match entry {
                JournalEntry::AddEdge { edge } => futures_replay_add(inner, edge),
                JournalEntry::RemoveEdge { from, to, edge_type } => {
                    futures_replay_remove(inner, &from, &to, edge_type)
                }
            }
        }
        Ok(())
    }

    fn append(&self, entry: &JournalEntry) -> StorageResult<()> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("journal lock poisoned: {e}")))?;
        let line = serde_json::to_string(entry)
            .map_err(|e| StorageError::Unavailable(format!("failed to serialize journal entry: {e}")))?;
        writeln!(journal, "{line}")
            .map_err(|e| StorageError::Unavailable(format!("failed to append to graph journal: {e}")))?;
        journal
            .flush()
            .map_err(|e| StorageError::Unavailable(format!("failed to flush graph journal: {e}")))
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }
}

/// Replay helper for the (rare) case `open` is called outside a tokio
/// runtime: since the in-memory store's operations never actually await,
/// we can drive the future to completion synchronously with a no-op waker.
fn futures_replay_add(inner: &InMemoryGraphStore, edge: GraphEdge) {
    let _ = futures::executor::block_on(inner.add_edge(edge));
}

fn futures_replay_remove(inner: &InMemoryGraphStore, from: &str, to: &str, edge_type: Option<EdgeType>) {
    let _ = futures::executor::block_on(inner.remove_edge(from, to, edge_type));
}

#[async_trait]
impl GraphStore for JsonlGraphStore {
    async fn add_edge(&self, edge: GraphEdge) -> StorageResult<()> {
        self.append(&JournalEntry::AddEdge { edge: edge.clone() })?;
        self.inner.add_edge(edge).await
    }

    async fn neighbors(
        &self,
        id: &str,
        types: Option<&[EdgeType]>,
        depth: usize,
    ) -> StorageResult<Vec<GraphEdge>> {
        self.inner.neighbors(id, types, depth).await
    }

    async fn subgraph(
        &self,
        root_id: &str,
        depth: usize,
        types: Option<&[EdgeType]>,
    ) -> StorageResult<(Vec<String>, Vec<GraphEdge>)> {
        self.inner.subgraph(root_id, depth, types).await
    }

    async fn remove_edge(&self, from: &str, to: &str, edge_type: Option<EdgeType>) -> StorageResult<()> {
        self.append(&JournalEntry::RemoveEdge {
            from: from.to_string(),
            to: to.to_string(),
            edge_type,
        })?;
        self.inner.remove_edge(from, to, edge_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn edges_survive_reopen() {
        let dir = tempdir().unwrap();
        let journal_path = dir.path().join("graph.jsonl");

        {
            let store = JsonlGraphStore::open(&journal_path).unwrap();
            store.add_edge(GraphEdge::new("a", "b", EdgeType::RelatesTo, 0.9)).await.unwrap();
        }

        let reopened = JsonlGraphStore::open(&journal_path).unwrap();
        let neighbors = reopened.neighbors("a", None, 1).await.unwrap();
        assert_eq!(neighbors.len(), 1);
    }

    #[tokio::test]
    async fn remove_edge_is_journaled_and_replayed() {
        let dir = tempdir().unwrap();
        let journal_path = dir.path().join("graph.jsonl");

        {
            let store = JsonlGraphStore::open(&journal_path).unwrap();
            store.add_edge(GraphEdge::new("a", "b", EdgeType::Blocks, 1.0)).await.unwrap();
            store.remove_edge("a", "b", Some(EdgeType::Blocks)).await.unwrap();
        }

        let reopened = JsonlGraphStore::open(&journal_path).unwrap();
        let neighbors = reopened.neighbors("a", None, 1).await.unwrap();
        assert!(neighbors.is_empty());
    }
}
