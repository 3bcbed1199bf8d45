//! In-memory reference `GraphStore`.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;

use crate::domain::graph::{EdgeType, GraphEdge};

use super::{GraphStore, StorageError, StorageResult};

#[derive(Default)]
pub struct InMemoryGraphStore {
    edges: RwLock<Vec<GraphEdge>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjacency as seen from `id`: a plain edge contributes one direction,
    /// a symmetric (`relates_to`) edge contributes both.
    fn adjacent(edge: &GraphEdge, id: &str) -> Option<String> {
        if edge.from_id == id {
            Some(edge.to_id.clone())
        } else if edge.edge_type.is_symmetric() && edge.to_id == id {
            Some(edge.from_id.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn add_edge(&self, edge: GraphEdge) -> StorageResult<()> {
        let mut edges = self
            .edges
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        edges.push(edge);
        Ok(())
    }

    async fn neighbors(
        &self,
        id: &str,
        types: Option<&[EdgeType]>,
        depth: usize,
    ) -> StorageResult<Vec<GraphEdge>> {
        let edges = self
            .edges
            .read()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        let depth = depth.max(1);

        let mut visited = HashSet::new();
        visited.insert(id.to_string());
        let mut frontier = VecDeque::from([id.to_string()]);
        let mut result = Vec::new();

        for _ in 0..depth {
            let mut next_frontier = VecDeque::new();
            for node in frontier.drain(..) {
                for edge in edges.iter() {
                    if let Some(types) = types {
                        if !types.contains(&edge.edge_type) {
                            continue;
                        }
                    }
                    if let Some(neighbor) = Self::adjacent(edge, &node) {
                        if !visited.contains(&neighbor) {
                            visited.insert(neighbor.clone());
                            next_frontier.push_back(neighbor);
                        }
                        if edge.from_id == node || (edge.edge_type.is_symmetric() && edge.to_id == node) {
                            result.push(edge.clone());
                        }
                    }
                }
            }
            frontier = next_frontier;
        }

        result.dedup_by(|a, b| a.from_id == b.from_id && a.to_id == b.to_id && a.edge_type == b.edge_type);
        Ok(result)
    }

    async fn subgraph(
        &self,
        root_id: &str,
        depth: usize,
        types: Option<&[EdgeType]>,
    ) -> StorageResult<(Vec<String>, Vec<GraphEdge>)> {
        let edges = self.neighbors(root_id, types, depth).await?;
        let mut nodes: HashSet<String> = HashSet::new();
        nodes.insert(root_id.to_string());
        for edge in &edges {
            nodes.insert(edge.from_id.clone());
            nodes.insert(edge.to_id.clone());
        }
        Ok((nodes.into_iter().collect(), edges))
    }

    async fn remove_edge(&self, from: &str, to: &str, edge_type: Option<EdgeType>) -> StorageResult<()> {
        let mut edges = self
            .edges
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        edges.retain(|edge| {
            !(edge.from_id == from
                && edge.to_id == to
                && edge_type.map(|t| t == edge.edge_type).unwrap_or(true))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relates_to_neighbors_are_bidirectional() {
        let store = InMemoryGraphStore::new();
        store
            .add_edge(GraphEdge::new("a", "b", EdgeType::RelatesTo, 0.8))
            .await
            .unwrap();

        let from_a = store.neighbors("a", None, 1).await.unwrap();
        let from_b = store.neighbors("b", None, 1).await.unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 1);
    }

    #[tokio::test]
    async fn depends_on_is_directional_only() {
        let store = InMemoryGraphStore::new();
        store
            .add_edge(GraphEdge::new("a", "b", EdgeType::DependsOn, 1.0))
            .await
            .unwrap();

        let from_a = store.neighbors("a", None, 1).await.unwrap();
        let from_b = store.neighbors("b", None, 1).await.unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 0);
    }

    #[tokio::test]
    async fn depth_two_reaches_two_hops() {
        let store = InMemoryGraphStore::new();
        store.add_edge(GraphEdge::new("a", "b", EdgeType::RelatesTo, 1.0)).await.unwrap();
        store.add_edge(GraphEdge::new("b", "c", EdgeType::RelatesTo, 1.0)).await.unwrap();

        let (nodes, _) = store.subgraph("a", 2, None).await.unwrap();
        assert!(nodes.contains(&"c".to_string()));
    }
}
