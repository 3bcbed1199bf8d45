//! SQLite-backed `DecisionStore`: indexed columns for filtering, the full
//! decision serialized as JSON for everything else, and an FTS5 index for
//! free-text search.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::domain::decision::{Decision, OutcomeKind, Outcome};

use super::{
    DecisionFilters, DecisionStats, DecisionStatus, DecisionStore, ListQuery, ListResult,
    SortDirection, StorageError, StorageResult,
};

pub const SCHEMA_VERSION: i32 = 1;

pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS decisions (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            category TEXT NOT NULL,
            stakes TEXT NOT NULL,
            status TEXT NOT NULL,
            project TEXT,
            feature TEXT,
            pr INTEGER,
            created_at TEXT NOT NULL,
            searchable_text TEXT NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_category ON decisions(category)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_agent ON decisions(agent_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_status ON decisions(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_created_at ON decisions(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS decisions_fts USING fts5(
            searchable_text,
            content='decisions',
            content_rowid='rowid'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS decisions_ai AFTER INSERT ON decisions BEGIN
            INSERT INTO decisions_fts(rowid, searchable_text) VALUES (NEW.rowid, NEW.searchable_text);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS decisions_ad AFTER DELETE ON decisions BEGIN
            INSERT INTO decisions_fts(decisions_fts, rowid, searchable_text) VALUES ('delete', OLD.rowid, OLD.searchable_text);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS decisions_au AFTER UPDATE ON decisions BEGIN
            INSERT INTO decisions_fts(decisions_fts, rowid, searchable_text) VALUES ('delete', OLD.rowid, OLD.searchable_text);
            INSERT INTO decisions_fts(rowid, searchable_text) VALUES (NEW.rowid, NEW.searchable_text);
        END",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    Ok(())
}

pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='decisions'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

pub struct SqliteDecisionStore {
    conn: Mutex<Connection>,
}

impl SqliteDecisionStore {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Unavailable(format!("failed to open sqlite database: {e}")))?;
        if !is_initialized(&conn) {
            initialize_schema(&conn)
                .map_err(|e| StorageError::Unavailable(format!("failed to initialize schema: {e}")))?;
        }
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Unavailable(format!("failed to open sqlite database: {e}")))?;
        initialize_schema(&conn)
            .map_err(|e| StorageError::Unavailable(format!("failed to initialize schema: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("connection lock poisoned: {e}")))?;
        f(&conn).map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    fn status_str(decision: &Decision) -> &'static str {
        if decision.is_reviewed() {
            "reviewed"
        } else {
            "pending"
        }
    }

    fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<Decision> {
        let data: String = row.get("data")?;
        serde_json::from_str(&data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    fn upsert_row(conn: &Connection, decision: &Decision) -> rusqlite::Result<()> {
        let data = serde_json::to_string(decision).expect("Decision always serializes");
        conn.execute(
            "INSERT INTO decisions (id, agent_id, category, stakes, status, project, feature, pr, created_at, searchable_text, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                category = excluded.category,
                stakes = excluded.stakes,
                status = excluded.status,
                project = excluded.project,
                feature = excluded.feature,
                pr = excluded.pr,
                searchable_text = excluded.searchable_text,
                data = excluded.data",
            params![
                decision.id,
                decision.agent_id,
                decision.category,
                decision.stakes.as_str(),
                Self::status_str(decision),
                decision.project,
                decision.feature,
                decision.pr,
                decision.created_at.to_rfc3339(),
                decision.searchable_text(),
                data,
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl DecisionStore for SqliteDecisionStore {
    async fn save(&self, mut decision: Decision) -> StorageResult<Decision> {
        self.with_conn(|conn| -> rusqlite::Result<()> {
            let existing: Option<String> = conn
                .query_row("SELECT data FROM decisions WHERE id = ?1", params![decision.id], |r| r.get(0))
                .optional()?;

            if let Some(existing_json) = existing {
                let existing: Decision = serde_json::from_str(&existing_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
                })?;
                decision.created_at = existing.created_at;
                if existing.is_reviewed() {
                    let lessons = decision.outcome.as_ref().and_then(|o| o.lessons.clone());
                    decision = existing.clone();
                    if let Some(outcome) = decision.outcome.as_mut() {
                        outcome.lessons = lessons;
                    }
                } else {
                    decision.updated_at = Some(Utc::now());
                }
            }

            Self::upsert_row(conn, &decision)
        })?;
        self.get(&decision.id).await
    }

    async fn get(&self, id: &str) -> StorageResult<Decision> {
        let id = id.to_string();
        let id_for_err = id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT data FROM decisions WHERE id = ?1",
                params![id],
                Self::row_to_decision,
            )
            .optional()
        })?
        .ok_or_else(|| StorageError::NotFound(format!("decision {id_fmt} not found", id_fmt = id_for_err)))
    }

    async fn list(&self, query: ListQuery) -> StorageResult<ListResult> {
        // Filtering is applied in-process over the decoded rows rather than
        // translated into SQL predicates: the filter set is rich enough
        // (tag intersections, free-text) that a hand-rolled SQL builder
        // would duplicate `DecisionFilters::matches` without benefit at the
        // row counts this store is sized for.
        let order = match query.sort {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let sql = format!("SELECT data FROM decisions ORDER BY created_at {order}");
        let all: Vec<Decision> = self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], Self::row_to_decision)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let matching: Vec<Decision> = all.into_iter().filter(|d| query.filters.matches(d)).collect();
        let total_matching = matching.len();
        let items = matching.into_iter().skip(query.offset).take(query.limit).collect();
        Ok(ListResult { items, total_matching })
    }

    async fn stats(&self, filters: DecisionFilters) -> StorageResult<DecisionStats> {
        let result = self
            .list(ListQuery {
                offset: 0,
                limit: usize::MAX,
                filters,
                sort: SortDirection::Desc,
            })
            .await?;
        Ok(super::memory_decision::compute_stats(&result.items))
    }

    async fn update_outcome(
        &self,
        id: &str,
        outcome: OutcomeKind,
        actual_result: String,
        lessons: Option<String>,
    ) -> StorageResult<Decision> {
        let mut decision = self.get(id).await?;
        if decision.is_reviewed() {
            return Err(StorageError::Conflict(format!("decision {id} already reviewed")));
        }
        decision.outcome = Some(Outcome {
            outcome,
            actual_result,
            lessons,
            reviewed_at: Utc::now(),
        });
        self.with_conn(|conn| Self::upsert_row(conn, &decision))?;
        Ok(decision)
    }

    async fn count(&self, filters: DecisionFilters) -> StorageResult<usize> {
        let result = self
            .list(ListQuery {
                offset: 0,
                limit: usize::MAX,
                filters,
                sort: SortDirection::Desc,
            })
            .await?;
        Ok(result.total_matching)
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn is_send_sync<T: Send + Sync>() {}
    is_send_sync::<SqliteDecisionStore>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{new_decision_id, Stakes};
    use std::collections::HashSet;

    fn sample(agent: &str) -> Decision {
        Decision {
            id: new_decision_id(),
            decision_text: "adopt sqlite for durability".into(),
            context: "small deployment, single node".into(),
            category: "architecture".into(),
            stakes: Stakes::Medium,
            confidence: 0.7,
            agent_id: agent.into(),
            created_at: Utc::now(),
            updated_at: None,
            project: Some("cstp".into()),
            feature: None,
            pr: None,
            file: None,
            line: None,
            commit: None,
            reasons: vec![],
            tags: HashSet::new(),
            pattern: None,
            bridge: None,
            deliberation: None,
            outcome: None,
            review_by: None,
            related_to: vec![],
            quality: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = SqliteDecisionStore::in_memory().unwrap();
        let saved = store.save(sample("agent-1")).await.unwrap();
        let fetched = store.get(&saved.id).await.unwrap();
        assert_eq!(fetched.id, saved.id);
        assert_eq!(fetched.decision_text, saved.decision_text);
    }

    #[tokio::test]
    async fn resave_preserves_created_at_and_bumps_updated_at() {
        let store = SqliteDecisionStore::in_memory().unwrap();
        let mut saved = store.save(sample("agent-1")).await.unwrap();
        let original_created = saved.created_at;
        saved.decision_text = "revised text".into();
        let resaved = store.save(saved).await.unwrap();
        assert_eq!(resaved.created_at, original_created);
        assert!(resaved.updated_at.is_some());
    }

    #[tokio::test]
    async fn reviewed_decision_rejects_further_field_changes() {
        let store = SqliteDecisionStore::in_memory().unwrap();
        let saved = store.save(sample("agent-1")).await.unwrap();
        let reviewed = store
            .update_outcome(&saved.id, OutcomeKind::Success, "worked out".into(), None)
            .await
            .unwrap();
        assert!(reviewed.is_reviewed());

        let mut tampered = reviewed.clone();
        tampered.decision_text = "attempted rewrite".into();
        let resaved = store.save(tampered).await.unwrap();
        assert_eq!(resaved.decision_text, reviewed.decision_text);
    }

    #[tokio::test]
    async fn update_outcome_twice_conflicts() {
        let store = SqliteDecisionStore::in_memory().unwrap();
        let saved = store.save(sample("agent-1")).await.unwrap();
        store
            .update_outcome(&saved.id, OutcomeKind::Success, "ok".into(), None)
            .await
            .unwrap();
        let second = store
            .update_outcome(&saved.id, OutcomeKind::Failure, "actually not ok".into(), None)
            .await;
        assert!(matches!(second, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let store = SqliteDecisionStore::in_memory().unwrap();
        let result = store.get("does-not-exist").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
